//! Phase journal.
//!
//! An optional JSONL audit trail of phase lifecycles and posted events. Each
//! line is one [`JournalEntry`] wrapped with a sequence number and a UTC
//! timestamp.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::EventKind;
use crate::phase::{PhaseState, TrackerSide};

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One journaled occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum JournalEntry {
    /// A phase context was built and switched onto the stack.
    PhaseOpened {
        /// Context id, unique per tracker
        context_id: u64,
        /// Phase state
        state: PhaseState,
        /// Tracker side
        side: TrackerSide,
        /// Stack depth after the push
        depth: usize,
        /// Rendered source causer
        source: String,
    },

    /// A phase context was closed and unwound.
    PhaseClosed {
        /// Context id
        context_id: u64,
        /// Phase state
        state: PhaseState,
        /// Tracker side
        side: TrackerSide,
        /// Events posted during unwind
        events_posted: usize,
        /// Events a listener cancelled
        events_cancelled: usize,
        /// Changes committed
        applied: usize,
        /// Changes restored to their original value
        reverted: usize,
        /// Time the context was open
        duration_ms: u64,
    },

    /// An event was posted outside of unwind.
    EventPosted {
        /// Innermost open context, if any
        context_id: Option<u64>,
        /// Event kind
        kind: EventKind,
        /// Tracker side
        side: TrackerSide,
        /// Whether a listener cancelled it
        cancelled: bool,
        /// Changes the event carried
        changes: usize,
        /// Rendered cause
        cause: String,
    },

    /// A change was applied with no capturing phase open.
    UnattributedChange {
        /// Event kind describing the change
        kind: EventKind,
        /// Tracker side
        side: TrackerSide,
        /// Rendered cause at the time of the change
        cause: String,
    },
}

#[derive(Debug, Serialize)]
struct Envelope {
    sequence: u64,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    entry: JournalEntry,
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL journal writer.
///
/// Serialization and I/O failures are dropped; the journal never interrupts
/// the tick.
pub struct PhaseJournal {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for PhaseJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseJournal")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PhaseJournal {
    /// Creates a journal writing to `writer`.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// A journal that discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates (or truncates) a journal file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn to_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Writes one entry as a JSON line.
    pub fn emit(&self, entry: JournalEntry) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope {
            sequence,
            timestamp: Utc::now(),
            entry,
        };
        if let Ok(mut w) = self.writer.lock()
            && let Ok(line) = serde_json::to_string(&envelope)
        {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Number of entries emitted so far.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}
