//! The phase tracker: owner of one simulation thread's phase stack.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cause::{CauseStackManager, Causer};
use crate::config::TrackerConfig;
use crate::error::{PhaseError, Result, UsageError};
use crate::event::Event;
use crate::observability::journal::{JournalEntry, PhaseJournal};
use crate::observability::metrics;
use crate::world::Collaborators;

use super::capture::{CapturePolicy, Captures};
use super::context::{PhaseRecord, PhaseSetup};
use super::state::PhaseState;
use super::unwind::{self, UnwindReport};

/// Which simulation thread a tracker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerSide {
    /// Server tick thread
    Server,
    /// Client thread
    Client,
}

impl TrackerSide {
    /// Snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for TrackerSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase stack and cause stack of one simulation thread.
///
/// A tracker is handed explicitly to every driver that opens phases. It is
/// bound to one thread with [`bind_current_thread`](Self::bind_current_thread)
/// and every operation asserts that binding: touching a tracker from any
/// other thread, or before it is bound, panics.
pub struct PhaseTracker {
    side: TrackerSide,
    thread: OnceLock<ThreadId>,
    max_depth: usize,
    capture: CapturePolicy,
    collaborators: Collaborators,
    causes: CauseStackManager,
    stack: RefCell<Vec<PhaseRecord>>,
    next_id: Cell<u64>,
    journal: Option<Arc<PhaseJournal>>,
}

impl PhaseTracker {
    /// Creates an unbound tracker.
    #[must_use]
    pub fn new(side: TrackerSide, config: &TrackerConfig, collaborators: Collaborators) -> Self {
        Self {
            side,
            thread: OnceLock::new(),
            max_depth: config.max_phase_depth,
            capture: config.capture,
            collaborators,
            causes: CauseStackManager::new(),
            stack: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            journal: None,
        }
    }

    /// Attaches an audit journal.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<PhaseJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Fixes the tracker's thread affinity to the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `UsageError::AlreadyBound` if the tracker is already bound,
    /// even to the calling thread.
    pub fn bind_current_thread(&self) -> std::result::Result<(), UsageError> {
        let current = thread::current().id();
        if self.thread.set(current).is_ok() {
            debug!(side = self.side.as_str(), thread = ?current, "tracker bound");
            return Ok(());
        }
        let err = UsageError::AlreadyBound {
            side: self.side.as_str(),
            thread: format!("{:?}", self.thread.get()),
        };
        error!(error = %err, "tracker rebind rejected");
        metrics::record_usage_error("already_bound");
        Err(err)
    }

    /// Whether the calling thread is the bound thread.
    #[must_use]
    pub fn is_bound_here(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    /// Tracker side.
    #[must_use]
    pub const fn side(&self) -> TrackerSide {
        self.side
    }

    /// Outbound collaborators.
    #[must_use]
    pub const fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// The thread's cause stack.
    ///
    /// # Panics
    ///
    /// Panics if called off the bound thread.
    #[must_use]
    #[track_caller]
    pub fn cause_stack(&self) -> &CauseStackManager {
        self.assert_bound();
        &self.causes
    }

    /// State of the current (top) phase.
    ///
    /// # Panics
    ///
    /// Panics if called off the bound thread.
    #[must_use]
    #[track_caller]
    pub fn current_state(&self) -> Option<PhaseState> {
        self.assert_bound();
        self.stack_top(|record| record.state)
    }

    /// Id of the current context.
    ///
    /// # Panics
    ///
    /// Panics if called off the bound thread.
    #[must_use]
    #[track_caller]
    pub fn current_context_id(&self) -> Option<u64> {
        self.assert_bound();
        self.stack_top(|record| record.id)
    }

    /// Number of open phases.
    ///
    /// # Panics
    ///
    /// Panics if called off the bound thread.
    #[must_use]
    #[track_caller]
    pub fn depth(&self) -> usize {
        self.assert_bound();
        self.stack.borrow().len()
    }

    /// States on the stack, outermost first.
    ///
    /// # Panics
    ///
    /// Panics if called off the bound thread.
    #[must_use]
    #[track_caller]
    pub fn open_states(&self) -> Vec<PhaseState> {
        self.assert_bound();
        self.stack.borrow().iter().map(|record| record.state).collect()
    }

    // ------------------------------------------------------------------------
    // Crate-internal plumbing for contexts, capture and unwind
    // ------------------------------------------------------------------------

    #[track_caller]
    pub(crate) fn assert_bound(&self) {
        let current = thread::current().id();
        match self.thread.get() {
            Some(bound) if *bound == current => {}
            Some(bound) => self.fatal(
                "wrong_thread",
                &format!(
                    "{} tracker bound to {bound:?} accessed from {current:?}",
                    self.side
                ),
            ),
            None => self.fatal(
                "unbound",
                &format!("{} tracker used before bind_current_thread", self.side),
            ),
        }
    }

    #[track_caller]
    fn fatal(&self, kind: &'static str, message: &str) -> ! {
        metrics::record_usage_error(kind);
        error!(side = self.side.as_str(), kind, "{message}");
        panic!("{message}");
    }

    pub(crate) const fn capture_policy(&self) -> CapturePolicy {
        self.capture
    }

    pub(crate) fn next_context_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    pub(crate) fn stack_top<R>(&self, f: impl FnOnce(&PhaseRecord) -> R) -> Option<R> {
        self.stack.borrow().last().map(f)
    }

    pub(crate) fn with_top_captures(&self, f: impl FnOnce(&mut Captures)) {
        if let Some(record) = self.stack.borrow_mut().last_mut() {
            f(&mut record.captures);
        }
    }

    /// First hit of `lookup` over the open contexts, innermost first.
    pub(crate) fn newest_pending<R>(
        &self,
        lookup: impl Fn(&Captures) -> Option<R>,
    ) -> Option<R> {
        self.stack
            .borrow()
            .iter()
            .rev()
            .find_map(|record| lookup(&record.captures))
    }

    /// Offers a settled value to the open contexts, innermost first, until
    /// one holding the same cell takes it. Returns whether one did.
    pub(crate) fn rebase_pending(&self, mut rebase: impl FnMut(&mut Captures) -> bool) -> bool {
        self.stack
            .borrow_mut()
            .iter_mut()
            .rev()
            .any(|record| rebase(&mut record.captures))
    }

    /// Checks whether a context of `state` may be pushed right now.
    #[track_caller]
    pub(crate) fn admit(&self, state: PhaseState, setup: &PhaseSetup) -> Result<()> {
        self.assert_bound();
        if let Some(source) = &setup.source {
            if let Err(e) = source.validate() {
                error!(state = state.name(), error = %e, "rejected phase source");
                metrics::record_usage_error("empty_cause");
                return Err(e.into());
            }
        }

        let stack = self.stack.borrow();
        if stack.len() >= self.max_depth {
            warn!(
                side = self.side.as_str(),
                state = state.name(),
                limit = self.max_depth,
                "phase stack full"
            );
            return Err(PhaseError::DepthExceeded {
                limit: self.max_depth,
            }
            .into());
        }
        if !state.is_reentrant() {
            if let Some(open_at) = stack.iter().position(|r| r.state.same_family(state)) {
                warn!(
                    side = self.side.as_str(),
                    state = state.name(),
                    open_at,
                    "phase reentry denied"
                );
                return Err(PhaseError::ReentryDenied {
                    state: state.name(),
                    open_at,
                }
                .into());
            }
        }
        Ok(())
    }

    pub(crate) fn push_record(&self, id: u64, state: PhaseState, setup: PhaseSetup) -> usize {
        let source = setup.source.clone().unwrap_or(Causer::Server);
        let source_label = source.to_string();
        let index = {
            let mut stack = self.stack.borrow_mut();
            stack.push(PhaseRecord {
                id,
                state,
                source,
                setup,
                captures: Captures::default(),
                opened_at: std::time::Instant::now(),
            });
            stack.len() - 1
        };

        debug!(
            side = self.side.as_str(),
            context_id = id,
            state = state.name(),
            depth = index + 1,
            source = %source_label,
            "phase opened"
        );
        metrics::record_phase_opened(state.name(), self.side.as_str());
        metrics::set_phase_depth(self.side.as_str(), index + 1);
        self.journal(JournalEntry::PhaseOpened {
            context_id: id,
            state,
            side: self.side,
            depth: index + 1,
            source: source_label,
        });
        index
    }

    /// Pops the context at `index` and unwinds it.
    #[track_caller]
    pub(crate) fn close_context(&self, id: u64, index: usize) -> Result<UnwindReport> {
        self.assert_bound();
        let record = {
            let mut stack = self.stack.borrow_mut();
            let open = stack.len();
            match stack.pop() {
                Some(record) if record.id == id && open == index + 1 => record,
                top => {
                    let top_id = top.as_ref().map(|r| r.id);
                    stack.extend(top);
                    drop(stack);
                    self.fatal(
                        "close_order",
                        &format!(
                            "phase context {id} closed at depth {} while {open} phases are open \
                             (top is {top_id:?})",
                            index + 1
                        ),
                    );
                }
            }
        };
        metrics::set_phase_depth(self.side.as_str(), index);

        let state = record.state;
        let elapsed = record.opened_at.elapsed();
        let result = unwind::unwind_record(self, record);
        metrics::record_phase_closed(state.name(), self.side.as_str(), elapsed);

        match &result {
            Ok(report) => {
                debug!(
                    side = self.side.as_str(),
                    context_id = id,
                    state = state.name(),
                    events = report.events_posted,
                    cancelled = report.events_cancelled,
                    applied = report.applied,
                    reverted = report.reverted,
                    "phase closed"
                );
                self.journal(JournalEntry::PhaseClosed {
                    context_id: id,
                    state,
                    side: self.side,
                    events_posted: report.events_posted,
                    events_cancelled: report.events_cancelled,
                    applied: report.applied,
                    reverted: report.reverted,
                    duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                });
            }
            Err(e) => {
                error!(
                    side = self.side.as_str(),
                    context_id = id,
                    state = state.name(),
                    error = %e,
                    "phase unwind failed"
                );
                metrics::record_error(e.category());
            }
        }
        result
    }

    /// Drops a context during a panic without firing events.
    pub(crate) fn abandon_context(&self, id: u64, index: usize) {
        if !self.is_bound_here() {
            error!(context_id = id, "cannot abandon phase context off its thread");
            return;
        }
        let Ok(mut stack) = self.stack.try_borrow_mut() else {
            error!(context_id = id, "phase stack busy, context left in place");
            return;
        };
        if stack.len() == index + 1 && stack.last().is_some_and(|r| r.id == id) {
            if let Some(record) = stack.pop() {
                warn!(
                    side = self.side.as_str(),
                    context_id = id,
                    state = record.state.name(),
                    discarded = record.captures.len(),
                    "phase context abandoned while panicking"
                );
            }
            metrics::set_phase_depth(self.side.as_str(), index);
        } else {
            error!(
                side = self.side.as_str(),
                context_id = id,
                depth = index + 1,
                open = stack.len(),
                "phase context abandoned out of stack order"
            );
        }
    }

    pub(crate) fn note_event(&self, context_id: Option<u64>, event: &Event) {
        let kind = event.kind();
        let cancelled = event.is_cancelled() && event.is_revertible();
        if cancelled {
            info!(
                side = self.side.as_str(),
                context_id,
                kind = %kind,
                cause = %event.cause(),
                "event cancelled"
            );
        }
        metrics::record_event_posted(kind.as_str(), cancelled);
        self.journal(JournalEntry::EventPosted {
            context_id,
            kind,
            side: self.side,
            cancelled,
            changes: event.payload().change_count(),
            cause: event.cause().to_string(),
        });
    }

    pub(crate) fn journal(&self, entry: JournalEntry) {
        if let Some(journal) = &self.journal {
            journal.emit(entry);
        }
    }
}

impl fmt::Debug for PhaseTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseTracker")
            .field("side", &self.side)
            .field("thread", &self.thread.get())
            .field("max_depth", &self.max_depth)
            .field("depth", &self.stack.try_borrow().map(|s| s.len()).ok())
            .finish_non_exhaustive()
    }
}
