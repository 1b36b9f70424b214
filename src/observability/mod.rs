//! Observability: logging, metrics and the phase journal.

pub mod journal;
pub mod logging;
pub mod metrics;

pub use self::journal::{JournalEntry, PhaseJournal};
pub use self::logging::{LogFormat, init_logging};
pub use self::metrics::init_metrics;
