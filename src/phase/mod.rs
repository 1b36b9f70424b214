//! Phase tracking.
//!
//! Every discrete unit of engine work (an inbound packet, a scheduled task,
//! a plugin call, a block tick) runs inside a phase. The phase decides which
//! world mutations are captured instead of applied, and on close turns the
//! captures into attribution events whose listeners can veto or rewrite
//! them before anything becomes visible.
//!
//! # Architecture
//!
//! - [`PhaseState`] - closed set of work categories with a static behavior table
//! - [`PhaseContext`] - one unit of work's transactional scope
//! - [`PhaseTracker`] - one simulation thread's phase stack and cause stack
//! - [`capture`] - mutation entry points consulting the top of the stack
//! - [`unwind`] - close-time event firing and settlement
//!
//! # Example
//!
//! ```no_run
//! # use phase_tracker::phase::{PhaseState, PhaseTracker};
//! # use phase_tracker::cause::Causer;
//! # fn run(tracker: &PhaseTracker) -> phase_tracker::error::Result<()> {
//! let mut ctx = PhaseState::PluginApi
//!     .create_phase_context(tracker)
//!     .source(Causer::plugin("warps"));
//! ctx.build_and_switch()?;
//! // mutations made here are captured on `ctx`
//! let report = ctx.close()?;
//! # let _ = report;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod context;
pub mod state;
pub mod tracker;
pub mod unwind;

pub use capture::{CaptureKind, CaptureOutcome, CapturePolicy, Captures};
pub use context::{PhaseContext, PhaseSetup};
pub use state::{
    PacketState, PhaseBehavior, PhaseState, WorkUnit, state_for_packet, state_for_task,
};
pub use tracker::{PhaseTracker, TrackerSide};
pub use unwind::{UnwindInput, UnwindReport};
