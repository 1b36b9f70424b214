//! `phase-tracker` - cause tracking and phase state machine for tick-based
//! game servers
//!
//! Every world mutation made while a phase is open is captured instead of
//! applied. When the phase closes, the captured changes are offered to
//! listeners as cancellable events carrying the full [`cause::Cause`] chain,
//! then committed or restored according to the listeners' verdicts.
//!
//! The main pieces:
//!
//! - [`cause`] - the per-thread cause stack with scoped frames and typed
//!   context keys
//! - [`phase`] - phase states, contexts and the per-thread tracker
//! - [`inventory`] - the slot/lens model mapping flat indices onto nested
//!   inventories
//! - [`dispatch`] - packet, scheduled task, plugin call and teleport drivers
//! - [`world`] - identifiers, values and the backing store collaborators

pub mod cause;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod inventory;
pub mod observability;
pub mod phase;
pub mod transaction;
pub mod world;

pub use error::{Result, TrackerError};
