//! Inbound drivers.
//!
//! Drivers are the only callers that open phases: they look up the state
//! for a unit of work, run the validity pre-check, build and switch a
//! context, run the work and close the context again.

pub mod packet;
pub mod task;
pub mod teleport;

use tracing::debug;

use crate::cause::{Causer, keys};
use crate::error::{Result, TrackerError};
use crate::phase::{PhaseContext, PhaseState, PhaseTracker, WorkUnit};
use crate::world::BlockPos;

pub use packet::{Packet, PacketOutcome, PlayerView, process_packet};
pub use task::{DrainReport, TaskFailure, TaskHandle, TaskInfo, TaskQueue, TaskSender};
pub use teleport::{TeleportOutcome, TeleportRequest, teleport};

/// Runs a plugin-requested world mutation.
///
/// Joins the current phase if it already is a plugin call; otherwise opens
/// a plugin phase sourced from the plugin. Calls without a plugin id fail
/// the pre-check and run unattributed.
///
/// # Errors
///
/// Returns whatever `f` returns, after the phase has closed, or any error
/// from closing the phase.
///
/// # Panics
///
/// Panics if called off the tracker's bound thread.
pub fn plugin_call<R>(
    tracker: &PhaseTracker,
    plugin: &str,
    f: impl FnOnce(&PhaseTracker) -> Result<R>,
) -> Result<R> {
    let state = PhaseState::PluginApi;
    let source = Causer::plugin(plugin);
    if state.is_invalid(&WorkUnit::PluginCall { plugin }, &source) {
        debug!("plugin call without plugin id, running unattributed");
        return f(tracker);
    }

    let frame = tracker.cause_stack().push_cause_frame();
    frame.push_cause(source.clone())?;
    frame.add_context(keys::PLUGIN, plugin.to_string());
    let result = run_in(tracker, state.switch_if_necessary(tracker), source, f);
    drop(frame);
    result
}

/// Ticks the block at `pos`.
///
/// Joins the current phase if it already is a block tick.
///
/// # Errors
///
/// Returns whatever `f` returns, after the phase has closed, or any error
/// from closing the phase.
///
/// # Panics
///
/// Panics if called off the tracker's bound thread.
pub fn block_tick<R>(
    tracker: &PhaseTracker,
    pos: BlockPos,
    f: impl FnOnce(&PhaseTracker) -> Result<R>,
) -> Result<R> {
    let state = PhaseState::BlockWorker;
    let source = Causer::Block { pos };
    if state.is_invalid(&WorkUnit::BlockTick { pos }, &source) {
        return f(tracker);
    }

    let frame = tracker.cause_stack().push_cause_frame();
    frame.push_cause(source.clone())?;
    let result = run_in(tracker, state.switch_if_necessary(tracker), source, f);
    drop(frame);
    result
}

/// Runs `f` inside `ctx`, or inside whatever is current when there is no
/// new context or the stack refuses it.
fn run_in<R>(
    tracker: &PhaseTracker,
    ctx: Option<PhaseContext<'_>>,
    source: Causer,
    f: impl FnOnce(&PhaseTracker) -> Result<R>,
) -> Result<R> {
    let Some(ctx) = ctx else {
        debug!(source = %source, "joining current phase");
        return f(tracker);
    };
    let mut ctx = ctx.source(source);
    match ctx.build_and_switch() {
        Ok(()) => {}
        Err(TrackerError::Phase(e)) => {
            debug!(error = %e, "phase refused, joining current phase");
            return f(tracker);
        }
        Err(e) => return Err(e),
    }
    let result = f(tracker);
    ctx.close()?;
    result
}
