//! Close-time unwinding of captured side effects.
//!
//! Unwinding runs inside a fresh cause frame carrying the context's source.
//! The state's unwind function turns the captures into event payloads; each
//! payload is posted (if anyone listens for its kind) and then settled:
//! applied, rewritten by listener-set custom values, or reverted.
//! Settlement works from the captured transactions; the posted event only
//! contributes listener verdicts.

use serde::Serialize;
use tracing::{trace, warn};

use crate::cause::keys;
use crate::error::Result;
use crate::event::{Event, EventPayload};
use crate::observability::metrics;
use crate::transaction::{BlockTransaction, CursorTransaction, SlotTransaction, all_invalid};
use crate::world::{EntityId, EntitySpawn, SlotStorage};

use super::capture::Captures;
use super::context::{PhaseRecord, PhaseSetup};
use super::state::PhaseState;
use super::tracker::PhaseTracker;

/// Builds event payloads from a closing context's captures.
pub type UnwindFn = fn(UnwindInput<'_>) -> Result<Vec<EventPayload>>;

/// Everything an unwind function gets to look at.
pub struct UnwindInput<'a> {
    /// State of the closing context
    pub state: PhaseState,
    /// Builder configuration of the closing context
    pub setup: &'a PhaseSetup,
    /// Captured side effects, in capture order
    pub captures: Captures,
    /// Slot storage, for reading current slot and cursor contents
    pub slots: &'a dyn SlotStorage,
}

/// Outcome of closing one context.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UnwindReport {
    /// Closed context
    pub context_id: u64,
    /// Its state name
    pub state: &'static str,
    /// Events delivered to listeners
    pub events_posted: usize,
    /// Delivered events that came back cancelled
    pub events_cancelled: usize,
    /// Changes written with their proposed or custom value
    pub applied: usize,
    /// Changes rolled back to, or left at, their original value
    pub reverted: usize,
    /// Entities spawned by the unwind
    pub spawned: Vec<EntityId>,
}

impl UnwindReport {
    pub(crate) const fn new(context_id: u64, state: PhaseState) -> Self {
        Self {
            context_id,
            state: state.name(),
            events_posted: 0,
            events_cancelled: 0,
            applied: 0,
            reverted: 0,
            spawned: Vec::new(),
        }
    }
}

// ============================================================================
// Unwind functions
// ============================================================================

/// Blocks, then inventory slots, then spawns; one payload per non-empty list.
///
/// # Errors
///
/// Never fails; the signature is shared with unwind functions that read
/// from the stores.
pub fn unwind_standard(input: UnwindInput<'_>) -> Result<Vec<EventPayload>> {
    let Captures {
        blocks,
        entities,
        slots,
    } = input.captures;
    Ok(payloads(blocks, slots, None, entities))
}

/// Like [`unwind_standard`], but the inventory payload also carries the
/// packet player's cursor change.
///
/// # Errors
///
/// Never fails; the signature is shared with unwind functions that read
/// from the stores.
pub fn unwind_packet(input: UnwindInput<'_>) -> Result<Vec<EventPayload>> {
    let cursor = cursor_transaction(input.setup, input.slots);
    let Captures {
        blocks,
        entities,
        slots,
    } = input.captures;
    Ok(payloads(blocks, slots, cursor, entities))
}

/// Packet unwind for container clicks.
///
/// A click that captured no slot change still reports the clicked slot, as
/// a transaction whose original and proposed value are the slot's current
/// item, so listeners observe every click.
///
/// # Errors
///
/// Returns `LensError` or `StoreError` if the clicked slot cannot be read.
pub fn unwind_click(mut input: UnwindInput<'_>) -> Result<Vec<EventPayload>> {
    let clicked = input.setup.container().zip(input.setup.clicked_slot());
    if input.captures.slots.is_empty()
        && let Some((inventory, index)) = clicked
        && index < inventory.capacity()
    {
        let slot = inventory.slot(index)?;
        let current = input.slots.item(slot.container, slot.native_index)?;
        trace!(slot = index, "synthesised click transaction");
        input
            .captures
            .slots
            .push(SlotTransaction::new(slot, current.clone(), current));
    }
    unwind_packet(input)
}

fn cursor_transaction(setup: &PhaseSetup, slots: &dyn SlotStorage) -> Option<CursorTransaction> {
    let player = setup.packet_player()?;
    let original = setup.cursor()?.clone();
    let current = slots.cursor(player);
    Some(CursorTransaction::new(player, original, current))
}

fn payloads(
    blocks: Vec<BlockTransaction>,
    slots: Vec<SlotTransaction>,
    cursor: Option<CursorTransaction>,
    entities: Vec<EntitySpawn>,
) -> Vec<EventPayload> {
    let mut payloads = Vec::new();
    if !blocks.is_empty() {
        payloads.push(EventPayload::ChangeBlock {
            transactions: blocks,
        });
    }
    let cursor_changed = cursor
        .as_ref()
        .is_some_and(|c| c.original() != c.proposed());
    if !slots.is_empty() || cursor_changed {
        payloads.push(EventPayload::ChangeInventory {
            transactions: slots,
            cursor,
        });
    }
    if !entities.is_empty() {
        payloads.push(EventPayload::SpawnEntity { entities });
    }
    payloads
}

// ============================================================================
// Unwind driver
// ============================================================================

/// Fires and settles everything a popped context captured.
pub(crate) fn unwind_record(tracker: &PhaseTracker, record: PhaseRecord) -> Result<UnwindReport> {
    let PhaseRecord {
        id,
        state,
        source,
        setup,
        captures,
        ..
    } = record;

    let causes = tracker.cause_stack();
    let frame = causes.push_cause_frame();
    frame.push_cause(source)?;
    if let Some(creator) = &setup.creator {
        frame.add_context(keys::CREATOR, creator.clone());
    }
    if let Some(notifier) = &setup.notifier {
        frame.add_context(keys::NOTIFIER, notifier.clone());
    }
    if let Some(player) = setup.packet_player {
        frame.add_context(keys::PACKET_PLAYER, player);
    }
    if let Some(item) = &setup.used_item {
        frame.add_context(keys::USED_ITEM, item.clone());
    }

    let collaborators = tracker.collaborators();
    let payloads = (state.behavior().unwind)(UnwindInput {
        state,
        setup: &setup,
        captures,
        slots: collaborators.slots.as_ref(),
    })?;

    let mut report = UnwindReport::new(id, state);
    for mut payload in payloads {
        let kind = payload.kind();
        let mut cancelled = false;
        if collaborators.events.should_fire(kind) {
            let mut event = Event::new(causes.current_cause(), payload.clone());
            collaborators.events.post(&mut event);
            tracker.note_event(Some(id), &event);
            report.events_posted += 1;
            cancelled = event.is_cancelled();
            if cancelled {
                report.events_cancelled += 1;
            }
            let dropped = payload.adopt_verdicts(event.payload());
            if dropped > 0 {
                warn!(
                    context_id = id,
                    kind = %kind,
                    dropped,
                    "ignored listener edits that match no captured change"
                );
            }
        } else {
            trace!(context_id = id, kind = %kind, "no listener, settling as captured");
        }
        settle(tracker, payload, cancelled, &mut report)?;
    }
    drop(frame);
    Ok(report)
}

/// Applies or reverts one batch.
///
/// A cancelled batch, or a non-empty batch whose transactions are all
/// invalid, restores every original. Otherwise each transaction settles to
/// its custom value, else its proposed value, or its original if invalid.
/// A cell still pending on an enclosing context takes the settled value as
/// that context's proposal and is written when the enclosing context closes.
fn settle(
    tracker: &PhaseTracker,
    payload: EventPayload,
    cancelled: bool,
    report: &mut UnwindReport,
) -> Result<()> {
    let collaborators = tracker.collaborators();
    match payload {
        EventPayload::ChangeBlock { transactions } => {
            let cancelled = cancelled || all_invalid(&transactions);
            let (mut applied, mut reverted) = (0, 0);
            for tx in &transactions {
                let (pos, value) = (*tx.target(), tx.settled_value(cancelled));
                if !tracker.rebase_pending(|captures| captures.rebase_block(pos, value)) {
                    collaborators.blocks.set_block(pos, value.clone())?;
                }
                if cancelled || !tx.is_valid() {
                    reverted += 1;
                } else {
                    applied += 1;
                }
            }
            metrics::record_transactions_settled("block", applied, reverted);
            report.applied += applied;
            report.reverted += reverted;
        }
        EventPayload::ChangeInventory {
            transactions,
            cursor,
        } => {
            let cancelled = cancelled || all_invalid(&transactions);
            let (mut applied, mut reverted) = (0, 0);
            for tx in &transactions {
                let (slot, value) = (tx.target(), tx.settled_value(cancelled));
                if !tracker.rebase_pending(|captures| captures.rebase_slot(slot, value)) {
                    collaborators
                        .slots
                        .set_item(slot.container, slot.native_index, value.clone())?;
                }
                if cancelled || !tx.is_valid() {
                    reverted += 1;
                } else {
                    applied += 1;
                }
            }
            // The cursor is live state: only a veto or a custom value touches it.
            if let Some(cursor) = cursor {
                if cancelled {
                    collaborators
                        .slots
                        .set_cursor(*cursor.target(), cursor.original().clone())?;
                } else if let Some(custom) = cursor.custom() {
                    collaborators
                        .slots
                        .set_cursor(*cursor.target(), custom.clone())?;
                }
            }
            metrics::record_transactions_settled("inventory", applied, reverted);
            report.applied += applied;
            report.reverted += reverted;
        }
        EventPayload::SpawnEntity { entities } => {
            if cancelled {
                metrics::record_transactions_settled("entity", 0, entities.len());
                report.reverted += entities.len();
            } else {
                for spawn in &entities {
                    report.spawned.push(collaborators.entities.spawn(spawn)?);
                }
                metrics::record_transactions_settled("entity", entities.len(), 0);
                report.applied += entities.len();
            }
        }
        EventPayload::MoveEntity { .. } | EventPayload::RotateEntity { .. } => {}
    }
    Ok(())
}
