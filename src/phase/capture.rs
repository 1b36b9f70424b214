//! Mutation capture.
//!
//! World mutations go through the tracker. If the current phase captures the
//! mutation kind, it is recorded as a pending transaction on the top
//! context and reaches the backing store only when that context unwinds.
//! Otherwise it is applied immediately and reported afterwards; such
//! unattributed changes cannot be reverted.
//!
//! A cell may be pending on several open contexts at once. A new capture
//! takes the newest pending value as its original, and whatever an inner
//! context settles for such a cell becomes the enclosing context's pending
//! proposal instead of reaching the store, so the later write wins.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::event::{Event, EventPayload};
use crate::inventory::{Inventory, ItemStack, SlotRef};
use crate::observability::journal::JournalEntry;
use crate::observability::metrics;
use crate::transaction::{BlockTransaction, SlotTransaction};
use crate::world::{BlockPos, BlockState, EntityId, EntitySpawn};

use super::tracker::PhaseTracker;

/// Kinds of capturable mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    /// Block state writes
    Block,
    /// Entity spawns
    Entity,
    /// Inventory slot writes
    Inventory,
}

impl CaptureKind {
    /// Snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Entity => "entity",
            Self::Inventory => "inventory",
        }
    }
}

/// Which mutation kinds are captured.
///
/// Used both as a phase state's static policy and as the global switch in
/// the tracker configuration; a mutation is captured only if both allow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapturePolicy {
    /// Capture block writes
    pub blocks: bool,
    /// Capture entity spawns
    pub entities: bool,
    /// Capture inventory slot writes
    pub inventory: bool,
}

impl CapturePolicy {
    /// Capture everything.
    pub const ALL: Self = Self {
        blocks: true,
        entities: true,
        inventory: true,
    };

    /// Capture nothing.
    pub const NONE: Self = Self {
        blocks: false,
        entities: false,
        inventory: false,
    };

    /// Whether mutations of `kind` are captured.
    #[must_use]
    pub const fn allows(self, kind: CaptureKind) -> bool {
        match kind {
            CaptureKind::Block => self.blocks,
            CaptureKind::Entity => self.entities,
            CaptureKind::Inventory => self.inventory,
        }
    }
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self::ALL
    }
}

/// What happened to a mutation handed to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Recorded on the context; applied or reverted when it closes
    Captured {
        /// Context holding the pending transaction
        context_id: u64,
    },
    /// Written to the backing store immediately
    Applied,
    /// Spawned immediately
    Spawned(EntityId),
}

impl CaptureOutcome {
    /// Whether the mutation is pending on a context.
    #[must_use]
    pub const fn is_captured(self) -> bool {
        matches!(self, Self::Captured { .. })
    }
}

/// Side effects captured by one context, each list in capture order.
#[derive(Debug, Clone, Default)]
pub struct Captures {
    pub(crate) blocks: Vec<BlockTransaction>,
    pub(crate) entities: Vec<EntitySpawn>,
    pub(crate) slots: Vec<SlotTransaction>,
}

impl Captures {
    /// Number of captured side effects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len() + self.entities.len() + self.slots.len()
    }

    /// Whether nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Captured block transactions.
    #[must_use]
    pub fn blocks(&self) -> &[BlockTransaction] {
        &self.blocks
    }

    /// Captured spawn requests.
    #[must_use]
    pub fn entities(&self) -> &[EntitySpawn] {
        &self.entities
    }

    /// Captured slot transactions.
    #[must_use]
    pub fn slots(&self) -> &[SlotTransaction] {
        &self.slots
    }

    fn pending_block(&self, pos: BlockPos) -> Option<&BlockState> {
        self.blocks
            .iter()
            .find(|tx| *tx.target() == pos)
            .map(BlockTransaction::proposed)
    }

    fn pending_slot(&self, slot: &SlotRef) -> Option<&ItemStack> {
        self.slots
            .iter()
            .find(|tx| tx.target().same_cell(slot))
            .map(SlotTransaction::proposed)
    }

    /// Makes a later settled value the pending proposal for `pos`.
    pub(crate) fn rebase_block(&mut self, pos: BlockPos, value: &BlockState) -> bool {
        let Some(tx) = self.blocks.iter_mut().find(|tx| *tx.target() == pos) else {
            return false;
        };
        tx.repropose(value.clone());
        true
    }

    /// Makes a later settled value the pending proposal for `slot`'s cell.
    pub(crate) fn rebase_slot(&mut self, slot: &SlotRef, value: &ItemStack) -> bool {
        let Some(tx) = self.slots.iter_mut().find(|tx| tx.target().same_cell(slot)) else {
            return false;
        };
        tx.repropose(value.clone());
        true
    }

    // Last value wins per position; the first capture's original is kept.
    fn record_block(&mut self, pos: BlockPos, original: BlockState, proposed: BlockState) {
        if let Some(tx) = self.blocks.iter_mut().find(|tx| *tx.target() == pos) {
            tx.repropose(proposed);
        } else {
            self.blocks
                .push(BlockTransaction::new(pos, original, proposed));
        }
    }

    // Last value wins per storage cell; the first capture's original is kept.
    fn record_slot(&mut self, slot: SlotRef, original: ItemStack, proposed: ItemStack) {
        if let Some(tx) = self.slots.iter_mut().find(|tx| tx.target().same_cell(&slot)) {
            tx.repropose(proposed);
        } else {
            self.slots.push(SlotTransaction::new(slot, original, proposed));
        }
    }
}

// ============================================================================
// Tracker entry points
// ============================================================================

impl PhaseTracker {
    /// Sets a block, capturing the change if the current phase wants it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the change is applied immediately and the
    /// block store refuses it.
    ///
    /// # Panics
    ///
    /// Panics if called off the tracker's bound thread.
    #[track_caller]
    pub fn set_block(&self, pos: BlockPos, state: BlockState) -> Result<CaptureOutcome> {
        self.assert_bound();
        let blocks = &self.collaborators().blocks;
        let original = self
            .newest_pending(|captures| captures.pending_block(pos).cloned())
            .unwrap_or_else(|| blocks.block(pos));
        let Some(context_id) = self.capturing_context(CaptureKind::Block) else {
            blocks.set_block(pos, state.clone())?;
            self.rebase_pending(|captures| captures.rebase_block(pos, &state));
            self.report_unattributed(EventPayload::ChangeBlock {
                transactions: vec![BlockTransaction::new(pos, original, state)],
            });
            return Ok(CaptureOutcome::Applied);
        };

        trace!(context_id, %pos, block = %state, "captured block change");
        self.with_top_captures(|captures| captures.record_block(pos, original, state));
        metrics::record_transaction_captured(CaptureKind::Block.as_str());
        Ok(CaptureOutcome::Captured { context_id })
    }

    /// Spawns an entity, capturing the spawn if the current phase wants it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the spawn is applied immediately and the
    /// entity registry refuses it.
    ///
    /// # Panics
    ///
    /// Panics if called off the tracker's bound thread.
    #[track_caller]
    pub fn spawn_entity(&self, spawn: EntitySpawn) -> Result<CaptureOutcome> {
        self.assert_bound();
        let Some(context_id) = self.capturing_context(CaptureKind::Entity) else {
            let id = self.collaborators().entities.spawn(&spawn)?;
            self.report_unattributed(EventPayload::SpawnEntity {
                entities: vec![spawn],
            });
            return Ok(CaptureOutcome::Spawned(id));
        };

        trace!(context_id, entity_type = %spawn.entity_type, "captured entity spawn");
        self.with_top_captures(|captures| captures.entities.push(spawn));
        metrics::record_transaction_captured(CaptureKind::Entity.as_str());
        Ok(CaptureOutcome::Captured { context_id })
    }

    /// Writes a flat inventory slot, capturing the change if the current
    /// phase wants it.
    ///
    /// # Errors
    ///
    /// Returns `LensError::SlotOutOfRange` for indices outside the
    /// inventory, or `StoreError` from reading the original or applying the
    /// change immediately.
    ///
    /// # Panics
    ///
    /// Panics if called off the tracker's bound thread.
    #[track_caller]
    pub fn set_slot(
        &self,
        inventory: &Inventory,
        index: usize,
        item: ItemStack,
    ) -> Result<CaptureOutcome> {
        self.assert_bound();
        let slot = inventory.slot(index)?;
        let slots = &self.collaborators().slots;
        let pending = self.newest_pending(|captures| captures.pending_slot(&slot).cloned());
        let original = match pending {
            Some(pending) => pending,
            None => slots.item(slot.container, slot.native_index)?,
        };
        let Some(context_id) = self.capturing_context(CaptureKind::Inventory) else {
            slots.set_item(slot.container, slot.native_index, item.clone())?;
            self.rebase_pending(|captures| captures.rebase_slot(&slot, &item));
            self.report_unattributed(EventPayload::ChangeInventory {
                transactions: vec![SlotTransaction::new(slot, original, item)],
                cursor: None,
            });
            return Ok(CaptureOutcome::Applied);
        };

        trace!(
            context_id,
            slot = index,
            container = %slot.container,
            item = %item,
            "captured slot change"
        );
        self.with_top_captures(|captures| captures.record_slot(slot, original, item));
        metrics::record_transaction_captured(CaptureKind::Inventory.as_str());
        Ok(CaptureOutcome::Captured { context_id })
    }

    /// Snapshot of what the current context has captured so far.
    ///
    /// # Panics
    ///
    /// Panics if called off the tracker's bound thread.
    #[must_use]
    #[track_caller]
    pub fn pending_captures(&self) -> Option<Captures> {
        self.assert_bound();
        self.stack_top(|record| record.captures.clone())
    }

    fn capturing_context(&self, kind: CaptureKind) -> Option<u64> {
        if !self.capture_policy().allows(kind) {
            return None;
        }
        self.stack_top(|record| record.state.captures(kind).then_some(record.id))
            .flatten()
    }

    fn report_unattributed(&self, payload: EventPayload) {
        let kind = payload.kind();
        let cause = self.cause_stack().current_cause();
        debug!(
            side = self.side().as_str(),
            kind = %kind,
            cause = %cause,
            "applied unattributed change"
        );
        metrics::record_unattributed_change(kind.as_str());
        self.journal(JournalEntry::UnattributedChange {
            kind,
            side: self.side(),
            cause: cause.to_string(),
        });

        let events = &self.collaborators().events;
        if !events.should_fire(kind) {
            return;
        }
        let mut event = Event::unattributed(cause, payload);
        events.post(&mut event);
        self.note_event(None, &event);
        if event.is_cancelled() {
            warn!(kind = %kind, "ignored cancellation of an already applied change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::ContainerId;

    #[test]
    fn test_policy_table() {
        assert!(CapturePolicy::ALL.allows(CaptureKind::Entity));
        assert!(!CapturePolicy::NONE.allows(CaptureKind::Inventory));
        assert_eq!(CapturePolicy::default(), CapturePolicy::ALL);
    }

    #[test]
    fn test_last_value_wins_per_cell() {
        let mut captures = Captures::default();
        let a = SlotRef {
            ordinal: 5,
            container: ContainerId(1),
            native_index: 5,
        };
        captures.record_slot(a, ItemStack::empty(), ItemStack::new("minecraft:stone", 1));
        captures.record_slot(
            a,
            ItemStack::new("minecraft:stone", 1),
            ItemStack::new("minecraft:dirt", 2),
        );
        assert_eq!(captures.slots().len(), 1);
        let tx = &captures.slots()[0];
        assert_eq!(tx.original(), &ItemStack::empty());
        assert_eq!(tx.proposed(), &ItemStack::new("minecraft:dirt", 2));
    }

    #[test]
    fn test_distinct_blocks_kept_in_order() {
        let mut captures = Captures::default();
        captures.record_block(
            BlockPos::new(0, 0, 0),
            BlockState::air(),
            BlockState::new("minecraft:stone"),
        );
        captures.record_block(
            BlockPos::new(0, 1, 0),
            BlockState::air(),
            BlockState::new("minecraft:dirt"),
        );
        assert_eq!(captures.len(), 2);
        assert_eq!(*captures.blocks()[1].target(), BlockPos::new(0, 1, 0));
    }

    #[test]
    fn test_policy_deserializes_partial() {
        let policy: CapturePolicy = serde_yaml::from_str("entities: false").unwrap();
        assert!(policy.blocks);
        assert!(!policy.entities);
    }
}
