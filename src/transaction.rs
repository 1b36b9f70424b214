//! Captured value transactions.
//!
//! A transaction records one pending change: the value a target had when
//! the change was captured, the value the change proposes, and whatever an
//! event listener decided about it. Settlement picks the value that ends up
//! in the backing store.

use serde::Serialize;

use crate::inventory::{ItemStack, SlotRef};
use crate::world::{BlockPos, BlockState, PlayerId};

/// One captured change of `target` from `original` to `proposed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction<K, V> {
    target: K,
    original: V,
    proposed: V,
    custom: Option<V>,
    valid: bool,
}

/// Captured inventory slot change.
pub type SlotTransaction = Transaction<SlotRef, ItemStack>;

/// Captured block change.
pub type BlockTransaction = Transaction<BlockPos, BlockState>;

/// Captured change of the item carried on a player's cursor.
pub type CursorTransaction = Transaction<PlayerId, ItemStack>;

impl<K, V> Transaction<K, V> {
    /// Creates a valid transaction without a custom value.
    #[must_use]
    pub const fn new(target: K, original: V, proposed: V) -> Self {
        Self {
            target,
            original,
            proposed,
            custom: None,
            valid: true,
        }
    }

    /// What the transaction changes.
    #[must_use]
    pub const fn target(&self) -> &K {
        &self.target
    }

    /// Value at capture time.
    #[must_use]
    pub const fn original(&self) -> &V {
        &self.original
    }

    /// Value the change proposes.
    #[must_use]
    pub const fn proposed(&self) -> &V {
        &self.proposed
    }

    /// Listener-supplied replacement for the proposed value.
    #[must_use]
    pub const fn custom(&self) -> Option<&V> {
        self.custom.as_ref()
    }

    /// Whether the change should be kept.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Replaces the value applied when the change is kept.
    pub fn set_custom(&mut self, value: V) {
        self.custom = Some(value);
    }

    /// Drops a previously set custom value.
    pub fn clear_custom(&mut self) {
        self.custom = None;
    }

    /// Marks this single change as rejected; it settles to the original.
    pub const fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Value applied when the change is kept: custom if set, else proposed.
    #[must_use]
    pub fn final_value(&self) -> &V {
        self.custom.as_ref().unwrap_or(&self.proposed)
    }

    /// Value the target ends up with once the owning batch is settled.
    ///
    /// Cancelled batches and invalid transactions restore the original.
    #[must_use]
    pub fn settled_value(&self, cancelled: bool) -> &V {
        if cancelled || !self.valid {
            &self.original
        } else {
            self.final_value()
        }
    }

    /// Replaces the proposed value, keeping the original of the first capture.
    pub(crate) fn repropose(&mut self, proposed: V) {
        self.proposed = proposed;
    }
}

impl<K: PartialEq, V: PartialEq + Clone> Transaction<K, V> {
    /// Takes over `answered`'s custom value and validity if it still
    /// describes this change; returns false and leaves `self` alone if not.
    pub(crate) fn adopt_verdict(&mut self, answered: &Self) -> bool {
        if self.target != answered.target
            || self.original != answered.original
            || self.proposed != answered.proposed
        {
            return false;
        }
        self.custom.clone_from(&answered.custom);
        self.valid = answered.valid;
        true
    }
}

/// Whether a non-empty batch has no valid transaction left.
#[must_use]
pub fn all_invalid<K, V>(transactions: &[Transaction<K, V>]) -> bool {
    !transactions.is_empty() && transactions.iter().all(|t| !t.is_valid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::ContainerId;

    fn slot(native_index: usize) -> SlotRef {
        SlotRef {
            ordinal: native_index,
            container: ContainerId(1),
            native_index,
        }
    }

    fn sword() -> ItemStack {
        ItemStack::new("minecraft:diamond_sword", 1)
    }

    #[test]
    fn test_kept_change_settles_to_proposed() {
        let tx = SlotTransaction::new(slot(5), ItemStack::empty(), sword());
        assert_eq!(tx.settled_value(false), &sword());
    }

    #[test]
    fn test_cancelled_change_settles_to_original() {
        let tx = SlotTransaction::new(slot(5), ItemStack::empty(), sword());
        assert_eq!(tx.settled_value(true), &ItemStack::empty());
    }

    #[test]
    fn test_custom_value_wins_when_kept() {
        let mut tx = SlotTransaction::new(slot(5), ItemStack::empty(), sword());
        tx.set_custom(ItemStack::new("minecraft:stick", 1));
        assert_eq!(tx.settled_value(false), &ItemStack::new("minecraft:stick", 1));
        assert_eq!(tx.settled_value(true), &ItemStack::empty());
        tx.clear_custom();
        assert_eq!(tx.final_value(), &sword());
    }

    #[test]
    fn test_invalid_change_settles_to_original() {
        let mut tx = BlockTransaction::new(
            BlockPos::new(0, 0, 0),
            BlockState::air(),
            BlockState::new("minecraft:stone"),
        );
        tx.invalidate();
        assert_eq!(tx.settled_value(false), &BlockState::air());
    }

    #[test]
    fn test_verdict_needs_matching_change() {
        let mut captured = SlotTransaction::new(slot(5), ItemStack::empty(), sword());
        let mut answered = captured.clone();
        answered.set_custom(ItemStack::new("minecraft:stick", 1));
        assert!(captured.adopt_verdict(&answered));
        assert_eq!(captured.final_value(), &ItemStack::new("minecraft:stick", 1));

        let mut moved = SlotTransaction::new(slot(7), ItemStack::empty(), sword());
        moved.invalidate();
        assert!(!captured.adopt_verdict(&moved));
        assert!(captured.is_valid());
    }

    #[test]
    fn test_all_invalid() {
        let empty: Vec<SlotTransaction> = Vec::new();
        assert!(!all_invalid(&empty));

        let mut a = SlotTransaction::new(slot(1), ItemStack::empty(), sword());
        let mut b = SlotTransaction::new(slot(2), ItemStack::empty(), sword());
        a.invalidate();
        assert!(!all_invalid(&[a.clone(), b.clone()]));
        b.invalidate();
        assert!(all_invalid(&[a, b]));
    }
}
