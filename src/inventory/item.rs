//! Item stacks as immutable slot values.

use std::fmt;

use serde::Serialize;

/// An item stack snapshot.
///
/// Stacks are plain values: capturing one copies it, so a captured original
/// cannot change underneath a pending transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ItemStack {
    /// Item type identifier, e.g. `"minecraft:diamond_sword"`
    pub item: String,
    /// Stack size
    pub quantity: u32,
}

impl ItemStack {
    /// Creates a stack of `quantity` items.
    #[must_use]
    pub fn new(item: impl Into<String>, quantity: u32) -> Self {
        Self {
            item: item.into(),
            quantity,
        }
    }

    /// The empty stack.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            item: String::new(),
            quantity: 0,
        }
    }

    /// Whether this stack holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quantity == 0 || self.item.is_empty()
    }
}

impl Default for ItemStack {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for ItemStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("<empty>")
        } else {
            write!(f, "{}x{}", self.quantity, self.item)
        }
    }
}
