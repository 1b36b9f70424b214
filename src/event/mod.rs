//! Attribution events.
//!
//! Every batch of captured side effects is reported to the event bus as one
//! [`Event`] carrying the cause snapshot taken at unwind time. Listeners
//! veto the whole batch with [`Event::cancel`], or decide on individual
//! changes: custom values and invalidation on transactions, spawn removal,
//! new move and rotate targets. Settlement reads only those decisions back;
//! the captured transactions stay authoritative for targets and originals.

pub mod bus;

use std::fmt;

use serde::Serialize;

use crate::cause::Cause;
use crate::transaction::{BlockTransaction, CursorTransaction, SlotTransaction, Transaction};
use crate::world::{EntityId, EntitySpawn, Rotation, Vector3};

pub use bus::{EventBus, Listener, ListenerBus};

/// Kinds of attribution events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Block states changed
    ChangeBlock,
    /// Entities are about to spawn
    SpawnEntity,
    /// Inventory slots changed
    ChangeInventory,
    /// An entity is moving
    MoveEntity,
    /// An entity is turning
    RotateEntity,
}

impl EventKind {
    /// Snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChangeBlock => "change_block",
            Self::SpawnEntity => "spawn_entity",
            Self::ChangeInventory => "change_inventory",
            Self::MoveEntity => "move_entity",
            Self::RotateEntity => "rotate_entity",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an event reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// Captured block changes, in capture order
    ChangeBlock {
        /// Block transactions
        transactions: Vec<BlockTransaction>,
    },
    /// Captured spawn requests; listeners may remove entries
    SpawnEntity {
        /// Entities to spawn
        entities: Vec<EntitySpawn>,
    },
    /// Captured slot changes and the acting player's cursor
    ChangeInventory {
        /// Slot transactions
        transactions: Vec<SlotTransaction>,
        /// Cursor change, for packet phases
        cursor: Option<CursorTransaction>,
    },
    /// An entity moving; listeners may change the destination
    MoveEntity {
        /// Moving entity
        entity: EntityId,
        /// Current position
        from: Vector3,
        /// Destination
        to: Vector3,
    },
    /// An entity turning; listeners may change the target rotation
    RotateEntity {
        /// Turning entity
        entity: EntityId,
        /// Current rotation
        from: Rotation,
        /// Target rotation
        to: Rotation,
    },
}

impl EventPayload {
    /// Kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ChangeBlock { .. } => EventKind::ChangeBlock,
            Self::SpawnEntity { .. } => EventKind::SpawnEntity,
            Self::ChangeInventory { .. } => EventKind::ChangeInventory,
            Self::MoveEntity { .. } => EventKind::MoveEntity,
            Self::RotateEntity { .. } => EventKind::RotateEntity,
        }
    }

    /// Copies listener verdicts from `answered` onto this captured batch.
    ///
    /// Only per-change decisions carry over: custom values and validity of
    /// transactions that still describe the captured change, spawn removals,
    /// and new move or rotate targets. Returns how many listener edits did
    /// not match a captured change and were dropped.
    pub(crate) fn adopt_verdicts(&mut self, answered: &Self) -> usize {
        match (self, answered) {
            (
                Self::ChangeBlock { transactions },
                Self::ChangeBlock {
                    transactions: theirs,
                },
            ) => adopt_all(transactions, theirs),
            (
                Self::ChangeInventory {
                    transactions,
                    cursor,
                },
                Self::ChangeInventory {
                    transactions: theirs,
                    cursor: their_cursor,
                },
            ) => {
                let cursor_dropped = match (cursor, their_cursor) {
                    (Some(mine), Some(theirs)) => !mine.adopt_verdict(theirs),
                    (None, None) => false,
                    _ => true,
                };
                adopt_all(transactions, theirs) + usize::from(cursor_dropped)
            }
            (Self::SpawnEntity { entities }, Self::SpawnEntity { entities: kept }) => {
                let mut kept = kept.iter().peekable();
                entities.retain(|spawn| {
                    if kept.peek() == Some(&spawn) {
                        kept.next();
                        true
                    } else {
                        false
                    }
                });
                kept.count()
            }
            (Self::MoveEntity { to, .. }, Self::MoveEntity { to: theirs, .. }) => {
                *to = *theirs;
                0
            }
            (Self::RotateEntity { to, .. }, Self::RotateEntity { to: theirs, .. }) => {
                *to = *theirs;
                0
            }
            _ => 1,
        }
    }

    /// Number of changes carried.
    #[must_use]
    pub fn change_count(&self) -> usize {
        match self {
            Self::ChangeBlock { transactions } => transactions.len(),
            Self::SpawnEntity { entities } => entities.len(),
            Self::ChangeInventory {
                transactions,
                cursor,
            } => transactions.len() + usize::from(cursor.is_some()),
            Self::MoveEntity { .. } | Self::RotateEntity { .. } => 1,
        }
    }
}

fn adopt_all<K, V>(mine: &mut [Transaction<K, V>], theirs: &[Transaction<K, V>]) -> usize
where
    K: PartialEq,
    V: PartialEq + Clone,
{
    let unmatched = mine.len().abs_diff(theirs.len());
    let rejected = mine
        .iter_mut()
        .zip(theirs)
        .map(|(mine, theirs)| mine.adopt_verdict(theirs))
        .filter(|adopted| !adopted)
        .count();
    rejected + unmatched
}

/// An attribution event on its way through the bus.
#[derive(Debug, Clone)]
pub struct Event {
    cause: Cause,
    payload: EventPayload,
    revertible: bool,
    cancelled: bool,
}

impl Event {
    /// Event over changes that are still pending.
    #[must_use]
    pub const fn new(cause: Cause, payload: EventPayload) -> Self {
        Self {
            cause,
            payload,
            revertible: true,
            cancelled: false,
        }
    }

    /// Event over changes that were already applied.
    ///
    /// Cancelling it has no effect on the world.
    #[must_use]
    pub const fn unattributed(cause: Cause, payload: EventPayload) -> Self {
        Self {
            cause,
            payload,
            revertible: false,
            cancelled: false,
        }
    }

    /// Cause snapshot taken when the event was built.
    #[must_use]
    pub const fn cause(&self) -> &Cause {
        &self.cause
    }

    /// Event payload.
    #[must_use]
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Captured block transactions, open to custom values and invalidation.
    ///
    /// Empty for other payload kinds.
    pub fn block_transactions_mut(&mut self) -> &mut [BlockTransaction] {
        match &mut self.payload {
            EventPayload::ChangeBlock { transactions } => transactions,
            _ => &mut [],
        }
    }

    /// Captured slot transactions, open to custom values and invalidation.
    ///
    /// Empty for other payload kinds.
    pub fn slot_transactions_mut(&mut self) -> &mut [SlotTransaction] {
        match &mut self.payload {
            EventPayload::ChangeInventory { transactions, .. } => transactions,
            _ => &mut [],
        }
    }

    /// The acting player's cursor change, if the batch carries one.
    pub fn cursor_mut(&mut self) -> Option<&mut CursorTransaction> {
        match &mut self.payload {
            EventPayload::ChangeInventory { cursor, .. } => cursor.as_mut(),
            _ => None,
        }
    }

    /// Drops pending spawns for which `keep` returns false.
    pub fn retain_entities(&mut self, keep: impl FnMut(&EntitySpawn) -> bool) {
        if let EventPayload::SpawnEntity { entities } = &mut self.payload {
            entities.retain(keep);
        }
    }

    /// Redirects a move. Returns false for other payload kinds.
    pub fn set_destination(&mut self, destination: Vector3) -> bool {
        if let EventPayload::MoveEntity { to, .. } = &mut self.payload {
            *to = destination;
            true
        } else {
            false
        }
    }

    /// Replaces a rotation target. Returns false for other payload kinds.
    pub fn set_target_rotation(&mut self, rotation: Rotation) -> bool {
        if let EventPayload::RotateEntity { to, .. } = &mut self.payload {
            *to = rotation;
            true
        } else {
            false
        }
    }

    /// Event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Whether cancelling this event reverts anything.
    #[must_use]
    pub const fn is_revertible(&self) -> bool {
        self.revertible
    }

    /// Vetoes the whole batch.
    pub const fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Sets the cancel flag.
    pub const fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    /// Whether a listener cancelled the event.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
