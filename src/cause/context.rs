//! Typed event context keys and the values bound to them.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::inventory::ItemStack;
use crate::world::PlayerId;

/// A typed key into the event context.
///
/// Keys are identified by name; the type parameter fixes the value type
/// that can be bound to and read from the key.
pub struct ContextKey<T> {
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// Declares a key.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _value: PhantomData,
        }
    }

    /// Key name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({})", self.name)
    }
}

/// How an entity movement came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Moved by a command
    Command,
    /// Moved by its own controls
    Natural,
    /// Moved by a plugin
    Plugin,
    /// Moved through a portal
    Portal,
}

/// Well-known context keys.
pub mod keys {
    use super::{ContextKey, ItemStack, MovementType, PlayerId};
    use crate::cause::Causer;

    /// Why an entity is moving.
    pub const MOVEMENT_TYPE: ContextKey<MovementType> = ContextKey::new("movement_type");
    /// Item in use when the change happened.
    pub const USED_ITEM: ContextKey<ItemStack> = ContextKey::new("used_item");
    /// Player whose packet is being handled.
    pub const PACKET_PLAYER: ContextKey<PlayerId> = ContextKey::new("packet_player");
    /// Whoever owns what the change produces.
    pub const CREATOR: ContextKey<Causer> = ContextKey::new("creator");
    /// Whoever gets notified about the change.
    pub const NOTIFIER: ContextKey<Causer> = ContextKey::new("notifier");
    /// Plugin that asked for the change.
    pub const PLUGIN: ContextKey<String> = ContextKey::new("plugin");
}

/// One bound context value, type-erased.
#[derive(Clone)]
pub(crate) struct ContextEntry {
    value: Arc<dyn Any + Send + Sync>,
    rendered: String,
}

impl ContextEntry {
    pub(crate) fn new<T: Any + fmt::Debug + Send + Sync>(value: T) -> Self {
        let rendered = format!("{value:?}");
        Self {
            value: Arc::new(value),
            rendered,
        }
    }

    fn get<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

/// Immutable view of context bindings, innermost binding per key.
#[derive(Clone, Default)]
pub struct EventContext {
    entries: IndexMap<&'static str, ContextEntry>,
}

impl EventContext {
    pub(crate) fn insert(&mut self, key: &'static str, entry: ContextEntry) {
        self.entries.insert(key, entry);
    }

    /// Reads the value bound to `key`.
    #[must_use]
    pub fn get<T: Any>(&self, key: &ContextKey<T>) -> Option<&T> {
        self.entries.get(key.name()).and_then(ContextEntry::get::<T>)
    }

    /// Whether anything is bound to `key`.
    #[must_use]
    pub fn contains<T>(&self, key: &ContextKey<T>) -> bool {
        self.entries.contains_key(key.name())
    }

    /// Number of bound keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bound key names in binding order.
    pub fn key_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

impl fmt::Debug for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, &v.rendered)))
            .finish()
    }
}

impl PartialEq for EventContext {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va.rendered == vb.rendered)
    }
}
