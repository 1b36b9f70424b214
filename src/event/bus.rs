//! Event bus seam and a listener-list implementation.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use super::{Event, EventKind};

/// Receives attribution events and hands back the listeners' verdict.
///
/// `post` runs synchronously on the simulation thread; the verdict is
/// whatever state the event is left in when `post` returns.
pub trait EventBus: Send + Sync {
    /// Whether anyone listens for `kind`. Unwind skips building events
    /// nobody listens to and applies the batch as captured.
    fn should_fire(&self, kind: EventKind) -> bool;

    /// Delivers `event` to every listener of its kind.
    fn post(&self, event: &mut Event);
}

/// Event listener callback.
pub type Listener = Arc<dyn Fn(&mut Event) + Send + Sync>;

/// Bus that calls registered closures in registration order.
#[derive(Default)]
pub struct ListenerBus {
    listeners: DashMap<EventKind, Vec<Listener>>,
}

impl ListenerBus {
    /// Creates a bus without listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for `kind`.
    pub fn register<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&mut Event) + Send + Sync + 'static,
    {
        self.listeners
            .entry(kind)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, |l| l.len())
    }
}

impl EventBus for ListenerBus {
    fn should_fire(&self, kind: EventKind) -> bool {
        self.listener_count(kind) > 0
    }

    fn post(&self, event: &mut Event) {
        // Cloned out so listeners may register further listeners.
        let listeners: Vec<Listener> = self
            .listeners
            .get(&event.kind())
            .map(|l| l.value().clone())
            .unwrap_or_default();
        trace!(kind = %event.kind(), listeners = listeners.len(), "posting event");
        for listener in &listeners {
            listener(event);
        }
    }
}

impl fmt::Debug for ListenerBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBus")
            .field("kinds", &self.listeners.len())
            .finish()
    }
}
