//! Shared integration-test fixtures: an in-memory world, a listener bus that
//! records every posted event, and a tracker bound to the test thread.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use phase_tracker::cause::Cause;
use phase_tracker::config::TrackerConfig;
use phase_tracker::dispatch::PlayerView;
use phase_tracker::event::{Event, EventBus, EventKind, EventPayload, ListenerBus};
use phase_tracker::inventory::{Inventory, ItemStack, LensRegistry, ShapeDescriptor};
use phase_tracker::phase::{PhaseTracker, TrackerSide};
use phase_tracker::world::{Collaborators, MemoryWorld, PlayerId, SlotStorage, Vector3};

/// What a listener saw when an event was posted.
#[derive(Debug, Clone)]
pub struct Seen {
    pub kind: EventKind,
    pub cause: Cause,
    pub payload: EventPayload,
}

/// A tracker wired to an in-memory world.
pub struct Harness {
    pub world: Arc<MemoryWorld>,
    pub bus: Arc<ListenerBus>,
    pub tracker: PhaseTracker,
    pub seen: Arc<Mutex<Vec<Seen>>>,
}

impl Harness {
    /// Server-side harness bound to the current thread.
    pub fn server() -> Self {
        Self::with_config(TrackerSide::Server, &TrackerConfig::default())
    }

    /// Harness with an explicit side and configuration.
    pub fn with_config(side: TrackerSide, config: &TrackerConfig) -> Self {
        let world = Arc::new(MemoryWorld::new());
        let bus = Arc::new(ListenerBus::new());
        let collaborators = Collaborators::in_memory(&world, Arc::clone(&bus) as Arc<dyn EventBus>);
        let tracker = PhaseTracker::new(side, config, collaborators);
        tracker.bind_current_thread().unwrap();
        Self {
            world,
            bus,
            tracker,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Records every event of `kind`, then applies `verdict`.
    pub fn listen<F>(&self, kind: EventKind, verdict: F)
    where
        F: Fn(&mut Event) + Send + Sync + 'static,
    {
        let seen = Arc::clone(&self.seen);
        self.bus.register(kind, move |event| {
            seen.lock().unwrap().push(Seen {
                kind: event.kind(),
                cause: event.cause().clone(),
                payload: event.payload().clone(),
            });
            verdict(event);
        });
    }

    /// Records every event of `kind` and lets it pass.
    pub fn observe(&self, kind: EventKind) {
        self.listen(kind, |_| {});
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    /// Opens a 27-slot chest backed by one fresh container.
    pub fn chest(&self) -> Inventory {
        let container = self.world.add_container(27);
        Inventory::open(
            &LensRegistry::new(),
            &ShapeDescriptor::slots("minecraft:chest", 27),
            vec![container],
        )
        .unwrap()
    }

    /// Reads a flat slot straight from the store.
    pub fn slot(&self, inventory: &Inventory, index: usize) -> ItemStack {
        let slot = inventory.slot(index).unwrap();
        self.world.item(slot.container, slot.native_index).unwrap()
    }

    /// A connected, living player standing at the origin.
    pub fn player(&self, name: &str) -> PlayerView {
        PlayerView::new(PlayerId::random(), name).at(Vector3::new(0.0, 64.0, 0.0))
    }
}

pub fn sword() -> ItemStack {
    ItemStack::new("minecraft:diamond_sword", 1)
}

pub fn stick() -> ItemStack {
    ItemStack::new("minecraft:stick", 1)
}
