//! Phase states and the registry mapping units of work onto them.
//!
//! States are a closed enumeration. Everything a state decides (reentry,
//! which mutations it captures, how a unit of work is validated and how
//! captures unwind into events) comes from a static [`PhaseBehavior`] table
//! entry; no per-invocation data lives on the state itself.

use std::fmt;

use serde::Serialize;

use crate::cause::Causer;
use crate::dispatch::packet::{Packet, PlayerView};
use crate::dispatch::task::TaskInfo;
use crate::world::BlockPos;

use super::capture::{CaptureKind, CapturePolicy};
use super::context::PhaseContext;
use super::tracker::PhaseTracker;
use super::unwind::{self, UnwindFn};

// ============================================================================
// States
// ============================================================================

/// Packet handling states, one per packet family that needs its own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketState {
    /// Player position update
    Movement,
    /// Player look update without movement
    Rotation,
    /// Click inside an open container
    ClickContainer,
    /// Item use in the air
    UseItem,
    /// Attack or interact with an entity
    InteractEntity,
    /// Block placement
    PlaceBlock,
    /// Block digging
    DigBlock,
    /// Client settings
    ClientSettings,
    /// Respawn request and other client status updates
    ClientStatus,
    /// Plugin channel message
    CustomPayload,
}

/// Category of the unit of work currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "phase", content = "packet", rename_all = "snake_case")]
pub enum PhaseState {
    /// Handling an inbound packet
    Packet(PacketState),
    /// Running a scheduled task on the owning thread
    ScheduledTask,
    /// Executing a plugin-requested world mutation
    PluginApi,
    /// Ticking a block
    BlockWorker,
    /// Fallback for work with no dedicated state; captures nothing
    Unknown,
}

/// Static policy of one phase state.
#[derive(Debug, Clone, Copy)]
pub struct PhaseBehavior {
    /// Stable name used in logs, metrics and the journal
    pub name: &'static str,
    /// Whether the state may be opened while already open
    pub reentrant: bool,
    /// Which mutations are captured rather than applied immediately
    pub capture: CapturePolicy,
    /// Pre-check rejecting stale units of work
    pub validate: ValidateFn,
    /// Turns captured side effects into event payloads
    pub unwind: UnwindFn,
}

/// Returns `true` if a unit of work must not be attributed.
pub type ValidateFn = fn(&WorkUnit<'_>, &Causer) -> bool;

const fn packet_behavior(name: &'static str) -> PhaseBehavior {
    PhaseBehavior {
        name,
        reentrant: false,
        capture: CapturePolicy::ALL,
        validate: packet_invalid,
        unwind: unwind::unwind_packet,
    }
}

const MOVEMENT: PhaseBehavior = packet_behavior("packet/movement");
const ROTATION: PhaseBehavior = packet_behavior("packet/rotation");
const CLICK_CONTAINER: PhaseBehavior = PhaseBehavior {
    unwind: unwind::unwind_click,
    ..packet_behavior("packet/click_container")
};
const USE_ITEM: PhaseBehavior = packet_behavior("packet/use_item");
const INTERACT_ENTITY: PhaseBehavior = packet_behavior("packet/interact_entity");
const PLACE_BLOCK: PhaseBehavior = packet_behavior("packet/place_block");
const DIG_BLOCK: PhaseBehavior = packet_behavior("packet/dig_block");
const CLIENT_SETTINGS: PhaseBehavior = packet_behavior("packet/client_settings");
const CLIENT_STATUS: PhaseBehavior = packet_behavior("packet/client_status");
const CUSTOM_PAYLOAD: PhaseBehavior = packet_behavior("packet/custom_payload");

const SCHEDULED_TASK: PhaseBehavior = PhaseBehavior {
    name: "scheduled_task",
    reentrant: true,
    capture: CapturePolicy::ALL,
    validate: never_invalid,
    unwind: unwind::unwind_standard,
};

const PLUGIN_API: PhaseBehavior = PhaseBehavior {
    name: "plugin_api",
    reentrant: true,
    capture: CapturePolicy::ALL,
    validate: plugin_invalid,
    unwind: unwind::unwind_standard,
};

const BLOCK_WORKER: PhaseBehavior = PhaseBehavior {
    name: "block_worker",
    reentrant: false,
    capture: CapturePolicy {
        blocks: true,
        entities: true,
        inventory: false,
    },
    validate: never_invalid,
    unwind: unwind::unwind_standard,
};

const UNKNOWN: PhaseBehavior = PhaseBehavior {
    name: "unknown",
    reentrant: true,
    capture: CapturePolicy::NONE,
    validate: never_invalid,
    unwind: unwind::unwind_standard,
};

impl PhaseState {
    /// Static behavior of this state.
    #[must_use]
    pub const fn behavior(self) -> &'static PhaseBehavior {
        match self {
            Self::Packet(packet) => match packet {
                PacketState::Movement => &MOVEMENT,
                PacketState::Rotation => &ROTATION,
                PacketState::ClickContainer => &CLICK_CONTAINER,
                PacketState::UseItem => &USE_ITEM,
                PacketState::InteractEntity => &INTERACT_ENTITY,
                PacketState::PlaceBlock => &PLACE_BLOCK,
                PacketState::DigBlock => &DIG_BLOCK,
                PacketState::ClientSettings => &CLIENT_SETTINGS,
                PacketState::ClientStatus => &CLIENT_STATUS,
                PacketState::CustomPayload => &CUSTOM_PAYLOAD,
            },
            Self::ScheduledTask => &SCHEDULED_TASK,
            Self::PluginApi => &PLUGIN_API,
            Self::BlockWorker => &BLOCK_WORKER,
            Self::Unknown => &UNKNOWN,
        }
    }

    /// Stable state name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.behavior().name
    }

    /// Whether the state may be opened while already open.
    #[must_use]
    pub const fn is_reentrant(self) -> bool {
        self.behavior().reentrant
    }

    /// Whether this state captures mutations of `kind`.
    #[must_use]
    pub const fn captures(self, kind: CaptureKind) -> bool {
        self.behavior().capture.allows(kind)
    }

    /// Whether `other` belongs to the same reentry family.
    ///
    /// All packet states form one family: a packet is never handled while
    /// another one is still being handled on the same thread.
    #[must_use]
    pub const fn same_family(self, other: Self) -> bool {
        matches!(
            (self, other),
            (Self::Packet(_), Self::Packet(_))
                | (Self::ScheduledTask, Self::ScheduledTask)
                | (Self::PluginApi, Self::PluginApi)
                | (Self::BlockWorker, Self::BlockWorker)
                | (Self::Unknown, Self::Unknown)
        )
    }

    /// Whether `unit` must run without attribution.
    ///
    /// Rejection is a policy decision, not an error: the caller skips
    /// building a context and runs the unit of work unattributed.
    #[must_use]
    pub fn is_invalid(self, unit: &WorkUnit<'_>, source: &Causer) -> bool {
        (self.behavior().validate)(unit, source)
    }

    /// Starts building a context of this state on `tracker`.
    #[must_use]
    pub fn create_phase_context(self, tracker: &PhaseTracker) -> PhaseContext<'_> {
        PhaseContext::new(tracker, self)
    }

    /// Starts building a context unless `tracker` is already in this state.
    ///
    /// Returns `None` when the current phase already matches, so the caller
    /// joins it instead of nesting a duplicate.
    #[must_use]
    pub fn switch_if_necessary(self, tracker: &PhaseTracker) -> Option<PhaseContext<'_>> {
        if tracker.current_state() == Some(self) {
            None
        } else {
            Some(self.create_phase_context(tracker))
        }
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// A unit of work about to run, as seen by the validity pre-check.
#[derive(Debug, Clone, Copy)]
pub enum WorkUnit<'a> {
    /// An inbound packet and the player who sent it
    Packet {
        /// The packet
        packet: &'a Packet,
        /// Sender
        sender: &'a PlayerView,
    },
    /// A scheduled task drained on the owning thread
    Task(&'a TaskInfo),
    /// A plugin API call
    PluginCall {
        /// Calling plugin id
        plugin: &'a str,
    },
    /// A block tick
    BlockTick {
        /// Ticking block
        pos: BlockPos,
    },
}

/// State handling `packet`; [`PhaseState::Unknown`] for packets without one.
#[must_use]
pub const fn state_for_packet(packet: &Packet) -> PhaseState {
    let packet_state = match packet {
        Packet::Move { .. } => PacketState::Movement,
        Packet::Rotate { .. } => PacketState::Rotation,
        Packet::ClickContainer { .. } => PacketState::ClickContainer,
        Packet::UseItem => PacketState::UseItem,
        Packet::InteractEntity { .. } => PacketState::InteractEntity,
        Packet::PlaceBlock { .. } => PacketState::PlaceBlock,
        Packet::DigBlock { .. } => PacketState::DigBlock,
        Packet::ClientSettings { .. } => PacketState::ClientSettings,
        Packet::ClientStatus { .. } => PacketState::ClientStatus,
        Packet::CustomPayload { .. } => PacketState::CustomPayload,
        Packet::Chat { .. } => return PhaseState::Unknown,
    };
    PhaseState::Packet(packet_state)
}

/// State running a scheduled task.
#[must_use]
pub const fn state_for_task(_task: &TaskInfo) -> PhaseState {
    PhaseState::ScheduledTask
}

fn packet_invalid(unit: &WorkUnit<'_>, source: &Causer) -> bool {
    match unit {
        WorkUnit::Packet { sender, .. } => {
            !sender.connected || source.player_id() != Some(sender.id)
        }
        _ => false,
    }
}

fn plugin_invalid(unit: &WorkUnit<'_>, _source: &Causer) -> bool {
    matches!(unit, WorkUnit::PluginCall { plugin } if plugin.is_empty())
}

const fn never_invalid(_unit: &WorkUnit<'_>, _source: &Causer) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{PlayerId, Vector3};

    fn sender(connected: bool) -> PlayerView {
        PlayerView::new(PlayerId::random(), "alex").connected(connected)
    }

    #[test]
    fn test_packet_registry() {
        assert_eq!(
            state_for_packet(&Packet::ClickContainer { slot: 3 }),
            PhaseState::Packet(PacketState::ClickContainer)
        );
        assert_eq!(
            state_for_packet(&Packet::Move {
                to: Vector3::default()
            }),
            PhaseState::Packet(PacketState::Movement)
        );
        assert_eq!(
            state_for_packet(&Packet::Chat {
                message: "hi".to_string()
            }),
            PhaseState::Unknown
        );
    }

    #[test]
    fn test_task_registry() {
        let task = TaskInfo::new(1, "autosave");
        assert_eq!(state_for_task(&task), PhaseState::ScheduledTask);
    }

    #[test]
    fn test_reentry_table() {
        assert!(!PhaseState::Packet(PacketState::UseItem).is_reentrant());
        assert!(!PhaseState::BlockWorker.is_reentrant());
        assert!(PhaseState::PluginApi.is_reentrant());
        assert!(PhaseState::ScheduledTask.is_reentrant());
        assert!(PhaseState::Unknown.is_reentrant());
    }

    #[test]
    fn test_capture_table() {
        assert!(PhaseState::Packet(PacketState::ClickContainer).captures(CaptureKind::Inventory));
        assert!(PhaseState::BlockWorker.captures(CaptureKind::Block));
        assert!(!PhaseState::BlockWorker.captures(CaptureKind::Inventory));
        assert!(!PhaseState::Unknown.captures(CaptureKind::Block));
    }

    #[test]
    fn test_packet_families() {
        let click = PhaseState::Packet(PacketState::ClickContainer);
        let dig = PhaseState::Packet(PacketState::DigBlock);
        assert!(click.same_family(dig));
        assert!(!click.same_family(PhaseState::PluginApi));
    }

    #[test]
    fn test_disconnected_sender_invalid() {
        let packet = Packet::UseItem;
        let state = state_for_packet(&packet);
        let online = sender(true);
        let offline = sender(false);
        let online_cause = Causer::player(online.id, "alex");
        let offline_cause = Causer::player(offline.id, "alex");

        assert!(!state.is_invalid(
            &WorkUnit::Packet {
                packet: &packet,
                sender: &online
            },
            &online_cause
        ));
        assert!(state.is_invalid(
            &WorkUnit::Packet {
                packet: &packet,
                sender: &offline
            },
            &offline_cause
        ));
    }

    #[test]
    fn test_mismatched_source_invalid() {
        let packet = Packet::UseItem;
        let online = sender(true);
        assert!(state_for_packet(&packet).is_invalid(
            &WorkUnit::Packet {
                packet: &packet,
                sender: &online
            },
            &Causer::Server
        ));
    }

    #[test]
    fn test_empty_plugin_invalid() {
        let state = PhaseState::PluginApi;
        assert!(state.is_invalid(&WorkUnit::PluginCall { plugin: "" }, &Causer::Server));
        assert!(!state.is_invalid(
            &WorkUnit::PluginCall { plugin: "warps" },
            &Causer::plugin("warps")
        ));
    }

    #[test]
    fn test_names() {
        assert_eq!(PhaseState::BlockWorker.to_string(), "block_worker");
        assert_eq!(
            PhaseState::Packet(PacketState::DigBlock).name(),
            "packet/dig_block"
        );
    }
}
