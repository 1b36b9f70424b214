//! Inbound packet driver.

use serde::Serialize;
use tracing::debug;

use crate::cause::Causer;
use crate::error::Result;
use crate::inventory::Inventory;
use crate::observability::metrics;
use crate::phase::{PhaseTracker, TrackerSide, UnwindReport, WorkUnit, state_for_packet};
use crate::world::{BlockPos, EntityId, PlayerId, Rotation, Vector3};

/// Inbound packets the driver knows how to attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "packet", rename_all = "snake_case")]
pub enum Packet {
    /// Position update
    Move {
        /// Reported position
        to: Vector3,
    },
    /// Look update without movement
    Rotate {
        /// Reported rotation
        rotation: Rotation,
    },
    /// Click on a flat slot of the open container
    ClickContainer {
        /// Clicked flat slot index
        slot: usize,
    },
    /// Use of the held item
    UseItem,
    /// Attack or interact with an entity
    InteractEntity {
        /// Target entity
        target: EntityId,
    },
    /// Block placement against `pos`
    PlaceBlock {
        /// Target position
        pos: BlockPos,
    },
    /// Digging at `pos`
    DigBlock {
        /// Target position
        pos: BlockPos,
    },
    /// Client settings
    ClientSettings {
        /// Requested view distance
        view_distance: u8,
    },
    /// Client status; `respawn` requests a respawn
    ClientStatus {
        /// Whether this is a respawn request
        respawn: bool,
    },
    /// Plugin channel message
    CustomPayload {
        /// Channel name
        channel: String,
    },
    /// Chat message
    Chat {
        /// Message text
        message: String,
    },
}

impl Packet {
    /// Whether a dead player's packet is still processed.
    #[must_use]
    pub const fn allowed_while_dead(&self) -> bool {
        matches!(
            self,
            Self::CustomPayload { .. } | Self::ClientStatus { respawn: true }
        )
    }
}

/// What the driver knows about the sending player.
#[derive(Debug, Clone)]
pub struct PlayerView {
    /// Player id
    pub id: PlayerId,
    /// Player name
    pub name: String,
    /// Whether the connection is still open
    pub connected: bool,
    /// Whether the player is alive
    pub alive: bool,
    /// Current position
    pub position: Vector3,
    /// Container the player has open
    pub open_container: Option<Inventory>,
}

impl PlayerView {
    /// A connected, living player at the origin with nothing open.
    #[must_use]
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            connected: true,
            alive: true,
            position: Vector3::default(),
            open_container: None,
        }
    }

    /// Sets the connection state.
    #[must_use]
    pub const fn connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    /// Sets whether the player is alive.
    #[must_use]
    pub const fn alive(mut self, alive: bool) -> Self {
        self.alive = alive;
        self
    }

    /// Sets the current position.
    #[must_use]
    pub const fn at(mut self, position: Vector3) -> Self {
        self.position = position;
        self
    }

    /// Sets the open container.
    #[must_use]
    pub fn with_container(mut self, inventory: Inventory) -> Self {
        self.open_container = Some(inventory);
        self
    }

    /// The player as a causer.
    #[must_use]
    pub fn causer(&self) -> Causer {
        Causer::player(self.id, self.name.clone())
    }
}

/// How a packet was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Not processed at all
    Dropped,
    /// Processed without a phase
    Direct,
    /// Rejected by the state's pre-check and processed without attribution
    Unattributed,
    /// Processed inside a packet phase
    Tracked(UnwindReport),
}

/// Runs `handler` for `packet` inside the phase the packet calls for.
///
/// Client trackers run the handler directly. A dead player's packets are
/// dropped unless they are plugin channel messages or respawn requests.
/// Everything else runs inside a cause frame holding the player; movement
/// that goes nowhere, pure rotation and client settings stop there and run
/// without a phase. Packets failing the state's pre-check run without
/// attribution. The rest run inside a context whose source, creator and
/// notifier are the player and that remembers the player's cursor and
/// open container.
///
/// # Errors
///
/// Returns whatever the handler returns, after the context has closed, or
/// any error from opening or closing the context.
///
/// # Panics
///
/// Panics if called off the tracker's bound thread.
pub fn process_packet<F>(
    tracker: &PhaseTracker,
    player: &PlayerView,
    packet: &Packet,
    handler: F,
) -> Result<PacketOutcome>
where
    F: FnOnce(&PhaseTracker) -> Result<()>,
{
    if tracker.side() == TrackerSide::Client {
        handler(tracker)?;
        return Ok(PacketOutcome::Direct);
    }

    if !player.alive && !packet.allowed_while_dead() {
        debug!(player = %player.name, ?packet, "dropped packet from dead player");
        metrics::record_packet_dropped("dead_player");
        return Ok(PacketOutcome::Dropped);
    }

    let source = player.causer();
    let frame = tracker.cause_stack().push_cause_frame();
    frame.push_cause(source.clone())?;

    let unmoved = match packet {
        Packet::Move { to } => *to == player.position,
        Packet::Rotate { .. } | Packet::ClientSettings { .. } => true,
        _ => false,
    };
    if unmoved {
        handler(tracker)?;
        return Ok(PacketOutcome::Direct);
    }

    let state = state_for_packet(packet);
    let unit = WorkUnit::Packet {
        packet,
        sender: player,
    };
    if state.is_invalid(&unit, &source) {
        debug!(
            player = %player.name,
            state = state.name(),
            connected = player.connected,
            "packet fails pre-check, running unattributed"
        );
        handler(tracker)?;
        return Ok(PacketOutcome::Unattributed);
    }

    let cursor = tracker.collaborators().slots.cursor(player.id);
    let mut ctx = state
        .create_phase_context(tracker)
        .source(source.clone())
        .packet_player(player.id)
        .cursor(cursor)
        .creator(source.clone())
        .notifier(source);
    if let Some(inventory) = &player.open_container {
        ctx = ctx.container(inventory.clone());
    }
    if let Packet::ClickContainer { slot } = packet {
        ctx = ctx.clicked_slot(*slot);
    }
    ctx.build_and_switch()?;

    let handled = handler(tracker);
    let report = ctx.close()?;
    handled?;
    drop(frame);
    Ok(PacketOutcome::Tracked(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_player_filter() {
        assert!(Packet::CustomPayload {
            channel: "bungee".to_string()
        }
        .allowed_while_dead());
        assert!(Packet::ClientStatus { respawn: true }.allowed_while_dead());
        assert!(!Packet::ClientStatus { respawn: false }.allowed_while_dead());
        assert!(!Packet::UseItem.allowed_while_dead());
    }

    #[test]
    fn test_player_view_builder() {
        let id = PlayerId::random();
        let view = PlayerView::new(id, "alex")
            .alive(false)
            .at(Vector3::new(1.0, 64.0, 1.0));
        assert!(!view.alive);
        assert!(view.connected);
        assert_eq!(view.causer(), Causer::player(id, "alex"));
    }
}
