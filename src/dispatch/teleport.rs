//! The teleport command.

use tracing::debug;

use crate::cause::{Causer, MovementType, keys};
use crate::error::Result;
use crate::event::{Event, EventKind, EventPayload};
use crate::phase::PhaseTracker;
use crate::world::{EntityId, Rotation, Vector3};

/// A teleport issued by a command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeleportRequest {
    /// Entity to move
    pub entity: EntityId,
    /// Destination
    pub destination: Vector3,
    /// New facing; `None` keeps the current one
    pub rotation: Option<Rotation>,
}

/// Where a teleport left the entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TeleportOutcome {
    /// A listener cancelled the move; nothing changed
    Cancelled,
    /// The entity now has this pose
    Teleported {
        /// Final position
        position: Vector3,
        /// Final rotation
        rotation: Rotation,
    },
}

/// Wraps an angle into `[-180, 180)`.
#[must_use]
pub fn wrap_degrees(degrees: f32) -> f32 {
    let wrapped = degrees % 360.0;
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else if wrapped < -180.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

/// Teleports an entity on behalf of `source`.
///
/// Runs inside a cause frame marking the movement as command-driven. A
/// move event lets listeners cancel the teleport or change its
/// destination. A rotate event is fired when a rotation was requested;
/// cancelling it keeps the current facing. Non-player rotations are
/// normalized: yaw wrapped to `[-180, 180)`, pitch clamped to `[-90, 90]`.
///
/// # Errors
///
/// Returns `UsageError::EmptyCause` for a source without identity, or
/// `StoreError` if the entity is unknown or cannot be moved.
///
/// # Panics
///
/// Panics if called off the tracker's bound thread.
pub fn teleport(
    tracker: &PhaseTracker,
    source: &Causer,
    request: TeleportRequest,
) -> Result<TeleportOutcome> {
    let causes = tracker.cause_stack();
    let frame = causes.push_cause_frame();
    frame.push_cause(source.clone())?;
    frame.add_context(keys::MOVEMENT_TYPE, MovementType::Command);

    let collaborators = tracker.collaborators();
    let pose = collaborators.entities.pose(request.entity)?;
    let context_id = tracker.current_context_id();

    let mut destination = request.destination;
    if collaborators.events.should_fire(EventKind::MoveEntity) {
        let mut event = Event::new(
            causes.current_cause(),
            EventPayload::MoveEntity {
                entity: request.entity,
                from: pose.position,
                to: destination,
            },
        );
        collaborators.events.post(&mut event);
        tracker.note_event(context_id, &event);
        if event.is_cancelled() {
            debug!(entity = %request.entity, "teleport cancelled");
            return Ok(TeleportOutcome::Cancelled);
        }
        if let EventPayload::MoveEntity { to, .. } = event.payload() {
            destination = *to;
        }
    }

    let mut rotation = pose.rotation;
    if let Some(requested) = request.rotation {
        let requested = if pose.is_player {
            requested
        } else {
            Rotation::new(requested.pitch.clamp(-90.0, 90.0), wrap_degrees(requested.yaw))
        };
        rotation = requested;
        if collaborators.events.should_fire(EventKind::RotateEntity) {
            let mut event = Event::new(
                causes.current_cause(),
                EventPayload::RotateEntity {
                    entity: request.entity,
                    from: pose.rotation,
                    to: requested,
                },
            );
            collaborators.events.post(&mut event);
            tracker.note_event(context_id, &event);
            rotation = if event.is_cancelled() {
                pose.rotation
            } else if let EventPayload::RotateEntity { to, .. } = event.payload() {
                *to
            } else {
                requested
            };
        }
    }

    collaborators
        .entities
        .set_pose(request.entity, destination, rotation)?;
    debug!(
        entity = %request.entity,
        x = destination.x,
        y = destination.y,
        z = destination.z,
        "entity teleported"
    );
    drop(frame);
    Ok(TeleportOutcome::Teleported {
        position: destination,
        rotation,
    })
}
