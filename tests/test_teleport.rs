//! The teleport command: move and rotate events, listener redirects and
//! rotation normalization.

mod common;

use common::Harness;
use phase_tracker::cause::{Causer, MovementType, keys};
use phase_tracker::dispatch::{TeleportOutcome, TeleportRequest, teleport};
use phase_tracker::event::EventKind;
use phase_tracker::world::{EntityId, EntityPose, Rotation, Vector3};

fn spawn(h: &Harness, is_player: bool) -> EntityId {
    h.world.insert_entity(
        if is_player { "minecraft:player" } else { "minecraft:cow" },
        EntityPose {
            position: Vector3::new(0.0, 64.0, 0.0),
            rotation: Rotation::new(10.0, 20.0),
            is_player,
        },
    )
}

fn pose(h: &Harness, entity: EntityId) -> EntityPose {
    h.world.entity(entity).unwrap().pose
}

fn admin() -> Causer {
    Causer::plugin("essentials")
}

#[test]
fn test_teleport_moves_entity() {
    let h = Harness::server();
    h.observe(EventKind::MoveEntity);
    let cow = spawn(&h, false);
    let destination = Vector3::new(100.0, 70.0, -5.0);

    let outcome = teleport(
        &h.tracker,
        &admin(),
        TeleportRequest {
            entity: cow,
            destination,
            rotation: None,
        },
    )
    .unwrap();

    assert_eq!(
        outcome,
        TeleportOutcome::Teleported {
            position: destination,
            rotation: Rotation::new(10.0, 20.0),
        }
    );
    assert_eq!(pose(&h, cow).position, destination);

    let seen = h.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].cause.most_specific(), Some(&admin()));
    assert_eq!(
        seen[0].cause.context().get(&keys::MOVEMENT_TYPE),
        Some(&MovementType::Command)
    );
    assert_eq!(h.tracker.cause_stack().frame_depth(), 0);
}

#[test]
fn test_cancelled_move_leaves_entity() {
    let h = Harness::server();
    h.listen(EventKind::MoveEntity, |event| event.cancel());
    let cow = spawn(&h, false);

    let outcome = teleport(
        &h.tracker,
        &admin(),
        TeleportRequest {
            entity: cow,
            destination: Vector3::new(5.0, 5.0, 5.0),
            rotation: Some(Rotation::new(0.0, 0.0)),
        },
    )
    .unwrap();

    assert_eq!(outcome, TeleportOutcome::Cancelled);
    assert_eq!(pose(&h, cow).position, Vector3::new(0.0, 64.0, 0.0));
    assert_eq!(pose(&h, cow).rotation, Rotation::new(10.0, 20.0));
    assert_eq!(h.tracker.cause_stack().frame_depth(), 0);
}

#[test]
fn test_listener_redirects_destination() {
    let h = Harness::server();
    let safe = Vector3::new(0.0, 100.0, 0.0);
    h.listen(EventKind::MoveEntity, move |event| {
        assert!(event.set_destination(safe));
    });
    let cow = spawn(&h, false);

    teleport(
        &h.tracker,
        &admin(),
        TeleportRequest {
            entity: cow,
            destination: Vector3::new(0.0, -64.0, 0.0),
            rotation: None,
        },
    )
    .unwrap();

    assert_eq!(pose(&h, cow).position, safe);
}

#[test]
fn test_non_player_rotation_is_normalized() {
    let h = Harness::server();
    let cow = spawn(&h, false);

    teleport(
        &h.tracker,
        &admin(),
        TeleportRequest {
            entity: cow,
            destination: Vector3::new(1.0, 64.0, 1.0),
            rotation: Some(Rotation::new(120.0, 200.0)),
        },
    )
    .unwrap();

    let rotation = pose(&h, cow).rotation;
    assert!((rotation.pitch - 90.0).abs() < f32::EPSILON);
    assert!((rotation.yaw - -160.0).abs() < f32::EPSILON);
}

#[test]
fn test_player_rotation_is_sent_as_requested() {
    let h = Harness::server();
    let player = spawn(&h, true);

    teleport(
        &h.tracker,
        &admin(),
        TeleportRequest {
            entity: player,
            destination: Vector3::new(1.0, 64.0, 1.0),
            rotation: Some(Rotation::new(120.0, 200.0)),
        },
    )
    .unwrap();

    assert_eq!(pose(&h, player).rotation, Rotation::new(120.0, 200.0));
}

#[test]
fn test_cancelled_rotation_keeps_facing() {
    let h = Harness::server();
    h.listen(EventKind::RotateEntity, |event| event.cancel());
    let cow = spawn(&h, false);
    let destination = Vector3::new(8.0, 64.0, 8.0);

    let outcome = teleport(
        &h.tracker,
        &admin(),
        TeleportRequest {
            entity: cow,
            destination,
            rotation: Some(Rotation::new(45.0, 90.0)),
        },
    )
    .unwrap();

    assert_eq!(
        outcome,
        TeleportOutcome::Teleported {
            position: destination,
            rotation: Rotation::new(10.0, 20.0),
        }
    );
    assert_eq!(pose(&h, cow).position, destination);
}

#[test]
fn test_unknown_entity_is_a_store_error() {
    let h = Harness::server();
    let err = teleport(
        &h.tracker,
        &admin(),
        TeleportRequest {
            entity: EntityId(77),
            destination: Vector3::new(0.0, 0.0, 0.0),
            rotation: None,
        },
    )
    .unwrap_err();
    assert_eq!(err.category(), "store");
    assert_eq!(h.tracker.cause_stack().frame_depth(), 0);
}
