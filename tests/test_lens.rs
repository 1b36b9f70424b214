//! Slot lenses over composite inventories, driven through the tracker.

mod common;

use std::sync::Arc;

use common::{Harness, sword};
use phase_tracker::dispatch::plugin_call;
use phase_tracker::error::LensError;
use phase_tracker::inventory::{
    Inventory, ItemStack, Lens, LensGenerator, LensRegistry, ShapeDescriptor,
};
use phase_tracker::world::SlotStorage;

fn player_inventory() -> ShapeDescriptor {
    ShapeDescriptor::composite(
        "minecraft:player",
        vec![
            Arc::new(ShapeDescriptor::slots("minecraft:hotbar", 9)),
            Arc::new(ShapeDescriptor::slots("minecraft:main", 27)),
        ],
    )
}

/// Hotbar whose flat order runs right to left.
struct ReversedHotbar;

impl LensGenerator for ReversedHotbar {
    fn generate(
        &self,
        shape: &ShapeDescriptor,
        _registry: &LensRegistry,
    ) -> Result<Lens, LensError> {
        let size = shape.slot_count();
        Ok(Lens::mapped((0..size).rev().collect()))
    }
}

/// Generator that forgets the last slot.
struct ShortLens;

impl LensGenerator for ShortLens {
    fn generate(
        &self,
        shape: &ShapeDescriptor,
        _registry: &LensRegistry,
    ) -> Result<Lens, LensError> {
        Ok(Lens::linear(shape.slot_count() - 1))
    }
}

#[test]
fn test_composite_write_lands_in_second_container() {
    let h = Harness::server();
    let registry = LensRegistry::new();
    let hotbar = h.world.add_container(9);
    let main = h.world.add_container(27);
    let inventory = Inventory::open(&registry, &player_inventory(), vec![hotbar, main]).unwrap();
    assert_eq!(inventory.capacity(), 36);

    let slot = inventory.slot(10).unwrap();
    assert_eq!(slot.container, main);
    assert_eq!(slot.native_index, 1);

    plugin_call(&h.tracker, "kits", |tracker| {
        tracker.set_slot(&inventory, 10, sword())?;
        assert!(h.world.item(main, 1)?.is_empty());
        Ok(())
    })
    .unwrap();

    assert_eq!(h.world.item(main, 1).unwrap(), sword());
    assert!(h.world.item(hotbar, 1).unwrap().is_empty());
}

#[test]
fn test_every_flat_slot_is_a_distinct_cell() {
    let registry = LensRegistry::new();
    let lens = registry.lens_for(&player_inventory()).unwrap();
    let mut seen = std::collections::HashSet::new();
    for index in 0..lens.size() {
        let target = lens.resolve(index).unwrap();
        assert!(seen.insert((target.fabric_index, target.native_index)));
    }
    assert!(lens.resolve(36).is_none());
    assert_eq!(lens.child_ranges(), vec![0..9, 9..36]);
}

#[test]
fn test_custom_generator_inside_composite() {
    let h = Harness::server();
    let registry = LensRegistry::new();
    let shape = ShapeDescriptor::composite(
        "custom:player",
        vec![
            Arc::new(
                ShapeDescriptor::slots("custom:hotbar", 9).with_generator(Arc::new(ReversedHotbar)),
            ),
            Arc::new(ShapeDescriptor::slots("minecraft:main", 27)),
        ],
    );
    let hotbar = h.world.add_container(9);
    let main = h.world.add_container(27);
    let inventory = Inventory::open(&registry, &shape, vec![hotbar, main]).unwrap();

    let first = inventory.slot(0).unwrap();
    assert_eq!((first.container, first.native_index), (hotbar, 8));
    let tenth = inventory.slot(9).unwrap();
    assert_eq!((tenth.container, tenth.native_index), (main, 0));

    plugin_call(&h.tracker, "kits", |tracker| {
        tracker.set_slot(&inventory, 0, ItemStack::new("minecraft:torch", 16))?;
        Ok(())
    })
    .unwrap();
    assert_eq!(
        h.world.item(hotbar, 8).unwrap(),
        ItemStack::new("minecraft:torch", 16)
    );
}

#[test]
fn test_generator_must_cover_declared_slots() {
    let registry = LensRegistry::new();
    let shape = ShapeDescriptor::slots("broken", 5).with_generator(Arc::new(ShortLens));
    let err = registry.lens_for(&shape).unwrap_err();
    assert!(matches!(
        err,
        LensError::SizeMismatch {
            expected: 5,
            actual: 4,
            ..
        }
    ));
    assert_eq!(registry.cached_shapes(), 0);
}

#[test]
fn test_lenses_are_shared_per_shape() {
    let registry = LensRegistry::new();
    let a = registry.lens_for(&player_inventory()).unwrap();
    let b = registry.lens_for(&player_inventory()).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_wrong_container_count_rejected() {
    let h = Harness::server();
    let only = h.world.add_container(9);
    let err = Inventory::open(&LensRegistry::new(), &player_inventory(), vec![only]).unwrap_err();
    assert!(matches!(
        err,
        LensError::FabricMismatch {
            expected: 2,
            actual: 1,
            ..
        }
    ));
}

#[test]
fn test_out_of_range_slot_through_tracker() {
    let h = Harness::server();
    let chest = h.chest();
    let err = h.tracker.set_slot(&chest, 27, sword()).unwrap_err();
    assert_eq!(err.category(), "lens");
}
