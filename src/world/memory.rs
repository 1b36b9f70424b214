//! In-memory backing stores.
//!
//! `DashMap`-backed implementations of every store trait, used by embedders
//! that keep world state in process and by the test suite.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::StoreError;
use crate::inventory::ItemStack;

use super::{
    BlockPos, BlockState, BlockStorage, ContainerId, EntityId, EntityPose, EntityRegistry,
    EntitySpawn, PlayerId, Rotation, SlotStorage, Vector3,
};

/// A live entity as stored in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntity {
    /// Entity type identifier
    pub entity_type: String,
    /// Current pose
    pub pose: EntityPose,
}

/// In-memory world holding blocks, containers, cursors and entities.
///
/// Unset blocks read as air and unset cursors read as empty.
#[derive(Debug, Default)]
pub struct MemoryWorld {
    blocks: DashMap<BlockPos, BlockState>,
    containers: DashMap<ContainerId, Vec<ItemStack>>,
    cursors: DashMap<PlayerId, ItemStack>,
    entities: DashMap<EntityId, MemoryEntity>,
    next_container: AtomicU64,
    next_entity: AtomicU64,
}

impl MemoryWorld {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a backing container of `size` empty slots.
    pub fn add_container(&self, size: usize) -> ContainerId {
        let id = ContainerId(self.next_container.fetch_add(1, Ordering::SeqCst) + 1);
        self.containers.insert(id, vec![ItemStack::empty(); size]);
        id
    }

    /// Drops a backing container; later reads and writes to it fail.
    pub fn remove_container(&self, container: ContainerId) -> bool {
        self.containers.remove(&container).is_some()
    }

    /// Inserts an existing entity, bypassing spawn capture.
    pub fn insert_entity(&self, entity_type: impl Into<String>, pose: EntityPose) -> EntityId {
        let id = EntityId(self.next_entity.fetch_add(1, Ordering::SeqCst) + 1);
        self.entities.insert(
            id,
            MemoryEntity {
                entity_type: entity_type.into(),
                pose,
            },
        );
        id
    }

    /// Returns a copy of the entity behind `id`.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<MemoryEntity> {
        self.entities.get(&id).map(|e| e.value().clone())
    }

    /// Counts live entities of the given type.
    #[must_use]
    pub fn count_entities(&self, entity_type: &str) -> usize {
        self.entities
            .iter()
            .filter(|e| e.value().entity_type == entity_type)
            .count()
    }

    /// Returns the slot count of a container.
    #[must_use]
    pub fn container_size(&self, container: ContainerId) -> Option<usize> {
        self.containers.get(&container).map(|c| c.len())
    }
}

impl BlockStorage for MemoryWorld {
    fn block(&self, pos: BlockPos) -> BlockState {
        self.blocks
            .get(&pos)
            .map_or_else(BlockState::air, |b| b.value().clone())
    }

    fn set_block(&self, pos: BlockPos, state: BlockState) -> Result<(), StoreError> {
        self.blocks.insert(pos, state);
        Ok(())
    }
}

impl EntityRegistry for MemoryWorld {
    fn spawn(&self, spawn: &EntitySpawn) -> Result<EntityId, StoreError> {
        Ok(self.insert_entity(
            spawn.entity_type.clone(),
            EntityPose {
                position: spawn.position,
                rotation: Rotation::default(),
                is_player: false,
            },
        ))
    }

    fn pose(&self, entity: EntityId) -> Result<EntityPose, StoreError> {
        self.entities
            .get(&entity)
            .map(|e| e.value().pose)
            .ok_or(StoreError::UnknownEntity(entity.0))
    }

    fn set_pose(
        &self,
        entity: EntityId,
        position: Vector3,
        rotation: Rotation,
    ) -> Result<(), StoreError> {
        let mut live = self
            .entities
            .get_mut(&entity)
            .ok_or(StoreError::UnknownEntity(entity.0))?;
        live.pose.position = position;
        live.pose.rotation = rotation;
        Ok(())
    }
}

impl SlotStorage for MemoryWorld {
    fn item(&self, container: ContainerId, index: usize) -> Result<ItemStack, StoreError> {
        let slots = self
            .containers
            .get(&container)
            .ok_or(StoreError::UnknownContainer(container.0))?;
        slots
            .get(index)
            .cloned()
            .ok_or(StoreError::NativeIndexOutOfRange {
                container: container.0,
                index,
                size: slots.len(),
            })
    }

    fn set_item(
        &self,
        container: ContainerId,
        index: usize,
        item: ItemStack,
    ) -> Result<(), StoreError> {
        let mut slots = self
            .containers
            .get_mut(&container)
            .ok_or(StoreError::UnknownContainer(container.0))?;
        let size = slots.len();
        let slot = slots
            .get_mut(index)
            .ok_or(StoreError::NativeIndexOutOfRange {
                container: container.0,
                index,
                size,
            })?;
        *slot = item;
        Ok(())
    }

    fn cursor(&self, player: PlayerId) -> ItemStack {
        self.cursors
            .get(&player)
            .map_or_else(ItemStack::empty, |c| c.value().clone())
    }

    fn set_cursor(&self, player: PlayerId, item: ItemStack) -> Result<(), StoreError> {
        self.cursors.insert(player, item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_block_reads_air() {
        let world = MemoryWorld::new();
        assert_eq!(world.block(BlockPos::new(0, 64, 0)), BlockState::air());
    }

    #[test]
    fn test_container_roundtrip_and_bounds() {
        let world = MemoryWorld::new();
        let chest = world.add_container(27);
        world
            .set_item(chest, 4, ItemStack::new("minecraft:diamond", 3))
            .unwrap();
        assert_eq!(
            world.item(chest, 4).unwrap(),
            ItemStack::new("minecraft:diamond", 3)
        );
        assert_eq!(
            world.item(chest, 27),
            Err(StoreError::NativeIndexOutOfRange {
                container: chest.0,
                index: 27,
                size: 27
            })
        );
    }

    #[test]
    fn test_unknown_container() {
        let world = MemoryWorld::new();
        assert_eq!(
            world.item(ContainerId(99), 0),
            Err(StoreError::UnknownContainer(99))
        );
    }

    #[test]
    fn test_spawn_and_pose() {
        let world = MemoryWorld::new();
        let id = world
            .spawn(&EntitySpawn::new("minecraft:pig", Vector3::new(1.0, 2.0, 3.0)))
            .unwrap();
        assert_eq!(world.pose(id).unwrap().position, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(world.count_entities("minecraft:pig"), 1);

        world
            .set_pose(id, Vector3::new(5.0, 5.0, 5.0), Rotation::new(10.0, 20.0))
            .unwrap();
        assert_eq!(world.pose(id).unwrap().rotation, Rotation::new(10.0, 20.0));
    }

    #[test]
    fn test_cursor_defaults_to_empty() {
        let world = MemoryWorld::new();
        let player = PlayerId::random();
        assert!(world.cursor(player).is_empty());
    }
}
