//! World model and backing-store collaborators.
//!
//! The tracker never owns world data. It reads originals from, and applies
//! settled transactions to, the stores behind these traits. Store methods
//! take `&self` so a store can be shared between the tracker and the code
//! running inside a phase.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::event::EventBus;
use crate::inventory::ItemStack;

pub use memory::MemoryWorld;

// ============================================================================
// Identifiers and values
// ============================================================================

/// Stable player identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Creates a random player id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity handle issued by an [`EntityRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Backing container handle issued by a [`SlotStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContainerId(pub u64);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container#{}", self.0)
    }
}

/// Integer block coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockPos {
    /// X coordinate
    pub x: i32,
    /// Y coordinate
    pub y: i32,
    /// Z coordinate
    pub z: i32,
}

impl BlockPos {
    /// Creates a block position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Continuous world position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Vector3 {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Vector3 {
    /// Creates a position.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Entity facing in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Rotation {
    /// Pitch (x rotation)
    pub pitch: f32,
    /// Yaw (y rotation)
    pub yaw: f32,
}

impl Rotation {
    /// Creates a rotation.
    #[must_use]
    pub const fn new(pitch: f32, yaw: f32) -> Self {
        Self { pitch, yaw }
    }
}

/// Opaque block state identifier, e.g. `"minecraft:stone"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BlockState(pub String);

impl BlockState {
    /// Creates a block state from its identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The empty block.
    #[must_use]
    pub fn air() -> Self {
        Self("minecraft:air".to_string())
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to bring a new entity into the world.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySpawn {
    /// Entity type identifier
    pub entity_type: String,
    /// Spawn position
    pub position: Vector3,
}

impl EntitySpawn {
    /// Creates a spawn request.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, position: Vector3) -> Self {
        Self {
            entity_type: entity_type.into(),
            position,
        }
    }
}

/// Position and facing of a live entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EntityPose {
    /// Current position
    pub position: Vector3,
    /// Current rotation
    pub rotation: Rotation,
    /// Whether the entity is a connected player
    pub is_player: bool,
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Block storage of one world.
pub trait BlockStorage: Send + Sync {
    /// Reads the block at `pos`.
    fn block(&self, pos: BlockPos) -> BlockState;

    /// Writes the block at `pos`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store refuses the write.
    fn set_block(&self, pos: BlockPos, state: BlockState) -> Result<(), StoreError>;
}

/// Live entity registry.
pub trait EntityRegistry: Send + Sync {
    /// Spawns an entity and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the registry refuses the spawn.
    fn spawn(&self, spawn: &EntitySpawn) -> Result<EntityId, StoreError>;

    /// Reads the pose of a live entity.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownEntity` for unknown handles.
    fn pose(&self, entity: EntityId) -> Result<EntityPose, StoreError>;

    /// Moves and rotates a live entity.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownEntity` for unknown handles.
    fn set_pose(
        &self,
        entity: EntityId,
        position: Vector3,
        rotation: Rotation,
    ) -> Result<(), StoreError>;
}

/// Native slot storage of backing containers, plus each player's cursor.
pub trait SlotStorage: Send + Sync {
    /// Reads the item at `index` of `container`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` for unknown containers or indices.
    fn item(&self, container: ContainerId, index: usize) -> Result<ItemStack, StoreError>;

    /// Writes the item at `index` of `container`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` for unknown containers or indices, or a refused write.
    fn set_item(
        &self,
        container: ContainerId,
        index: usize,
        item: ItemStack,
    ) -> Result<(), StoreError>;

    /// Reads the item carried on the player's cursor.
    fn cursor(&self, player: PlayerId) -> ItemStack;

    /// Replaces the item carried on the player's cursor.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store refuses the write.
    fn set_cursor(&self, player: PlayerId, item: ItemStack) -> Result<(), StoreError>;
}

/// Outbound collaborators one tracker talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Event bus receiving attribution events
    pub events: Arc<dyn EventBus>,
    /// Block storage
    pub blocks: Arc<dyn BlockStorage>,
    /// Entity registry
    pub entities: Arc<dyn EntityRegistry>,
    /// Inventory slot storage
    pub slots: Arc<dyn SlotStorage>,
}

impl Collaborators {
    /// Wires every store to one in-memory world.
    #[must_use]
    pub fn in_memory(world: &Arc<MemoryWorld>, events: Arc<dyn EventBus>) -> Self {
        Self {
            events,
            blocks: Arc::clone(world) as Arc<dyn BlockStorage>,
            entities: Arc::clone(world) as Arc<dyn EntityRegistry>,
            slots: Arc::clone(world) as Arc<dyn SlotStorage>,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
