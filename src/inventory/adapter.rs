//! Inventory instances: a shape's lens bound to backing containers.

use std::sync::Arc;

use serde::Serialize;

use crate::error::LensError;
use crate::world::ContainerId;

use super::lens::{Lens, LensRegistry};
use super::shape::{ShapeDescriptor, ShapeId};

/// A resolved reference to one slot.
///
/// Two refs denote the same storage cell when `container` and
/// `native_index` match; `ordinal` is the flat index the slot was
/// addressed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SlotRef {
    /// Flat slot index within the inventory
    pub ordinal: usize,
    /// Backing container
    pub container: ContainerId,
    /// Native index inside the backing container
    pub native_index: usize,
}

impl SlotRef {
    /// Whether both refs point at the same storage cell.
    #[must_use]
    pub fn same_cell(&self, other: &Self) -> bool {
        self.container == other.container && self.native_index == other.native_index
    }
}

/// An inventory instance.
///
/// Cheap to clone: the lens and the container list are shared.
#[derive(Debug, Clone)]
pub struct Inventory {
    shape: ShapeId,
    lens: Arc<Lens>,
    fabric: Arc<[ContainerId]>,
}

impl Inventory {
    /// Binds `shape` to its backing containers, one per leaf in lens order.
    ///
    /// # Errors
    ///
    /// Returns `LensError::FabricMismatch` if the container count does not
    /// match the lens, or any error from building the lens.
    pub fn open(
        registry: &LensRegistry,
        shape: &ShapeDescriptor,
        fabric: Vec<ContainerId>,
    ) -> Result<Self, LensError> {
        let lens = registry.lens_for(shape)?;
        if lens.fabric_width() != fabric.len() {
            return Err(LensError::FabricMismatch {
                shape: shape.id().clone(),
                expected: lens.fabric_width(),
                actual: fabric.len(),
            });
        }
        Ok(Self {
            shape: shape.id().clone(),
            lens,
            fabric: fabric.into(),
        })
    }

    /// Shape this inventory was opened with.
    #[must_use]
    pub const fn shape(&self) -> &ShapeId {
        &self.shape
    }

    /// Number of flat slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lens.size()
    }

    /// Backing containers in lens order.
    #[must_use]
    pub fn containers(&self) -> &[ContainerId] {
        &self.fabric
    }

    /// Resolves a flat slot index.
    ///
    /// # Errors
    ///
    /// Returns `LensError::SlotOutOfRange` for indices past the last slot.
    pub fn slot(&self, index: usize) -> Result<SlotRef, LensError> {
        let target = self
            .lens
            .resolve(index)
            .ok_or_else(|| LensError::SlotOutOfRange {
                shape: self.shape.clone(),
                index,
                size: self.lens.size(),
            })?;
        let container = self.fabric.get(target.fabric_index).copied().ok_or_else(|| {
            LensError::FabricMismatch {
                shape: self.shape.clone(),
                expected: target.fabric_index + 1,
                actual: self.fabric.len(),
            }
        })?;
        Ok(SlotRef {
            ordinal: index,
            container,
            native_index: target.native_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chest_menu() -> ShapeDescriptor {
        let chest = Arc::new(ShapeDescriptor::slots("chest", 27));
        let player = Arc::new(ShapeDescriptor::slots("player", 36));
        ShapeDescriptor::composite("chest_menu", vec![chest, player])
    }

    #[test]
    fn test_open_checks_fabric_width() {
        let registry = LensRegistry::new();
        let err = Inventory::open(&registry, &chest_menu(), vec![ContainerId(1)]).unwrap_err();
        assert_eq!(
            err,
            LensError::FabricMismatch {
                shape: ShapeId::new("chest_menu"),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_slot_resolves_to_container() {
        let registry = LensRegistry::new();
        let inv = Inventory::open(
            &registry,
            &chest_menu(),
            vec![ContainerId(10), ContainerId(20)],
        )
        .unwrap();
        assert_eq!(inv.capacity(), 63);

        let slot = inv.slot(30).unwrap();
        assert_eq!(slot.container, ContainerId(20));
        assert_eq!(slot.native_index, 3);
        assert_eq!(slot.ordinal, 30);
    }

    #[test]
    fn test_slot_out_of_range() {
        let registry = LensRegistry::new();
        let inv = Inventory::open(
            &registry,
            &ShapeDescriptor::slots("hopper", 5),
            vec![ContainerId(1)],
        )
        .unwrap();
        assert!(matches!(
            inv.slot(5),
            Err(LensError::SlotOutOfRange { index: 5, size: 5, .. })
        ));
    }

    #[test]
    fn test_same_cell_ignores_ordinal() {
        let a = SlotRef {
            ordinal: 0,
            container: ContainerId(1),
            native_index: 4,
        };
        let b = SlotRef { ordinal: 9, ..a };
        assert!(a.same_cell(&b));
        assert_ne!(a, b);
    }
}
