//! Slot lenses and the per-shape lens cache.

use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::LensError;

use super::shape::{ShapeDescriptor, ShapeId, ShapeLayout};

/// Where a flat slot lives inside an inventory's backing containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LensTarget {
    /// Position of the backing container in the inventory's fabric
    pub fabric_index: usize,
    /// Native index inside that container
    pub native_index: usize,
}

#[derive(Debug, Clone)]
struct LensChild {
    slot_offset: usize,
    fabric_offset: usize,
    lens: Arc<Lens>,
}

#[derive(Debug, Clone)]
enum LensKind {
    /// Flat slot `n` is native index `n` of one container
    Linear,
    /// Flat slot `n` is native index `table[n]` of one container
    Mapped(Arc<[usize]>),
    /// Children cover consecutive flat ranges
    Composite(Vec<LensChild>),
}

/// Immutable map from a flat slot range to native container indices.
///
/// A composite lens covers its children's ranges back to back: the ranges
/// are contiguous, never overlap, and add up to the composite's size.
#[derive(Debug, Clone)]
pub struct Lens {
    size: usize,
    fabric_width: usize,
    kind: LensKind,
}

impl Lens {
    /// One flat slot per native index of a single container.
    #[must_use]
    pub const fn linear(size: usize) -> Self {
        Self {
            size,
            fabric_width: 1,
            kind: LensKind::Linear,
        }
    }

    /// Flat slot `n` maps to native index `natives[n]` of a single container.
    #[must_use]
    pub fn mapped(natives: Vec<usize>) -> Self {
        Self {
            size: natives.len(),
            fabric_width: 1,
            kind: LensKind::Mapped(natives.into()),
        }
    }

    /// Concatenates `children` in order.
    #[must_use]
    pub fn composite(children: Vec<Arc<Self>>) -> Self {
        let mut slot_offset = 0;
        let mut fabric_offset = 0;
        let children: Vec<LensChild> = children
            .into_iter()
            .map(|lens| {
                let child = LensChild {
                    slot_offset,
                    fabric_offset,
                    lens,
                };
                slot_offset += child.lens.size;
                fabric_offset += child.lens.fabric_width;
                child
            })
            .collect();
        Self {
            size: slot_offset,
            fabric_width: fabric_offset,
            kind: LensKind::Composite(children),
        }
    }

    /// Number of flat slots covered.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Number of backing containers spanned.
    #[must_use]
    pub const fn fabric_width(&self) -> usize {
        self.fabric_width
    }

    /// Flat ranges covered by each direct child, in order.
    ///
    /// Leaf lenses report their whole range as a single entry.
    #[must_use]
    pub fn child_ranges(&self) -> Vec<Range<usize>> {
        match &self.kind {
            LensKind::Composite(children) => children
                .iter()
                .map(|c| c.slot_offset..c.slot_offset + c.lens.size)
                .collect(),
            LensKind::Linear | LensKind::Mapped(_) => vec![0..self.size],
        }
    }

    /// Resolves a flat slot index to its backing container and native index.
    #[must_use]
    pub fn resolve(&self, index: usize) -> Option<LensTarget> {
        if index >= self.size {
            return None;
        }
        match &self.kind {
            LensKind::Linear => Some(LensTarget {
                fabric_index: 0,
                native_index: index,
            }),
            LensKind::Mapped(table) => table.get(index).map(|&native_index| LensTarget {
                fabric_index: 0,
                native_index,
            }),
            LensKind::Composite(children) => {
                let at = children.partition_point(|c| c.slot_offset + c.lens.size <= index);
                let child = children.get(at)?;
                child
                    .lens
                    .resolve(index - child.slot_offset)
                    .map(|target| LensTarget {
                        fabric_index: target.fabric_index + child.fabric_offset,
                        native_index: target.native_index,
                    })
            }
        }
    }
}

/// Builds lenses and caches them by shape id.
///
/// Many inventory instances share one shape, so a lens is built at most
/// once per [`ShapeId`] and handed out as a shared `Arc`.
#[derive(Debug, Default)]
pub struct LensRegistry {
    cache: DashMap<ShapeId, Arc<Lens>>,
}

impl LensRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lens for `shape`, building and caching it on first use.
    ///
    /// # Errors
    ///
    /// Returns `LensError::EmptyShape` for shapes without slots and
    /// `LensError::SizeMismatch` when a custom generator's lens does not
    /// cover the declared slot count.
    pub fn lens_for(&self, shape: &ShapeDescriptor) -> Result<Arc<Lens>, LensError> {
        let cached = self.cache.get(shape.id()).map(|hit| Arc::clone(hit.value()));
        if let Some(lens) = cached {
            trace!(shape = %shape.id(), "lens cache hit");
            return Ok(lens);
        }

        // Built outside the map so child lookups never contend with this shard.
        let built = Arc::new(self.build(shape)?);
        debug!(
            shape = %shape.id(),
            slots = built.size(),
            containers = built.fabric_width(),
            "built slot lens"
        );
        let lens = self
            .cache
            .entry(shape.id().clone())
            .or_insert(built)
            .value()
            .clone();
        Ok(lens)
    }

    /// Number of cached shapes.
    #[must_use]
    pub fn cached_shapes(&self) -> usize {
        self.cache.len()
    }

    fn build(&self, shape: &ShapeDescriptor) -> Result<Lens, LensError> {
        if shape.slot_count() == 0 {
            return Err(LensError::EmptyShape(shape.id().clone()));
        }

        if let Some(generator) = shape.generator() {
            let lens = generator.generate(shape, self)?;
            if lens.size() != shape.slot_count() {
                return Err(LensError::SizeMismatch {
                    shape: shape.id().clone(),
                    expected: shape.slot_count(),
                    actual: lens.size(),
                });
            }
            return Ok(lens);
        }

        match shape.layout() {
            ShapeLayout::Slots(size) => Ok(Lens::linear(*size)),
            ShapeLayout::Composite(children) => {
                let lenses = children
                    .iter()
                    .map(|child| self.lens_for(child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Lens::composite(lenses))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Player storage: 36 native slots with the hotbar first, exposed as main
    /// storage (natives 9..36) followed by the hotbar (natives 0..9).
    struct MainThenHotbar;

    impl crate::inventory::LensGenerator for MainThenHotbar {
        fn generate(
            &self,
            _shape: &ShapeDescriptor,
            _registry: &LensRegistry,
        ) -> Result<Lens, LensError> {
            Ok(Lens::mapped((9..36).chain(0..9).collect()))
        }
    }

    struct WrongSize;

    impl crate::inventory::LensGenerator for WrongSize {
        fn generate(
            &self,
            _shape: &ShapeDescriptor,
            _registry: &LensRegistry,
        ) -> Result<Lens, LensError> {
            Ok(Lens::linear(3))
        }
    }

    #[test]
    fn test_linear_resolution() {
        let lens = Lens::linear(5);
        assert_eq!(
            lens.resolve(4),
            Some(LensTarget {
                fabric_index: 0,
                native_index: 4
            })
        );
        assert_eq!(lens.resolve(5), None);
    }

    #[test]
    fn test_composite_of_nine_and_twentyseven() {
        let registry = LensRegistry::new();
        let hotbar = Arc::new(ShapeDescriptor::slots("hotbar", 9));
        let main = Arc::new(ShapeDescriptor::slots("main", 27));
        let shape = ShapeDescriptor::composite("storage", vec![hotbar, main]);

        let lens = registry.lens_for(&shape).unwrap();
        assert_eq!(lens.size(), 36);
        assert_eq!(
            lens.resolve(10),
            Some(LensTarget {
                fabric_index: 1,
                native_index: 1
            })
        );
        assert_eq!(lens.child_ranges(), vec![0..9, 9..36]);
    }

    #[test]
    fn test_nested_composite_offsets() {
        let registry = LensRegistry::new();
        let chest = Arc::new(ShapeDescriptor::slots("chest", 27));
        let main = Arc::new(ShapeDescriptor::slots("main", 27));
        let hotbar = Arc::new(ShapeDescriptor::slots("hotbar", 9));
        let player = Arc::new(ShapeDescriptor::composite("player", vec![main, hotbar]));
        let menu = ShapeDescriptor::composite("chest_menu", vec![chest, player]);

        let lens = registry.lens_for(&menu).unwrap();
        assert_eq!(lens.size(), 63);
        assert_eq!(lens.fabric_width(), 3);
        // First hotbar slot: after 27 chest + 27 main slots, third container.
        assert_eq!(
            lens.resolve(54),
            Some(LensTarget {
                fabric_index: 2,
                native_index: 0
            })
        );
    }

    #[test]
    fn test_lens_cached_by_shape_id() {
        let registry = LensRegistry::new();
        let a = registry.lens_for(&ShapeDescriptor::slots("chest", 27)).unwrap();
        let b = registry.lens_for(&ShapeDescriptor::slots("chest", 27)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.cached_shapes(), 1);
    }

    #[test]
    fn test_children_cached_when_building_composite() {
        let registry = LensRegistry::new();
        let hotbar = Arc::new(ShapeDescriptor::slots("hotbar", 9));
        let shape = ShapeDescriptor::composite("wrapper", vec![Arc::clone(&hotbar)]);
        registry.lens_for(&shape).unwrap();
        assert_eq!(registry.cached_shapes(), 2);
    }

    #[test]
    fn test_custom_generator_remaps_natives() {
        let registry = LensRegistry::new();
        let shape = ShapeDescriptor::slots("player_storage", 36)
            .with_generator(Arc::new(MainThenHotbar));
        let lens = registry.lens_for(&shape).unwrap();
        assert_eq!(lens.resolve(0).unwrap().native_index, 9);
        assert_eq!(lens.resolve(27).unwrap().native_index, 0);
        assert_eq!(lens.resolve(35).unwrap().native_index, 8);
    }

    #[test]
    fn test_custom_generator_size_checked() {
        let registry = LensRegistry::new();
        let shape = ShapeDescriptor::slots("odd", 4).with_generator(Arc::new(WrongSize));
        assert_eq!(
            registry.lens_for(&shape).unwrap_err(),
            LensError::SizeMismatch {
                shape: ShapeId::new("odd"),
                expected: 4,
                actual: 3
            }
        );
        assert_eq!(registry.cached_shapes(), 0);
    }

    #[test]
    fn test_empty_shape_rejected() {
        let registry = LensRegistry::new();
        assert_eq!(
            registry
                .lens_for(&ShapeDescriptor::slots("nothing", 0))
                .unwrap_err(),
            LensError::EmptyShape(ShapeId::new("nothing"))
        );
    }

    #[test]
    fn test_composite_ranges_are_contiguous() {
        let lens = Lens::composite(vec![
            Arc::new(Lens::linear(3)),
            Arc::new(Lens::linear(4)),
            Arc::new(Lens::linear(2)),
        ]);
        let ranges = lens.child_ranges();
        assert_eq!(ranges.first().unwrap().start, 0);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(ranges.last().unwrap().end, lens.size());
        assert_eq!(lens.size(), 9);
    }
}
