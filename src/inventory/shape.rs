//! Container shape descriptors.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::LensError;

use super::lens::{Lens, LensRegistry};

/// Identity of a container shape.
///
/// Lenses are cached by this id, so two descriptors with the same id are
/// treated as the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ShapeId(Arc<str>);

impl ShapeId {
    /// Creates a shape id.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structural layout of a shape.
#[derive(Debug, Clone)]
pub enum ShapeLayout {
    /// One backing container with this many native slots
    Slots(usize),
    /// Ordered concatenation of child shapes, one backing container per leaf
    Composite(Vec<Arc<ShapeDescriptor>>),
}

/// Supplies a custom lens for a container shape.
///
/// Shapes without a generator get the generic lens: one flat slot per native
/// index for leaves, the ordered concatenation of child lenses for
/// composites.
pub trait LensGenerator: Send + Sync {
    /// Builds the lens for `shape`.
    ///
    /// `registry` resolves lenses of child shapes so generated lenses can
    /// reuse cached children.
    ///
    /// # Errors
    ///
    /// Returns `LensError` if the lens cannot be built.
    fn generate(&self, shape: &ShapeDescriptor, registry: &LensRegistry)
    -> Result<Lens, LensError>;
}

/// Describes one container type.
#[derive(Clone)]
pub struct ShapeDescriptor {
    id: ShapeId,
    layout: ShapeLayout,
    generator: Option<Arc<dyn LensGenerator>>,
}

impl ShapeDescriptor {
    /// A leaf shape of `size` native slots.
    #[must_use]
    pub fn slots(id: &str, size: usize) -> Self {
        Self {
            id: ShapeId::new(id),
            layout: ShapeLayout::Slots(size),
            generator: None,
        }
    }

    /// A composite of `children`, in flat slot order.
    #[must_use]
    pub fn composite(id: &str, children: Vec<Arc<Self>>) -> Self {
        Self {
            id: ShapeId::new(id),
            layout: ShapeLayout::Composite(children),
            generator: None,
        }
    }

    /// Attaches a custom lens generator.
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn LensGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Shape id.
    #[must_use]
    pub const fn id(&self) -> &ShapeId {
        &self.id
    }

    /// Shape layout.
    #[must_use]
    pub const fn layout(&self) -> &ShapeLayout {
        &self.layout
    }

    /// Custom lens generator, if any.
    #[must_use]
    pub fn generator(&self) -> Option<&Arc<dyn LensGenerator>> {
        self.generator.as_ref()
    }

    /// Total number of flat slots the shape declares.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        match &self.layout {
            ShapeLayout::Slots(size) => *size,
            ShapeLayout::Composite(children) => children.iter().map(|c| c.slot_count()).sum(),
        }
    }

    /// Number of backing containers an instance of this shape spans.
    #[must_use]
    pub fn fabric_width(&self) -> usize {
        match &self.layout {
            ShapeLayout::Slots(_) => 1,
            ShapeLayout::Composite(children) => children.iter().map(|c| c.fabric_width()).sum(),
        }
    }
}

impl fmt::Debug for ShapeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeDescriptor")
            .field("id", &self.id)
            .field("layout", &self.layout)
            .field("custom_lens", &self.generator.is_some())
            .finish()
    }
}
