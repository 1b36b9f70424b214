//! Inventory slot model.
//!
//! Backing containers expose native per-container indices. Plugins see one
//! flat, stable slot index space per inventory. A [`Lens`] is the static map
//! between the two, built once per container *shape* and shared by every
//! inventory instance of that shape.
//!
//! # Architecture
//!
//! - [`ShapeDescriptor`] - what a container type looks like (leaf or composite)
//! - [`LensRegistry`] - builds and caches one [`Lens`] per [`ShapeId`]
//! - [`Inventory`] - a shape's lens bound to concrete backing containers

pub mod adapter;
pub mod item;
pub mod lens;
pub mod shape;

pub use adapter::{Inventory, SlotRef};
pub use item::ItemStack;
pub use lens::{Lens, LensRegistry, LensTarget};
pub use shape::{LensGenerator, ShapeDescriptor, ShapeId, ShapeLayout};
