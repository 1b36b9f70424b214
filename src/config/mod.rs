//! Tracker configuration.
//!
//! Configuration is a small YAML document; see [`TrackerConfig`] for the
//! fields and [`ConfigLoader`] for environment expansion and overrides.

pub mod loader;
pub mod schema;

pub use loader::{ConfigLoader, MAX_DEPTH_ENV, validate};
pub use schema::{DEFAULT_MAX_PHASE_DEPTH, LoggingConfig, TrackerConfig};
