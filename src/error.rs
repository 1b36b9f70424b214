//! Error types for the phase tracker.
//!
//! Errors fall into four groups: usage errors (broken call contracts that
//! corrupt the causal record), phase policy failures, lens construction
//! failures and collaborator (backing store) failures. Event cancellation is
//! not an error and never shows up here.

use std::path::PathBuf;
use thiserror::Error;

use crate::inventory::ShapeId;

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for tracker operations.
///
/// Aggregates all domain-specific errors and maps each of them to a fixed
/// category label used by the metrics layer.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// A call contract was broken by the caller
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// The phase stack refused an operation
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// A slot lens could not be built or resolved
    #[error(transparent)]
    Lens(#[from] LensError),

    /// A backing store collaborator failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TrackerError {
    /// Returns the category label for this error.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Usage(_) => "usage",
            Self::Phase(_) => "phase",
            Self::Lens(_) => "lens",
            Self::Store(_) => "store",
            Self::Config(_) | Self::Yaml(_) => "config",
            Self::Io(_) => "io",
        }
    }

    /// Whether this error is a broken call contract.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

// ============================================================================
// Usage Errors
// ============================================================================

/// Programming-contract violations that can be reported as values.
///
/// Violations detected where nothing can be returned (wrong thread, closing
/// out of stack order) panic instead; see [`crate::phase::PhaseTracker`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UsageError {
    /// `build_and_switch` was called on a context that is already switched
    #[error("phase context {context_id} ({state}) was already built and switched")]
    AlreadySwitched {
        /// Context that was switched twice
        context_id: u64,
        /// Phase state name
        state: &'static str,
    },

    /// A builder method was called after `build_and_switch`
    #[error("phase context {context_id} configured ('{field}') after build_and_switch")]
    ConfiguredAfterSwitch {
        /// Context that was configured late
        context_id: u64,
        /// Builder field that was set
        field: &'static str,
    },

    /// The tracker is already bound to a thread
    #[error("{side} tracker is already bound to thread {thread}")]
    AlreadyBound {
        /// Tracker side
        side: &'static str,
        /// Debug rendering of the bound thread id
        thread: String,
    },

    /// A cause without identity was pushed
    #[error("cannot push a cause without identity ({kind})")]
    EmptyCause {
        /// Kind of causer that was rejected
        kind: &'static str,
    },
}

// ============================================================================
// Phase Errors
// ============================================================================

/// Phase stack policy failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PhaseError {
    /// A non-reentrant state is already open on the stack
    #[error("phase state {state} does not allow reentry (open at depth {open_at})")]
    ReentryDenied {
        /// Phase state name
        state: &'static str,
        /// Depth at which the state is already open
        open_at: usize,
    },

    /// Pushing would exceed the configured stack depth
    #[error("phase stack depth limit {limit} exceeded")]
    DepthExceeded {
        /// Configured limit
        limit: usize,
    },
}

// ============================================================================
// Lens Errors
// ============================================================================

/// Slot lens construction and resolution failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LensError {
    /// A generated lens does not cover the shape's declared slot count
    #[error("lens for {shape} covers {actual} slots, shape declares {expected}")]
    SizeMismatch {
        /// Shape the lens was built for
        shape: ShapeId,
        /// Declared slot count
        expected: usize,
        /// Slot count of the generated lens
        actual: usize,
    },

    /// The containers supplied for an inventory do not match its lens
    #[error("inventory of shape {shape} needs {expected} backing containers, got {actual}")]
    FabricMismatch {
        /// Shape of the inventory
        shape: ShapeId,
        /// Containers required by the lens
        expected: usize,
        /// Containers supplied
        actual: usize,
    },

    /// A flat slot index is outside the lens
    #[error("slot {index} out of range for {shape} ({size} slots)")]
    SlotOutOfRange {
        /// Shape being resolved
        shape: ShapeId,
        /// Requested flat index
        index: usize,
        /// Slot count of the lens
        size: usize,
    },

    /// A shape declares no slots at all
    #[error("shape {0} declares no slots")]
    EmptyShape(ShapeId),
}

// ============================================================================
// Store Errors
// ============================================================================

/// Backing store collaborator failures.
///
/// Propagated unchanged to whoever closes the phase context; the tracker
/// never retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The referenced container is not known to the store
    #[error("unknown container {0}")]
    UnknownContainer(u64),

    /// The referenced entity is not known to the registry
    #[error("unknown entity {0}")]
    UnknownEntity(u64),

    /// A native index is outside the container
    #[error("native index {index} out of range for container {container} ({size} slots)")]
    NativeIndexOutOfRange {
        /// Container id
        container: u64,
        /// Requested native index
        index: usize,
        /// Container size
        size: usize,
    },

    /// The store refused the write
    #[error("store rejected write: {0}")]
    Rejected(String),
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set ({message})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Message given with the reference
        message: String,
    },
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error_category() {
        let err: TrackerError = UsageError::AlreadySwitched {
            context_id: 3,
            state: "packet/click",
        }
        .into();
        assert_eq!(err.category(), "usage");
        assert!(err.is_usage());
    }

    #[test]
    fn test_store_error_category() {
        let err: TrackerError = StoreError::UnknownContainer(9).into();
        assert_eq!(err.category(), "store");
        assert!(!err.is_usage());
    }

    #[test]
    fn test_config_error_category() {
        let err: TrackerError = ConfigError::InvalidValue {
            field: "max_phase_depth".to_string(),
            value: "0".to_string(),
            expected: "at least 1".to_string(),
        }
        .into();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_missing_file_category() {
        let err: TrackerError = ConfigError::MissingFile {
            path: PathBuf::from("/nowhere/tracker.yaml"),
        }
        .into();
        assert_eq!(err.category(), "config");
        assert!(err.to_string().contains("/nowhere/tracker.yaml"));
    }

    #[test]
    fn test_io_error_category() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: TrackerError = io_err.into();
        assert_eq!(err.category(), "io");
    }

    #[test]
    fn test_lens_error_display() {
        let err = LensError::SlotOutOfRange {
            shape: ShapeId::new("chest"),
            index: 40,
            size: 27,
        };
        assert_eq!(err.to_string(), "slot 40 out of range for chest (27 slots)");
    }

    #[test]
    fn test_phase_error_display() {
        let err = PhaseError::ReentryDenied {
            state: "block_worker",
            open_at: 1,
        };
        assert!(err.to_string().contains("block_worker"));
        assert!(err.to_string().contains("depth 1"));
    }
}
