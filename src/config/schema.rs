//! Tracker configuration schema.

use serde::{Deserialize, Serialize};

use crate::observability::logging::LogFormat;
use crate::phase::CapturePolicy;

/// Default maximum phase stack depth.
pub const DEFAULT_MAX_PHASE_DEPTH: usize = 64;

/// Top-level tracker configuration.
///
/// ```yaml
/// max_phase_depth: 32
/// capture:
///   entities: false
/// logging:
///   format: json
///   verbosity: 2
///   targets:
///     - phase_tracker::phase::unwind=trace
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Maximum number of simultaneously open phases per tracker
    pub max_phase_depth: usize,

    /// Global capture switches; a kind switched off here is always applied
    /// immediately, whatever the current phase wants
    pub capture: CapturePolicy,

    /// Log output settings
    pub logging: LoggingConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_phase_depth: DEFAULT_MAX_PHASE_DEPTH,
            capture: CapturePolicy::ALL,
            logging: LoggingConfig::default(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,

    /// 0 warn, 1 info, 2 debug, 3 trace
    pub verbosity: u8,

    /// Per-target filter directives layered over the verbosity level,
    /// e.g. `phase_tracker::phase=trace`
    pub targets: Vec<String>,
}
