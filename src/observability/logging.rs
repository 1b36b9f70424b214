//! Logging initialization from [`LoggingConfig`].
//!
//! The configured verbosity sets the base level for every target and
//! `targets` layers per-module directives on top, so a tracker can trace one
//! subsystem (say `phase_tracker::phase::unwind`) while the rest stays quiet.
//! `PHASE_TRACKER_LOG_LEVEL`, when set, replaces the whole filter.

use std::io::IsTerminal;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::{Directive, ParseError};

use crate::config::LoggingConfig;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_LEVEL_ENV: &str = "PHASE_TRACKER_LOG_LEVEL";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, colored on a terminal
    #[default]
    Human,
    /// Newline-delimited JSON
    Json,
}

/// Base level for a verbosity: 0 warn, 1 info, 2 debug, anything higher trace.
#[must_use]
pub const fn verbosity_to_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Parses one per-target directive such as `phase_tracker::phase=trace`.
///
/// # Errors
///
/// Returns the filter's `ParseError` for malformed directives or unknown
/// levels.
pub fn parse_target_directive(raw: &str) -> Result<Directive, ParseError> {
    raw.trim().parse()
}

/// Full filter string for `config`: base level first, then the per-target
/// directives in configuration order.
#[must_use]
pub fn filter_directive(config: &LoggingConfig) -> String {
    std::iter::once(verbosity_to_directive(config.verbosity))
        .chain(config.targets.iter().map(|t| t.trim()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Installs the global tracing subscriber on stderr.
///
/// Targets are printed once the filter gets specific: at debug verbosity
/// and above, or whenever per-target directives are configured. Uses
/// `try_init()`, so only the first call in a process takes effect.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));
    let show_target = config.verbosity >= 2 || !config.targets.is_empty();

    let installed = match config.format {
        LogFormat::Human => {
            let use_ansi =
                std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(use_ansi)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .try_init()
        }
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(show_target)
            .with_writer(std::io::stderr)
            .try_init(),
    };
    if installed.is_ok() {
        tracing::debug!(
            format = ?config.format,
            verbosity = config.verbosity,
            targets = config.targets.len(),
            "logging initialized"
        );
    }
}
