//! Configuration loader.
//!
//! Loading pipeline:
//! 1. Environment variable expansion (pre-parse, on raw text)
//! 2. YAML parsing into [`TrackerConfig`]
//! 3. Environment overrides (`PHASE_TRACKER_MAX_DEPTH`)
//! 4. Validation

use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::Chars;

use tracing::{debug, warn};

use crate::config::schema::TrackerConfig;
use crate::error::ConfigError;
use crate::observability::logging;

/// Environment variable overriding `max_phase_depth`.
pub const MAX_DEPTH_ENV: &str = "PHASE_TRACKER_MAX_DEPTH";

/// Highest meaningful logging verbosity.
const MAX_VERBOSITY: u8 = 3;

/// Loads and validates tracker configuration.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    warnings: Vec<String>,
}

impl ConfigLoader {
    /// Creates a loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings collected by the last load.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingFile` if the file cannot be read, or any
    /// error from [`load_str`](Self::load_str).
    pub fn load(&mut self, path: &Path) -> Result<TrackerConfig, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        self.load_str(&raw, path)
    }

    /// Loads configuration from YAML text; `origin` is used in errors.
    ///
    /// An empty document yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` for malformed YAML or unknown
    /// fields, `ConfigError::EnvVarNotSet` for a `${VAR:?message}`
    /// reference to an unset variable, and `ConfigError::InvalidValue` when
    /// validation fails.
    pub fn load_str(&mut self, raw: &str, origin: &Path) -> Result<TrackerConfig, ConfigError> {
        self.warnings.clear();
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        let substituted = self.substitute(raw, origin)?;

        let mut config = if substituted.trim().is_empty() {
            TrackerConfig::default()
        } else {
            serde_yaml::from_str(&substituted).map_err(|e| ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?
        };

        apply_overrides(&mut config, |name| std::env::var(name).ok())?;
        validate(&config)?;
        debug!(
            path = %origin.display(),
            max_phase_depth = config.max_phase_depth,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Substitutes environment variables in raw YAML text.
    ///
    /// Supports:
    /// - `${VAR}` - expand to value (empty string if unset, with a warning)
    /// - `${VAR:-default}` - expand to default if unset
    /// - `${VAR:?message}` - fail if unset
    /// - `$$` - literal `$`
    fn substitute(&mut self, raw: &str, origin: &Path) -> Result<String, ConfigError> {
        let mut result = String::with_capacity(raw.len());
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                result.push(c);
                continue;
            }
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    result.push('$');
                }
                Some('{') => {
                    chars.next();
                    let spec = parse_var_spec(&mut chars, origin)?;
                    match std::env::var(&spec.name) {
                        Ok(value) => result.push_str(&value),
                        Err(_) => match spec.fallback {
                            Fallback::Default(default) => result.push_str(&default),
                            Fallback::Required(message) => {
                                return Err(ConfigError::EnvVarNotSet {
                                    var: spec.name,
                                    message,
                                });
                            }
                            Fallback::Empty => {
                                warn!(
                                    var = %spec.name,
                                    "environment variable not set, using empty string"
                                );
                                self.warnings.push(format!(
                                    "environment variable '{}' is not set, using empty string",
                                    spec.name
                                ));
                            }
                        },
                    }
                }
                _ => result.push(c),
            }
        }
        Ok(result)
    }
}

enum Fallback {
    Empty,
    Default(String),
    Required(String),
}

struct VarSpec {
    name: String,
    fallback: Fallback,
}

fn parse_var_spec(chars: &mut Peekable<Chars<'_>>, origin: &Path) -> Result<VarSpec, ConfigError> {
    let mut name = String::new();
    while let Some(c) = chars.next() {
        match c {
            '}' => {
                return Ok(VarSpec {
                    name,
                    fallback: Fallback::Empty,
                });
            }
            ':' if chars.peek() == Some(&'-') => {
                chars.next();
                let default = read_until_close(chars, origin)?;
                return Ok(VarSpec {
                    name,
                    fallback: Fallback::Default(default),
                });
            }
            ':' if chars.peek() == Some(&'?') => {
                chars.next();
                let message = read_until_close(chars, origin)?;
                return Ok(VarSpec {
                    name,
                    fallback: Fallback::Required(message),
                });
            }
            _ => name.push(c),
        }
    }
    Err(unclosed(origin, &name))
}

fn read_until_close(chars: &mut Peekable<Chars<'_>>, origin: &Path) -> Result<String, ConfigError> {
    let mut value = String::new();
    let mut depth = 1;
    for c in chars.by_ref() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(value);
                }
            }
            _ => {}
        }
        value.push(c);
    }
    Err(unclosed(origin, &value))
}

fn unclosed(origin: &Path, fragment: &str) -> ConfigError {
    ConfigError::ParseError {
        path: PathBuf::from(origin),
        line: None,
        message: format!("unclosed environment variable reference: ${{{fragment}"),
    }
}

/// Applies environment overrides looked up through `lookup`.
fn apply_overrides(
    config: &mut TrackerConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(MAX_DEPTH_ENV) {
        config.max_phase_depth = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: MAX_DEPTH_ENV.to_string(),
            value: raw.clone(),
            expected: "a positive integer".to_string(),
        })?;
    }
    Ok(())
}

/// Validates a configuration.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` for a zero `max_phase_depth`, a
/// verbosity above 3, or a logging target that is not a filter directive.
pub fn validate(config: &TrackerConfig) -> Result<(), ConfigError> {
    if config.max_phase_depth == 0 {
        return Err(ConfigError::InvalidValue {
            field: "max_phase_depth".to_string(),
            value: "0".to_string(),
            expected: "at least 1".to_string(),
        });
    }
    if config.logging.verbosity > MAX_VERBOSITY {
        return Err(ConfigError::InvalidValue {
            field: "logging.verbosity".to_string(),
            value: config.logging.verbosity.to_string(),
            expected: format!("at most {MAX_VERBOSITY}"),
        });
    }
    for target in &config.logging.targets {
        if let Err(e) = logging::parse_target_directive(target) {
            return Err(ConfigError::InvalidValue {
                field: "logging.targets".to_string(),
                value: target.clone(),
                expected: format!("a filter directive like 'module=level' ({e})"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> &'static Path {
        Path::new("tracker.yaml")
    }

    #[test]
    fn test_default_expansion_for_unset_var() {
        let mut loader = ConfigLoader::new();
        let config = loader
            .load_str(
                "max_phase_depth: ${PHASE_TRACKER_TEST_SURELY_UNSET_1:-12}",
                origin(),
            )
            .unwrap();
        assert_eq!(config.max_phase_depth, 12);
    }

    #[test]
    fn test_required_var_missing() {
        let mut loader = ConfigLoader::new();
        let err = loader
            .load_str(
                "max_phase_depth: ${PHASE_TRACKER_TEST_SURELY_UNSET_2:?depth required}",
                origin(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EnvVarNotSet { ref message, .. } if message == "depth required"
        ));
    }

    #[test]
    fn test_unset_var_warns() {
        let mut loader = ConfigLoader::new();
        loader
            .load_str(
                "logging:\n  verbosity: 1${PHASE_TRACKER_TEST_SURELY_UNSET_3}",
                origin(),
            )
            .unwrap();
        assert_eq!(loader.warnings().len(), 1);
    }

    #[test]
    fn test_dollar_escape() {
        let mut loader = ConfigLoader::new();
        let out = loader.substitute("a: $$b", origin()).unwrap();
        assert_eq!(out, "a: $b");
    }

    #[test]
    fn test_unclosed_reference() {
        let mut loader = ConfigLoader::new();
        assert!(matches!(
            loader.substitute("a: ${OPEN", origin()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_override_depth() {
        let mut config = TrackerConfig::default();
        apply_overrides(&mut config, |name| {
            (name == MAX_DEPTH_ENV).then(|| "8".to_string())
        })
        .unwrap();
        assert_eq!(config.max_phase_depth, 8);
    }

    #[test]
    fn test_override_rejects_garbage() {
        let mut config = TrackerConfig::default();
        let err = apply_overrides(&mut config, |_| Some("deep".to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_zero_depth_rejected() {
        let mut loader = ConfigLoader::new();
        let err = loader.load_str("max_phase_depth: 0", origin()).unwrap_err();
        assert!(err.to_string().contains("max_phase_depth"));
    }

    #[test]
    fn test_verbosity_bounded() {
        let mut loader = ConfigLoader::new();
        assert!(loader
            .load_str("logging:\n  verbosity: 4", origin())
            .is_err());
    }

    #[test]
    fn test_logging_targets_must_parse() {
        let mut loader = ConfigLoader::new();
        let config = loader
            .load_str("logging:
  targets: ['phase_tracker::phase=trace']", origin())
            .unwrap();
        assert_eq!(config.logging.targets.len(), 1);

        let err = loader
            .load_str("logging:
  targets: ['phase_tracker=loud']", origin())
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "logging.targets"
        ));
    }

    #[test]
    fn test_parse_error_reports_line() {
        let mut loader = ConfigLoader::new();
        let err = loader
            .load_str("max_phase_depth: 3\ncapture: [", origin())
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
