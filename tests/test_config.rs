//! Loading tracker configuration from disk and applying it.

mod common;

use std::io::Write;
use std::path::Path;

use common::Harness;
use phase_tracker::config::{ConfigLoader, DEFAULT_MAX_PHASE_DEPTH, TrackerConfig};
use phase_tracker::error::ConfigError;
use phase_tracker::observability::LogFormat;
use phase_tracker::phase::{PhaseState, TrackerSide};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        "max_phase_depth: 3\ncapture:\n  entities: false\nlogging:\n  format: json\n",
    );
    let config = ConfigLoader::new().load(file.path()).unwrap();
    assert_eq!(config.max_phase_depth, 3);
    assert!(config.capture.blocks);
    assert!(!config.capture.entities);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_bom_and_empty_document() {
    let file = write_config("\u{feff}");
    let config = ConfigLoader::new().load(file.path()).unwrap();
    assert_eq!(config, TrackerConfig::default());
    assert_eq!(config.max_phase_depth, DEFAULT_MAX_PHASE_DEPTH);
}

#[test]
fn test_missing_file() {
    let err = ConfigLoader::new()
        .load(Path::new("/definitely/not/here/tracker.yaml"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::MissingFile { .. }));
}

#[test]
fn test_unknown_key_rejected() {
    let file = write_config("max_phase_depth: 3\nmax_depth: 4\n");
    let err = ConfigLoader::new().load(file.path()).unwrap_err();
    let ConfigError::ParseError { message, .. } = err else {
        panic!("expected a parse error, got {err:?}");
    };
    assert!(message.contains("max_depth"));
}

#[test]
fn test_loaded_depth_limits_tracker() {
    let file = write_config("max_phase_depth: ${PHASE_TRACKER_IT_UNSET_DEPTH:-1}\n");
    let config = ConfigLoader::new().load(file.path()).unwrap();
    let h = Harness::with_config(TrackerSide::Server, &config);

    let mut first = PhaseState::Unknown.create_phase_context(&h.tracker);
    first.build_and_switch().unwrap();
    let mut second = PhaseState::Unknown.create_phase_context(&h.tracker);
    assert!(second.build_and_switch().is_err());
    first.close().unwrap();
}
