//! Config loading tests
//!
//! File loading, the global accessor, and how typos and bad values surface.

use std::io::Write;

use mender::config::validation::{validate_operating_ranges, validate_unknown_keys};
use mender::config::{self, ConfigError, EngineConfig};

fn ensure_config() {
    if !config::is_initialized() {
        config::init(EngineConfig::default());
    }
}

#[test]
fn global_config_is_available_after_init() {
    ensure_config();
    assert!(config::is_initialized());
    assert_eq!(config::get().healing.min_detection_confidence, 0.7);
    // a second init is ignored rather than replacing the global
    config::init(EngineConfig::default());
    assert_eq!(config::get().detector.num_trees, 100);
}

#[test]
fn load_from_file_applies_overrides() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[detector]
num_trees = 50
seed = 7

[sandbox]
interpreter = ["bash", "--noprofile"]
default_timeout_ms = 2000

[monitor.thresholds.error_rate]
alert = 3.0
critical = 8.0
"#
    )
    .unwrap();

    let cfg = EngineConfig::load_from_file(file.path()).unwrap();
    assert_eq!(cfg.detector.num_trees, 50);
    assert_eq!(cfg.detector.seed, Some(7));
    assert_eq!(cfg.sandbox.interpreter, vec!["bash", "--noprofile"]);
    assert_eq!(cfg.sandbox.default_timeout_ms, 2000);
    assert_eq!(cfg.monitor.thresholds.tier(mender::types::Metric::ErrorRate).critical, 8.0);
    // untouched sections keep their defaults
    assert_eq!(cfg.healing.tick_interval_ms, 5_000);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = EngineConfig::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(..)));
}

#[test]
fn parse_error_names_the_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[detector\nnum_trees = ").unwrap();
    let err = EngineConfig::load_from_file(file.path()).unwrap_err();
    match err {
        ConfigError::Parse(path, _) => assert_eq!(path, file.path()),
        other => panic!("expected parse error, got {other}"),
    }
}

#[test]
fn inverted_tiers_fail_validation() {
    let err = EngineConfig::from_toml_str(
        r#"
[monitor.thresholds.response_time]
alert = 5000.0
critical = 1000.0
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
    assert!(err.to_string().contains("response_time"));
}

#[test]
fn sandbox_typo_suggests_real_key() {
    let warnings = validate_unknown_keys("[sandbox]\nmemory_limt_mb = 128\n");
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("sandbox.memory_limit_mb")
    );
}

#[test]
fn tiny_memory_limit_is_flagged_but_loads() {
    let cfg = EngineConfig::from_toml_str("[sandbox]\nmemory_limit_mb = 4\n").unwrap();
    let warnings = validate_operating_ranges(&cfg);
    assert!(warnings.iter().any(|w| w.field == "sandbox.memory_limit_mb"));
}
