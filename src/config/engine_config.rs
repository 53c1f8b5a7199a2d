//! Engine Configuration - every remediation threshold as an operator-tunable TOML value
//!
//! Each struct implements `Default` with the documented engine defaults,
//! so an empty or missing config file yields a working engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::types::{Metric, FEATURE_DIM};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MENDER_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "mender.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one engine instance.
///
/// Load with `EngineConfig::load()` which searches:
/// 1. `$MENDER_CONFIG` env var
/// 2. `./mender.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub healing: HealingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl EngineConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded engine config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded engine config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&contents)
            .map_err(|e| match e {
                ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
                other => other,
            })?;
        Ok(config)
    }

    /// Parse and validate a TOML document. Unknown keys are logged, not rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        for w in super::validation::validate_operating_ranges(&config) {
            warn!("{}", w);
        }
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate thresholds for internal consistency.
    ///
    /// Rules:
    /// - Critical tiers must be >= alert tiers
    /// - Probabilities and rates must lie in [0, 1]
    /// - Counts, windows and timeouts must be > 0
    /// - Normal envelope ranges must be ordered
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let m = &self.monitor;
        for metric in Metric::ALL {
            let tier = m.thresholds.tier(metric);
            Self::check_escalation(tier.alert, tier.critical, metric.as_str(), &mut errors);
        }
        if m.window_size < 3 {
            errors.push(format!("monitor.window_size ({}) must be >= 3", m.window_size));
        }
        if m.sample_interval_ms == 0 {
            errors.push("monitor.sample_interval_ms must be > 0".to_string());
        }
        if !m.emergency_multiplier.is_finite() || m.emergency_multiplier < 1.0 {
            errors.push(format!(
                "monitor.emergency_multiplier ({}) must be >= 1.0",
                m.emergency_multiplier
            ));
        }
        Self::check_unit("monitor.trend_tolerance", m.trend_tolerance, &mut errors);

        let d = &self.detector;
        if d.num_trees == 0 {
            errors.push("detector.num_trees must be > 0".to_string());
        }
        if d.max_samples < 2 {
            errors.push(format!("detector.max_samples ({}) must be >= 2", d.max_samples));
        }
        if d.min_training_samples < 2 {
            errors.push(format!(
                "detector.min_training_samples ({}) must be >= 2",
                d.min_training_samples
            ));
        }
        Self::check_unit("detector.anomaly_threshold", d.anomaly_threshold, &mut errors);
        Self::check_unit("detector.similarity_threshold", d.similarity_threshold, &mut errors);
        if !d.z_threshold.is_finite() || d.z_threshold <= 0.0 {
            errors.push(format!("detector.z_threshold ({}) must be > 0", d.z_threshold));
        }
        for metric in Metric::ALL {
            let [low, high] = d.envelope.range(metric);
            if !low.is_finite() || !high.is_finite() || high <= low {
                errors.push(format!(
                    "detector.envelope.{}: expected [low, high] with high > low (got [{low}, {high}])",
                    metric.as_str()
                ));
            }
        }

        let s = &self.sandbox;
        if s.interpreter.is_empty() {
            errors.push("sandbox.interpreter must name at least one program".to_string());
        }
        if s.default_timeout_ms == 0 || s.max_timeout_ms == 0 {
            errors.push("sandbox timeouts must be > 0".to_string());
        }
        if s.default_timeout_ms > s.max_timeout_ms {
            errors.push(format!(
                "sandbox.default_timeout_ms ({}) must be <= max_timeout_ms ({})",
                s.default_timeout_ms, s.max_timeout_ms
            ));
        }
        Self::check_unit("sandbox.min_pass_rate", s.min_pass_rate, &mut errors);
        if !s.regression_tolerance.is_finite() || s.regression_tolerance < 0.0 {
            errors.push(format!(
                "sandbox.regression_tolerance ({}) must be >= 0",
                s.regression_tolerance
            ));
        }

        let h = &self.healing;
        if h.tick_interval_ms == 0 {
            errors.push("healing.tick_interval_ms must be > 0".to_string());
        }
        if h.event_log_capacity == 0 {
            errors.push("healing.event_log_capacity must be > 0".to_string());
        }
        Self::check_unit("healing.min_detection_confidence", h.min_detection_confidence, &mut errors);
        Self::check_unit("healing.min_validation_confidence", h.min_validation_confidence, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_escalation(alert: f64, critical: f64, name: &str, errors: &mut Vec<String>) {
        // NaN/Inf slip through the ordering checks below
        if !alert.is_finite() || !critical.is_finite() {
            errors.push(format!(
                "{name}: values must be finite (got alert={alert}, critical={critical})"
            ));
            return;
        }
        if critical < alert {
            errors.push(format!(
                "{name}: critical ({critical:.3}) must be >= alert ({alert:.3})"
            ));
        }
    }

    fn check_unit(name: &str, value: f64, errors: &mut Vec<String>) {
        if !(0.0..=1.0).contains(&value) {
            errors.push(format!("{name} ({value}) must be within [0, 1]"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Monitor Config
// ============================================================================

/// Two alert tiers for one metric, in the metric's raw units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub alert: f64,
    pub critical: f64,
}

impl Tier {
    pub const fn new(alert: f64, critical: f64) -> Self {
        Self { alert, critical }
    }
}

/// Alert tiers for every metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricThresholds {
    #[serde(default = "default_cpu_tier")]
    pub cpu_usage: Tier,
    #[serde(default = "default_memory_tier")]
    pub memory_usage: Tier,
    /// Percent of requests failing
    #[serde(default = "default_error_rate_tier")]
    pub error_rate: Tier,
    /// Milliseconds
    #[serde(default = "default_response_time_tier")]
    pub response_time: Tier,
    #[serde(default = "default_queue_depth_tier")]
    pub queue_depth: Tier,
    #[serde(default = "default_deadlock_tier")]
    pub deadlock_risk: Tier,
    /// Standard deviations
    #[serde(default = "default_anomaly_score_tier")]
    pub anomaly_score: Tier,
}

fn default_cpu_tier() -> Tier { Tier::new(0.80, 0.95) }
fn default_memory_tier() -> Tier { Tier::new(0.85, 0.95) }
fn default_error_rate_tier() -> Tier { Tier::new(5.0, 15.0) }
fn default_response_time_tier() -> Tier { Tier::new(1_000.0, 5_000.0) }
fn default_queue_depth_tier() -> Tier { Tier::new(50.0, 100.0) }
fn default_deadlock_tier() -> Tier { Tier::new(0.30, 0.60) }
fn default_anomaly_score_tier() -> Tier { Tier::new(3.0, 5.0) }

impl Default for MetricThresholds {
    fn default() -> Self {
        Self {
            cpu_usage: default_cpu_tier(),
            memory_usage: default_memory_tier(),
            error_rate: default_error_rate_tier(),
            response_time: default_response_time_tier(),
            queue_depth: default_queue_depth_tier(),
            deadlock_risk: default_deadlock_tier(),
            anomaly_score: default_anomaly_score_tier(),
        }
    }
}

impl MetricThresholds {
    pub fn tier(&self, metric: Metric) -> Tier {
        match metric {
            Metric::CpuUsage => self.cpu_usage,
            Metric::MemoryUsage => self.memory_usage,
            Metric::ErrorRate => self.error_rate,
            Metric::ResponseTime => self.response_time,
            Metric::QueueDepth => self.queue_depth,
            Metric::DeadlockRisk => self.deadlock_risk,
            Metric::AnomalyScore => self.anomaly_score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sampling cadence (ms)
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Rolling window capacity (samples); oldest evicted on overflow
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// A value at or above `critical × emergency_multiplier` is an emergency
    #[serde(default = "default_emergency_multiplier")]
    pub emergency_multiplier: f64,

    /// Relative change below which a trend is reported as stable
    #[serde(default = "default_trend_tolerance")]
    pub trend_tolerance: f64,

    #[serde(default)]
    pub thresholds: MetricThresholds,
}

fn default_sample_interval_ms() -> u64 { 1_000 }
fn default_window_size() -> usize { super::defaults::HEALTH_WINDOW_SIZE }
fn default_emergency_multiplier() -> f64 { 1.5 }
fn default_trend_tolerance() -> f64 { 0.05 }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            window_size: default_window_size(),
            emergency_multiplier: default_emergency_multiplier(),
            trend_tolerance: default_trend_tolerance(),
            thresholds: MetricThresholds::default(),
        }
    }
}

// ============================================================================
// Detector Config
// ============================================================================

/// How a bug class is picked once a bug pattern matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceStrategy {
    /// First metric (in vector order) whose z exceeds the threshold
    #[default]
    FirstExceeding,
    /// Metric with the largest z above the threshold
    Strongest,
}

/// Expected operating range per metric, `[low, high]` in raw units.
///
/// Used as the detector's reference frame before it has been trained,
/// to seed the default pattern library, and by the synthetic source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalEnvelope {
    #[serde(default = "default_env_cpu")]
    pub cpu_usage: [f64; 2],
    #[serde(default = "default_env_memory")]
    pub memory_usage: [f64; 2],
    #[serde(default = "default_env_error_rate")]
    pub error_rate: [f64; 2],
    #[serde(default = "default_env_response_time")]
    pub response_time: [f64; 2],
    #[serde(default = "default_env_queue_depth")]
    pub queue_depth: [f64; 2],
    #[serde(default = "default_env_deadlock")]
    pub deadlock_risk: [f64; 2],
    #[serde(default = "default_env_anomaly_score")]
    pub anomaly_score: [f64; 2],
}

fn default_env_cpu() -> [f64; 2] { [0.3, 0.5] }
fn default_env_memory() -> [f64; 2] { [0.4, 0.6] }
fn default_env_error_rate() -> [f64; 2] { [0.0, 2.0] }
fn default_env_response_time() -> [f64; 2] { [100.0, 300.0] }
fn default_env_queue_depth() -> [f64; 2] { [0.0, 10.0] }
fn default_env_deadlock() -> [f64; 2] { [0.0, 0.1] }
fn default_env_anomaly_score() -> [f64; 2] { [0.0, 2.0] }

impl Default for NormalEnvelope {
    fn default() -> Self {
        Self {
            cpu_usage: default_env_cpu(),
            memory_usage: default_env_memory(),
            error_rate: default_env_error_rate(),
            response_time: default_env_response_time(),
            queue_depth: default_env_queue_depth(),
            deadlock_risk: default_env_deadlock(),
            anomaly_score: default_env_anomaly_score(),
        }
    }
}

impl NormalEnvelope {
    pub fn range(&self, metric: Metric) -> [f64; 2] {
        match metric {
            Metric::CpuUsage => self.cpu_usage,
            Metric::MemoryUsage => self.memory_usage,
            Metric::ErrorRate => self.error_rate,
            Metric::ResponseTime => self.response_time,
            Metric::QueueDepth => self.queue_depth,
            Metric::DeadlockRisk => self.deadlock_risk,
            Metric::AnomalyScore => self.anomaly_score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Trees in the isolation forest
    #[serde(default = "default_num_trees")]
    pub num_trees: usize,

    /// Upper bound on the per-tree subsample. Defaults to twice the
    /// feature count.
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    /// Forest score above which a vector is anomalous
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,

    /// Cosine similarity at or above which a pattern matches / merges
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// z above which a metric counts as exceeding during bug-type inference
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,

    /// Fixed RNG seed for reproducible forests (random when unset)
    #[serde(default)]
    pub seed: Option<u64>,

    /// Samples required before the forest is (re)trained from live data
    #[serde(default = "default_min_training_samples")]
    pub min_training_samples: usize,

    /// Retrain from the monitor window every N healing ticks (0 = never)
    #[serde(default = "default_retrain_interval_ticks")]
    pub retrain_interval_ticks: u64,

    #[serde(default)]
    pub inference: InferenceStrategy,

    /// Seed the library with one bug signature per taxonomy class
    #[serde(default = "default_seed_library")]
    pub seed_library: bool,

    #[serde(default)]
    pub envelope: NormalEnvelope,
}

fn default_num_trees() -> usize { 100 }
fn default_max_samples() -> usize { 2 * FEATURE_DIM }
fn default_anomaly_threshold() -> f64 { 0.6 }
fn default_similarity_threshold() -> f64 { 0.8 }
fn default_z_threshold() -> f64 { 2.0 }
fn default_min_training_samples() -> usize { 8 }
fn default_retrain_interval_ticks() -> u64 { 60 }
fn default_seed_library() -> bool { true }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            num_trees: default_num_trees(),
            max_samples: default_max_samples(),
            anomaly_threshold: default_anomaly_threshold(),
            similarity_threshold: default_similarity_threshold(),
            z_threshold: default_z_threshold(),
            seed: None,
            min_training_samples: default_min_training_samples(),
            retrain_interval_ticks: default_retrain_interval_ticks(),
            inference: InferenceStrategy::default(),
            seed_library: default_seed_library(),
            envelope: NormalEnvelope::default(),
        }
    }
}

// ============================================================================
// Sandbox Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Program and leading arguments; the candidate source file is appended
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,

    /// Timeout for test cases that declare none (ms)
    #[serde(default = "default_test_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Hard ceiling on any single test (ms)
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,

    /// Address-space cap for the child (MiB)
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,

    #[serde(default = "default_max_open_files")]
    pub max_open_files: u64,

    /// Largest file the child may write (KiB)
    #[serde(default = "default_max_file_size_kb")]
    pub max_file_size_kb: u64,

    /// Stdout beyond this many bytes is discarded
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Fractional slowdown over baseline that counts as a regression
    #[serde(default = "default_regression_tolerance")]
    pub regression_tolerance: f64,

    #[serde(default = "default_min_pass_rate")]
    pub min_pass_rate: f64,
}

fn default_interpreter() -> Vec<String> { vec!["sh".to_string()] }
fn default_test_timeout_ms() -> u64 { 5_000 }
fn default_max_timeout_ms() -> u64 { 30_000 }
fn default_memory_limit_mb() -> u64 { 256 }
fn default_max_open_files() -> u64 { 32 }
fn default_max_file_size_kb() -> u64 { 1_024 }
fn default_max_output_bytes() -> usize { 64 * 1024 }
fn default_regression_tolerance() -> f64 { 0.2 }
fn default_min_pass_rate() -> f64 { 0.8 }

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            default_timeout_ms: default_test_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            memory_limit_mb: default_memory_limit_mb(),
            max_open_files: default_max_open_files(),
            max_file_size_kb: default_max_file_size_kb(),
            max_output_bytes: default_max_output_bytes(),
            regression_tolerance: default_regression_tolerance(),
            min_pass_rate: default_min_pass_rate(),
        }
    }
}

// ============================================================================
// Healing Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    /// Healing tick cadence (ms)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Detection confidence that must be exceeded to raise a bug report
    #[serde(default = "default_min_detection_confidence")]
    pub min_detection_confidence: f64,

    /// Validation confidence that must be exceeded before apply
    #[serde(default = "default_min_validation_confidence")]
    pub min_validation_confidence: f64,

    /// Audit log ring-buffer capacity
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,

    /// JSONL journal written by the default apply mechanism
    #[serde(default = "default_journal_path")]
    pub journal_path: String,

    /// Optional JSON list of regression tests handed to the sandbox
    #[serde(default)]
    pub test_suite_path: Option<String>,

    /// Location attributed to detected bugs when nothing more specific is known
    #[serde(default = "default_location")]
    pub default_location: String,
}

fn default_tick_interval_ms() -> u64 { 5_000 }
fn default_min_detection_confidence() -> f64 { 0.7 }
fn default_min_validation_confidence() -> f64 { 0.7 }
fn default_event_log_capacity() -> usize { super::defaults::EVENT_LOG_CAPACITY }
fn default_journal_path() -> String { "data/apply_journal.jsonl".to_string() }
fn default_location() -> String { "service".to_string() }

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            min_detection_confidence: default_min_detection_confidence(),
            min_validation_confidence: default_min_validation_confidence(),
            event_log_capacity: default_event_log_capacity(),
            journal_path: default_journal_path(),
            test_suite_path: None,
            default_location: default_location(),
        }
    }
}

// ============================================================================
// Storage Config
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Single JSON record list
    #[default]
    Json,
    /// Embedded sled database
    Sled,
    /// Not durable
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// File (json) or directory (sled) holding the pattern library
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String { "data/patterns.json".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

// ============================================================================
// Server Config
// ============================================================================

/// HTTP status surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,

    /// Can be overridden by `--addr`.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_enabled() -> bool { true }
fn default_server_addr() -> String { "127.0.0.1:8080".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: EngineConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config.detector.num_trees, 100);
        assert_eq!(config.detector.anomaly_threshold, 0.6);
        assert_eq!(config.detector.similarity_threshold, 0.8);
        assert_eq!(config.sandbox.regression_tolerance, 0.2);
        assert_eq!(config.healing.event_log_capacity, 1000);
        assert_eq!(config.monitor.thresholds.error_rate, Tier::new(5.0, 15.0));
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[detector]
num_trees = 50
seed = 7

[monitor.thresholds.response_time]
alert = 500.0
critical = 2000.0
"#;
        let config: EngineConfig = toml::from_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.detector.num_trees, 50);
        assert_eq!(config.detector.seed, Some(7));
        assert_eq!(config.monitor.thresholds.response_time, Tier::new(500.0, 2000.0));
        // Non-overridden values retain defaults
        assert_eq!(config.monitor.thresholds.cpu_usage, Tier::new(0.80, 0.95));
        assert_eq!(config.detector.max_samples, 14);
    }

    #[test]
    fn test_validation_catches_inverted_tiers() {
        let mut config = EngineConfig::default();
        config.monitor.thresholds.queue_depth = Tier::new(100.0, 50.0);
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("queue_depth")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_catches_out_of_range_thresholds() {
        let mut config = EngineConfig::default();
        config.detector.similarity_threshold = 1.5;
        config.healing.min_validation_confidence = -0.1;
        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_validation_catches_bad_envelope() {
        let mut config = EngineConfig::default();
        config.detector.envelope.response_time = [300.0, 100.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_empty_interpreter() {
        let mut config = EngineConfig::default();
        config.sandbox.interpreter.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_toml() {
        let original = EngineConfig::default();
        let toml_str = original.to_toml().expect("serialization should work");
        assert!(toml_str.contains("[monitor.thresholds.cpu_usage]"));
        assert!(toml_str.contains("[detector.envelope]"));
        let back = EngineConfig::from_toml_str(&toml_str).expect("roundtrip should validate");
        assert_eq!(back.sandbox.interpreter, original.sandbox.interpreter);
        assert_eq!(back.storage.backend, StorageBackend::Json);
    }
}
