//! Config validation: unknown-key detection with Levenshtein suggestions
//! and operating-range sanity checks.
//!
//! The raw TOML is walked as a `toml::Value` tree first and every dotted key
//! is compared against the known field set, so typos surface as warnings with
//! a "did you mean?" hint. Warnings never break an otherwise valid config.

use std::collections::HashSet;

use crate::types::Metric;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

const SECTION_KEYS: &[(&str, &[&str])] = &[
    (
        "monitor",
        &["sample_interval_ms", "window_size", "emergency_multiplier", "trend_tolerance", "thresholds"],
    ),
    (
        "detector",
        &[
            "num_trees",
            "max_samples",
            "anomaly_threshold",
            "similarity_threshold",
            "z_threshold",
            "seed",
            "min_training_samples",
            "retrain_interval_ticks",
            "inference",
            "seed_library",
            "envelope",
        ],
    ),
    (
        "sandbox",
        &[
            "interpreter",
            "default_timeout_ms",
            "max_timeout_ms",
            "memory_limit_mb",
            "max_open_files",
            "max_file_size_kb",
            "max_output_bytes",
            "regression_tolerance",
            "min_pass_rate",
        ],
    ),
    (
        "healing",
        &[
            "tick_interval_ms",
            "min_detection_confidence",
            "min_validation_confidence",
            "event_log_capacity",
            "journal_path",
            "test_suite_path",
            "default_location",
        ],
    ),
    ("storage", &["backend", "path"]),
    ("server", &["enabled", "addr"]),
];

/// Returns the complete set of valid dotted key paths for `EngineConfig`.
///
/// Per-metric tables (`monitor.thresholds.*`, `detector.envelope.*`) are
/// expanded from `Metric::ALL`; everything else must be listed in
/// `SECTION_KEYS` when a field is added to engine_config.rs.
pub fn known_config_keys() -> HashSet<String> {
    let mut keys = HashSet::new();
    for (section, fields) in SECTION_KEYS {
        keys.insert((*section).to_string());
        for field in *fields {
            keys.insert(format!("{section}.{field}"));
        }
    }
    for metric in Metric::ALL {
        let tier = format!("monitor.thresholds.{}", metric.as_str());
        keys.insert(format!("{tier}.alert"));
        keys.insert(format!("{tier}.critical"));
        keys.insert(tier);
        keys.insert(format!("detector.envelope.{}", metric.as_str()));
    }
    keys
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// A table `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
            keys.push(path);
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Closest known key within edit distance 3. Ties resolve alphabetically.
pub fn suggest_correction(unknown: &str, known: &HashSet<String>) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.clone())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are reported by serde
    };

    let known = known_config_keys();
    let mut found = walk_toml_keys(&value, "");
    found.sort();

    found
        .into_iter()
        .filter(|key| !known.contains(key))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Operating Range Checks
// ============================================================================

/// Flag values that parse and validate but are unlikely to be intended.
pub fn validate_operating_ranges(config: &super::EngineConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let mut warn = |field: &str, message: String| {
        warnings.push(ValidationWarning {
            field: field.to_string(),
            message,
            suggestion: None,
        });
    };

    let t = &config.monitor.thresholds;
    for metric in [Metric::CpuUsage, Metric::MemoryUsage, Metric::DeadlockRisk] {
        let tier = t.tier(metric);
        if tier.alert > 1.0 {
            warn(
                metric.as_str(),
                format!(
                    "monitor.thresholds.{}.alert = {} but the metric is a 0-1 fraction; alerts will never fire",
                    metric.as_str(),
                    tier.alert
                ),
            );
        }
    }

    let s = &config.sandbox;
    if s.memory_limit_mb < 16 {
        warn(
            "sandbox.memory_limit_mb",
            format!("sandbox.memory_limit_mb = {} is too small for most interpreters to start", s.memory_limit_mb),
        );
    }
    if s.max_timeout_ms > 600_000 {
        warn(
            "sandbox.max_timeout_ms",
            format!("sandbox.max_timeout_ms = {} lets one test stall a healing tick for over 10 minutes", s.max_timeout_ms),
        );
    }

    let d = &config.detector;
    if d.num_trees < 10 {
        warn(
            "detector.num_trees",
            format!("detector.num_trees = {} gives very noisy isolation scores", d.num_trees),
        );
    }
    if d.similarity_threshold < 0.5 {
        warn(
            "detector.similarity_threshold",
            format!(
                "detector.similarity_threshold = {} will merge unrelated patterns",
                d.similarity_threshold
            ),
        );
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("window", "window"), 0);
        assert_eq!(levenshtein("num_tress", "num_trees"), 2);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [monitor.thresholds.cpu_usage]
            alert = 0.7
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"monitor".to_string()));
        assert!(keys.contains(&"monitor.thresholds".to_string()));
        assert!(keys.contains(&"monitor.thresholds.cpu_usage.alert".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[detector]
similarity_treshold = 0.9
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("detector.similarity_threshold")
        );
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let toml_str = r#"
[monitor]
window_size = 50

[monitor.thresholds.error_rate]
alert = 2.0
critical = 10.0

[detector]
seed = 42
inference = "strongest"

[detector.envelope]
cpu_usage = [0.1, 0.4]

[sandbox]
interpreter = ["sh", "-e"]

[storage]
backend = "sled"
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {warnings:?}");
    }

    #[test]
    fn test_unknown_section_produces_warning() {
        let warnings = validate_unknown_keys("[metrics]\nport = 9090\n");
        assert!(warnings.iter().any(|w| w.field == "metrics"));
        assert!(warnings.iter().any(|w| w.field == "metrics.port"));
    }

    #[test]
    fn test_defaults_have_no_range_warnings() {
        let warnings = validate_operating_ranges(&crate::config::EngineConfig::default());
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn test_fraction_metric_above_one_warns() {
        let mut config = crate::config::EngineConfig::default();
        config.monitor.thresholds.cpu_usage.alert = 80.0;
        config.monitor.thresholds.cpu_usage.critical = 95.0;
        let warnings = validate_operating_ranges(&config);
        assert!(warnings.iter().any(|w| w.field == "cpu_usage"));
    }
}
