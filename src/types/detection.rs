//! Detection types: BugType taxonomy, AnomalyPattern, DetectionResult, BugReport

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FeatureVector, Metric};

// ============================================================================
// Bug taxonomy
// ============================================================================

/// Inferred class of fault.
///
/// The six named classes form the detector's taxonomy. Reports raised by
/// external callers may carry any other label, kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BugType {
    MemoryLeak,
    InfiniteLoop,
    Deadlock,
    ExceptionHandling,
    PerformanceDegradation,
    ResourceExhaustion,
    Unknown,
    Other(String),
}

impl BugType {
    /// Taxonomy lookup: which bug class a metric excursion points to.
    pub fn from_metric(metric: Metric) -> Self {
        match metric {
            Metric::MemoryUsage => BugType::MemoryLeak,
            Metric::CpuUsage => BugType::InfiniteLoop,
            Metric::DeadlockRisk => BugType::Deadlock,
            Metric::ErrorRate => BugType::ExceptionHandling,
            Metric::ResponseTime => BugType::PerformanceDegradation,
            Metric::QueueDepth => BugType::ResourceExhaustion,
            Metric::AnomalyScore => BugType::Unknown,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BugType::MemoryLeak => "memory_leak",
            BugType::InfiniteLoop => "infinite_loop",
            BugType::Deadlock => "deadlock",
            BugType::ExceptionHandling => "exception_handling",
            BugType::PerformanceDegradation => "performance_degradation",
            BugType::ResourceExhaustion => "resource_exhaustion",
            BugType::Unknown => "unknown",
            BugType::Other(label) => label,
        }
    }

    /// True for the six named taxonomy classes.
    pub fn is_known(&self) -> bool {
        !matches!(self, BugType::Unknown | BugType::Other(_))
    }

    /// Static remediation hint for this class.
    pub fn recommended_action(&self) -> &'static str {
        match self {
            BugType::MemoryLeak => "Release retained references and bound cache growth",
            BugType::InfiniteLoop => "Add iteration limits and a watchdog timeout to the hot loop",
            BugType::Deadlock => "Enforce a global lock order and use timed lock acquisition",
            BugType::ExceptionHandling => "Wrap the failing call path with error handling and fallbacks",
            BugType::PerformanceDegradation => "Add timeouts and move slow work off the request path",
            BugType::ResourceExhaustion => "Apply backpressure and release pooled resources promptly",
            BugType::Unknown | BugType::Other(_) => "Collect diagnostics and escalate for manual review",
        }
    }
}

impl From<String> for BugType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "memory_leak" => BugType::MemoryLeak,
            "infinite_loop" => BugType::InfiniteLoop,
            "deadlock" => BugType::Deadlock,
            "exception_handling" => BugType::ExceptionHandling,
            "performance_degradation" => BugType::PerformanceDegradation,
            "resource_exhaustion" => BugType::ResourceExhaustion,
            "unknown" | "" => BugType::Unknown,
            _ => BugType::Other(s),
        }
    }
}

impl From<&str> for BugType {
    fn from(s: &str) -> Self {
        BugType::from(s.to_string())
    }
}

impl From<BugType> for String {
    fn from(b: BugType) -> Self {
        b.as_str().to_string()
    }
}

impl std::fmt::Display for BugType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Severity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map a detection confidence onto a severity band.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.95 {
            Severity::Critical
        } else if confidence >= 0.85 {
            Severity::High
        } else if confidence >= 0.7 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

// ============================================================================
// Anomaly patterns
// ============================================================================

/// A labelled point in feature space remembered by the pattern library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyPattern {
    pub id: String,
    pub feature_vector: FeatureVector,
    pub severity: Severity,
    /// Times this pattern has been observed (merges included)
    pub frequency: u64,
    pub last_seen: DateTime<Utc>,
    /// Whether a real fault accompanied this pattern
    pub bug_occurred: bool,
}

// ============================================================================
// Detection output
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub is_anomaly: bool,
    /// 0..=1
    pub confidence: f64,
    /// Raw isolation-forest score (0..=1, higher = easier to isolate)
    pub forest_score: f64,
    pub matched_pattern_id: Option<String>,
    /// Cosine similarity of the matched pattern
    pub similarity: Option<f64>,
    pub inferred_bug_type: Option<BugType>,
    pub recommended_action: Option<String>,
}

impl DetectionResult {
    pub fn normal(forest_score: f64) -> Self {
        Self {
            is_anomaly: false,
            confidence: forest_score.clamp(0.0, 1.0),
            forest_score,
            matched_pattern_id: None,
            similarity: None,
            inferred_bug_type: None,
            recommended_action: None,
        }
    }
}

/// A fault worth remediating, raised from a confident detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugReport {
    pub id: String,
    pub message: String,
    /// Component or code location the fault is attributed to
    pub location: String,
    pub bug_type: BugType,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bug_type_string_roundtrip() {
        for label in [
            "memory_leak",
            "infinite_loop",
            "deadlock",
            "exception_handling",
            "performance_degradation",
            "resource_exhaustion",
            "unknown",
        ] {
            assert_eq!(BugType::from(label).as_str(), label);
        }
        let other = BugType::from("null_reference");
        assert_eq!(other, BugType::Other("null_reference".to_string()));
        assert!(!other.is_known());
    }

    #[test]
    fn test_bug_type_serializes_as_plain_string() {
        let json = serde_json::to_string(&BugType::MemoryLeak).unwrap();
        assert_eq!(json, "\"memory_leak\"");
        let back: BugType = serde_json::from_str("\"race_in_cache\"").unwrap();
        assert_eq!(back.as_str(), "race_in_cache");
    }

    #[test]
    fn test_taxonomy_mapping() {
        assert_eq!(BugType::from_metric(Metric::MemoryUsage), BugType::MemoryLeak);
        assert_eq!(BugType::from_metric(Metric::CpuUsage), BugType::InfiniteLoop);
        assert_eq!(BugType::from_metric(Metric::QueueDepth), BugType::ResourceExhaustion);
        assert_eq!(BugType::from_metric(Metric::AnomalyScore), BugType::Unknown);
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(Severity::from_confidence(0.99), Severity::Critical);
        assert_eq!(Severity::from_confidence(0.9), Severity::High);
        assert_eq!(Severity::from_confidence(0.75), Severity::Medium);
        assert_eq!(Severity::from_confidence(0.1), Severity::Low);
    }
}
