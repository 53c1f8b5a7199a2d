//! Health sampling types: Metric, HealthMetrics, Alert, Trend, HealthReport

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of features in a health feature vector.
pub const FEATURE_DIM: usize = 7;

/// Fixed-order feature vector built from [`HealthMetrics`].
pub type FeatureVector = [f64; FEATURE_DIM];

// ============================================================================
// Metric identifiers
// ============================================================================

/// Whether a rising value is bad news or good news for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    /// Rising values are degradation (error rate, latency, ...)
    HigherIsWorse,
    /// Rising values are improvement (throughput, headroom, ...)
    LowerIsWorse,
}

/// One of the seven health metrics.
///
/// The declaration order is the feature-vector order and must never change:
/// persisted anomaly patterns depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CpuUsage,
    MemoryUsage,
    ErrorRate,
    ResponseTime,
    QueueDepth,
    DeadlockRisk,
    AnomalyScore,
}

impl Metric {
    /// All metrics in feature-vector order.
    pub const ALL: [Metric; FEATURE_DIM] = [
        Metric::CpuUsage,
        Metric::MemoryUsage,
        Metric::ErrorRate,
        Metric::ResponseTime,
        Metric::QueueDepth,
        Metric::DeadlockRisk,
        Metric::AnomalyScore,
    ];

    /// The six metrics that are sampled (everything except the computed score).
    pub const SAMPLED: [Metric; 6] = [
        Metric::CpuUsage,
        Metric::MemoryUsage,
        Metric::ErrorRate,
        Metric::ResponseTime,
        Metric::QueueDepth,
        Metric::DeadlockRisk,
    ];

    /// Position of this metric in a [`FeatureVector`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::CpuUsage => "cpu_usage",
            Metric::MemoryUsage => "memory_usage",
            Metric::ErrorRate => "error_rate",
            Metric::ResponseTime => "response_time",
            Metric::QueueDepth => "queue_depth",
            Metric::DeadlockRisk => "deadlock_risk",
            Metric::AnomalyScore => "anomaly_score",
        }
    }

    pub fn polarity(self) -> Polarity {
        match self {
            Metric::CpuUsage
            | Metric::MemoryUsage
            | Metric::ErrorRate
            | Metric::ResponseTime
            | Metric::QueueDepth
            | Metric::DeadlockRisk
            | Metric::AnomalyScore => Polarity::HigherIsWorse,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// HealthMetrics
// ============================================================================

/// One health sample.
///
/// Values are recorded in the units the metric source reports them in
/// (utilisation fractions, error percentage, milliseconds, queue length).
/// `anomaly_score` is computed by the monitor and ignored on input.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthMetrics {
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub response_time: f64,
    #[serde(default)]
    pub queue_depth: f64,
    #[serde(default)]
    pub deadlock_risk: f64,
    #[serde(default)]
    pub anomaly_score: f64,
}

impl HealthMetrics {
    pub fn get(&self, metric: Metric) -> f64 {
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

    pub fn set(&mut self, metric: Metric, value: f64) {
        match metric {
            Metric::CpuUsage => self.cpu_usage = value,
            Metric::MemoryUsage => self.memory_usage = value,
            Metric::ErrorRate => self.error_rate = value,
            Metric::ResponseTime => self.response_time = value,
            Metric::QueueDepth => self.queue_depth = value,
            Metric::DeadlockRisk => self.deadlock_risk = value,
            Metric::AnomalyScore => self.anomaly_score = value,
        }
    }

    /// Encode as a fixed-order feature vector.
    pub fn to_vector(&self) -> FeatureVector {
        let mut v = [0.0; FEATURE_DIM];
        for metric in Metric::ALL {
            v[metric.index()] = self.get(metric);
        }
        v
    }

    /// Decode from a fixed-order feature vector.
    pub fn from_vector(v: &FeatureVector) -> Self {
        let mut m = Self::default();
        for metric in Metric::ALL {
            m.set(metric, v[metric.index()]);
        }
        m
    }

    /// True when every sampled value is finite.
    pub fn is_finite(&self) -> bool {
        Metric::SAMPLED.iter().all(|&m| self.get(m).is_finite())
    }
}

/// A timestamped sample held in the monitor's rolling window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthSample {
    pub timestamp: DateTime<Utc>,
    pub metrics: HealthMetrics,
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
    Emergency,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
            AlertSeverity::Emergency => write!(f, "EMERGENCY"),
        }
    }
}

/// A metric that crossed one of its alert tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub metric: Metric,
    pub value: f64,
    /// The tier boundary that was crossed
    pub threshold: f64,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Health report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

/// Snapshot of system health derived from the rolling window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub current: HealthMetrics,
    pub trends: BTreeMap<Metric, Trend>,
    pub alerts: Vec<Alert>,
    /// 0-100, 100 = no critical or emergency alerts
    pub health_score: f64,
    /// Samples currently in the window
    pub sample_count: usize,
}

impl HealthReport {
    /// Fixed-order feature vector of the current sample.
    pub fn feature_vector(&self) -> FeatureVector {
        self.current.to_vector()
    }

    pub fn count_alerts(&self, severity: AlertSeverity) -> usize {
        self.alerts.iter().filter(|a| a.severity == severity).count()
    }
}
