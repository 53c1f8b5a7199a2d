//! Health Monitor - rolling-window statistical process control
//!
//! Keeps a bounded window of raw health samples and derives from it:
//!
//! - `anomaly_score`: the largest |z| of any sampled metric against the
//!   window's own mean / sample standard deviation (0 below 3 samples)
//! - tiered alerts (warning / critical / emergency) per metric
//! - a per-metric trend from the last three samples
//! - a 0-100 health score penalising critical and emergency alerts
//!
//! The monitor only observes. Acting on a report is the coordinator's job.

mod history;

pub use history::HealthHistory;

use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::defaults::{
    CRITICAL_PENALTY, EMERGENCY_PENALTY, MIN_SAMPLES_FOR_ANOMALY_SCORE, TREND_SAMPLES,
};
use crate::config::MonitorConfig;
use crate::telemetry::{MetricEvent, MetricSource};
use crate::types::{
    Alert, AlertSeverity, FeatureVector, HealthMetrics, HealthReport, HealthSample, Metric,
    Polarity, Trend,
};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("No health samples recorded yet")]
    NoSamples,

    #[error("Sample rejected: {0} is not a finite number")]
    NonFinite(Metric),
}

/// Thread-safe health monitor. Writers (the sampling loop) and readers
/// (coordinator, HTTP handlers) share it behind an `Arc`.
pub struct HealthMonitor {
    config: MonitorConfig,
    history: RwLock<HealthHistory>,
}

impl HealthMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let history = RwLock::new(HealthHistory::new(config.window_size));
        Self { config, history }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    // ========================================================================
    // Sampling
    // ========================================================================

    /// Record one raw sample, computing its `anomaly_score` against the
    /// window that includes it. Any incoming `anomaly_score` is ignored.
    pub fn record(&self, metrics: HealthMetrics) -> Result<HealthSample, MonitorError> {
        self.record_at(metrics, Utc::now())
    }

    pub fn record_at(
        &self,
        mut metrics: HealthMetrics,
        timestamp: DateTime<Utc>,
    ) -> Result<HealthSample, MonitorError> {
        if let Some(bad) = Metric::SAMPLED.iter().find(|&&m| !metrics.get(m).is_finite()) {
            return Err(MonitorError::NonFinite(*bad));
        }
        metrics.anomaly_score = 0.0;

        let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
        history.push(HealthSample { timestamp, metrics });

        let score = anomaly_score(&history);
        if let Some(latest) = history.latest_mut() {
            latest.metrics.anomaly_score = score;
        }
        metrics.anomaly_score = score;
        let sample = HealthSample { timestamp, metrics };

        debug!(
            anomaly_score = score,
            window = history.len(),
            "Recorded health sample"
        );
        Ok(sample)
    }

    /// Pull from `source` on the configured cadence until cancelled or the
    /// source is exhausted. Source errors are logged and the loop continues.
    pub async fn run(&self, mut source: Box<dyn MetricSource>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(
            self.config.sample_interval_ms,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            source = source.source_name(),
            interval_ms = self.config.sample_interval_ms,
            "Health monitor started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = source.pull() => event,
            };

            match event {
                Ok(MetricEvent::Sample(metrics)) => {
                    if let Err(e) = self.record(metrics) {
                        warn!(source = source.source_name(), error = %e, "Dropping sample");
                    }
                }
                Ok(MetricEvent::Eof) => {
                    info!(source = source.source_name(), "Metric source exhausted");
                    break;
                }
                Err(e) => {
                    warn!(source = source.source_name(), error = %e, "Metric source error");
                }
            }
        }

        info!("Health monitor stopped");
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    /// Snapshot of current health. Fails when nothing has been sampled.
    pub fn health_report(&self) -> Result<HealthReport, MonitorError> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        let latest = *history.latest().ok_or(MonitorError::NoSamples)?;

        let mut trends = BTreeMap::new();
        for metric in Metric::ALL {
            trends.insert(metric, self.trend(&history, metric));
        }

        let alerts = self.check_alerts(&latest.metrics, latest.timestamp);
        let emergencies = alerts
            .iter()
            .filter(|a| a.severity == AlertSeverity::Emergency)
            .count() as f64;
        let criticals = alerts
            .iter()
            .filter(|a| a.severity == AlertSeverity::Critical)
            .count() as f64;
        let health_score =
            (100.0 - EMERGENCY_PENALTY * emergencies - CRITICAL_PENALTY * criticals).max(0.0);

        Ok(HealthReport {
            timestamp: Utc::now(),
            current: latest.metrics,
            trends,
            alerts,
            health_score,
            sample_count: history.len(),
        })
    }

    /// Compare every metric against its tiers, most severe tier first.
    pub fn check_alerts(&self, metrics: &HealthMetrics, timestamp: DateTime<Utc>) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for metric in Metric::ALL {
            let value = metrics.get(metric);
            let tier = self.config.thresholds.tier(metric);
            let emergency = tier.critical * self.config.emergency_multiplier;

            let crossed = if value >= emergency {
                Some((AlertSeverity::Emergency, emergency))
            } else if value >= tier.critical {
                Some((AlertSeverity::Critical, tier.critical))
            } else if value >= tier.alert {
                Some((AlertSeverity::Warning, tier.alert))
            } else {
                None
            };

            if let Some((severity, threshold)) = crossed {
                alerts.push(Alert {
                    metric,
                    value,
                    threshold,
                    severity,
                    timestamp,
                });
            }
        }
        alerts
    }

    fn trend(&self, history: &HealthHistory, metric: Metric) -> Trend {
        if history.len() < TREND_SAMPLES {
            return Trend::Stable;
        }
        let recent: Vec<f64> = history
            .last_n(TREND_SAMPLES)
            .map(|s| s.metrics.get(metric))
            .collect();
        let (oldest, newest) = (recent[0], recent[recent.len() - 1]);
        let delta = newest - oldest;
        if delta.abs() <= self.config.trend_tolerance * oldest.abs().max(1e-9) {
            return Trend::Stable;
        }
        let rising = delta > 0.0;
        match (metric.polarity(), rising) {
            (Polarity::HigherIsWorse, true) | (Polarity::LowerIsWorse, false) => Trend::Degrading,
            _ => Trend::Improving,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn latest(&self) -> Option<HealthSample> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        history.latest().copied()
    }

    pub fn len(&self) -> usize {
        self.history.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the window, oldest first.
    pub fn history(&self) -> Vec<HealthSample> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        history.iter().copied().collect()
    }

    /// Feature vectors for every sample in the window (detector training set).
    pub fn feature_vectors(&self) -> Vec<FeatureVector> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        history.feature_vectors()
    }
}

/// Largest |z| of the newest sample across the sampled metrics, using the
/// window's mean and sample standard deviation.
fn anomaly_score(history: &HealthHistory) -> f64 {
    if history.len() < MIN_SAMPLES_FOR_ANOMALY_SCORE {
        return 0.0;
    }
    let Some(latest) = history.latest() else {
        return 0.0;
    };

    Metric::SAMPLED
        .iter()
        .map(|&metric| {
            let values = history.values(metric);
            let mean = values.iter().mean();
            let std = values.iter().std_dev();
            if !std.is_finite() || std <= f64::EPSILON {
                0.0
            } else {
                ((latest.metrics.get(metric) - mean) / std).abs()
            }
        })
        .fold(0.0, f64::max)
}

// ============================================================================
// Tests
// ============================================================================
