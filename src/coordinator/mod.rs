//! Self-Healing Coordinator - closes the monitor → detect → patch → validate → apply loop
//!
//! ```text
//! Stopped ──start()──► Starting ──► Active ──stop()──► Stopping ──► Stopped
//!                     (train detector,      (healing tick on
//!                      start monitor)        a fixed cadence)
//! ```
//!
//! Every step of a tick appends a [`HealingEvent`] to the bounded
//! [`HealingLog`]; statistics are derived from that log alone. A patch is
//! only applied after it passed sandbox validation with enough confidence;
//! anything else is logged as `patch_applied(success=false)` with no
//! mutation. Errors inside a tick are caught at the loop boundary so one bad
//! cycle never halts monitoring.

mod log;
mod target;

pub use log::HealingLog;
pub use target::{JournalAction, JournalRecord, JournalTarget, RemediationTarget, SMOKE_INPUT};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DetectorConfig, EngineConfig, HealingConfig};
use crate::detector::{AnomalyDetector, DetectorError, PatternLibrary, TrainingSummary};
use crate::monitor::{HealthMonitor, MonitorError};
use crate::patches::{select_best_patch, selection_score, ApplyError, ApprovedPatch, PatchGenerator};
use crate::sandbox::SandboxValidator;
use crate::storage::{PatternStore, StorageError};
use crate::telemetry::MetricSource;
use crate::types::{
    BugReport, BugType, HealingEvent, HealingEventType, HealingStats, PatchCandidate,
    PatchTestCase, Severity,
};

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Stopped,
    Starting,
    Active,
    Stopping,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Stopped => write!(f, "stopped"),
            CoordinatorState::Starting => write!(f, "starting"),
            CoordinatorState::Active => write!(f, "active"),
            CoordinatorState::Stopping => write!(f, "stopping"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Cannot move from {from} to {to}")]
    InvalidTransition {
        from: CoordinatorState,
        to: CoordinatorState,
    },

    #[error("Coordinator is {0}, not active")]
    NotActive(CoordinatorState),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Sandbox setup failed: {0}")]
    Sandbox(#[from] regex::Error),
}

/// What a single healing tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No new sample since the previous tick
    Idle,
    Healthy,
    /// Anomalous, but not a confident, known bug
    Anomalous { confidence: f64 },
    /// No candidate could be selected
    Aborted { bug_id: String },
    /// Fail-closed: nothing was applied
    Rejected { patch_id: String, reason: String },
    Applied { patch_id: String, time_to_repair_ms: f64 },
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct SelfHealingCoordinator {
    config: HealingConfig,
    monitor: Arc<HealthMonitor>,
    detector: Arc<AnomalyDetector>,
    generator: PatchGenerator,
    validator: SandboxValidator,
    target: Arc<dyn RemediationTarget>,
    store: Option<Box<dyn PatternStore>>,
    log: HealingLog,
    state: RwLock<CoordinatorState>,
    /// Serialises ticks; holds the timestamp of the last sample handled
    tick_lock: tokio::sync::Mutex<Option<DateTime<Utc>>>,
    ticks: AtomicU64,
    bug_seq: AtomicU64,
}

impl SelfHealingCoordinator {
    pub fn new(
        config: &EngineConfig,
        monitor: Arc<HealthMonitor>,
        detector: Arc<AnomalyDetector>,
        target: Arc<dyn RemediationTarget>,
    ) -> Result<Self, CoordinatorError> {
        let first_bug_seq = target.next_bug_seq();
        Ok(Self {
            config: config.healing.clone(),
            monitor,
            detector,
            generator: PatchGenerator::new(),
            validator: SandboxValidator::new(config.sandbox.clone())?,
            target,
            store: None,
            log: HealingLog::new(config.healing.event_log_capacity),
            state: RwLock::new(CoordinatorState::Stopped),
            tick_lock: tokio::sync::Mutex::new(None),
            ticks: AtomicU64::new(0),
            bug_seq: AtomicU64::new(first_bug_seq),
        })
    }

    /// Persist the pattern library to `store` on stop.
    pub fn with_store(mut self, store: Box<dyn PatternStore>) -> Self {
        self.store = Some(store);
        self
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn state(&self) -> CoordinatorState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(
        &self,
        from: CoordinatorState,
        to: CoordinatorState,
    ) -> Result<(), CoordinatorError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            return Err(CoordinatorError::InvalidTransition { from: *state, to });
        }
        *state = to;
        debug!(%from, %to, "Coordinator state change");
        Ok(())
    }

    /// Stopped → Starting → Active. Trains the detector when the monitor
    /// window already holds enough samples; otherwise training happens on a
    /// later tick.
    pub fn start(&self) -> Result<(), CoordinatorError> {
        self.transition(CoordinatorState::Stopped, CoordinatorState::Starting)?;
        match self.retrain() {
            Some(summary) => info!(samples = summary.samples, "Detector trained at startup"),
            None => info!(
                window = self.monitor.len(),
                required = self.detector.config().min_training_samples,
                "Detector will train once the monitor window fills"
            ),
        }
        self.transition(CoordinatorState::Starting, CoordinatorState::Active)?;
        info!("Self-healing coordinator active");
        Ok(())
    }

    /// Active → Stopping → Stopped. Persists the pattern library when a
    /// store is attached; the coordinator ends up stopped even if that fails.
    pub fn stop(&self) -> Result<(), CoordinatorError> {
        self.transition(CoordinatorState::Active, CoordinatorState::Stopping)?;
        let persisted = match &self.store {
            Some(store) => {
                let patterns = self.detector.patterns();
                let result = store.save(&patterns);
                match &result {
                    Ok(()) => info!(
                        backend = store.backend_name(),
                        patterns = patterns.len(),
                        "Pattern library persisted"
                    ),
                    Err(e) => error!(backend = store.backend_name(), error = %e, "Failed to persist pattern library"),
                }
                result
            }
            None => Ok(()),
        };
        self.transition(CoordinatorState::Stopping, CoordinatorState::Stopped)?;
        info!("Self-healing coordinator stopped");
        persisted.map_err(CoordinatorError::from)
    }

    /// Start, run the monitor over `source` and tick on the configured
    /// cadence until `cancel` fires, then stop.
    pub async fn run(
        self: Arc<Self>,
        source: Box<dyn MetricSource>,
        cancel: CancellationToken,
    ) -> Result<(), CoordinatorError> {
        self.start()?;

        let monitor_cancel = cancel.child_token();
        let monitor_task = {
            let monitor = Arc::clone(&self.monitor);
            let token = monitor_cancel.clone();
            tokio::spawn(async move { monitor.run(source, token).await })
        };

        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately; skip it so the monitor gets
        // a full interval of samples first
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
            self.maybe_retrain(tick);
            match self.tick().await {
                Ok(outcome) => debug!(tick, ?outcome, "Healing tick"),
                Err(e) => warn!(tick, error = %e, "Healing tick failed"),
            }
        }

        monitor_cancel.cancel();
        if let Err(e) = monitor_task.await {
            warn!(error = %e, "Monitor task ended abnormally");
        }
        self.stop()
    }

    // ========================================================================
    // Learning
    // ========================================================================

    fn retrain(&self) -> Option<TrainingSummary> {
        let vectors = self.monitor.feature_vectors();
        match self.detector.train(&vectors) {
            Ok(summary) => Some(summary),
            Err(DetectorError::InsufficientTrainingData { .. }) => None,
            Err(e) => {
                warn!(error = %e, "Detector training failed");
                None
            }
        }
    }

    /// Train when untrained, then every `retrain_interval_ticks`.
    fn maybe_retrain(&self, tick: u64) {
        let every = self.detector.config().retrain_interval_ticks;
        let due = every > 0 && tick % every == 0;
        if !self.detector.is_trained() || due {
            self.retrain();
        }
    }

    // ========================================================================
    // Healing
    // ========================================================================

    /// Run one healing cycle against the newest health sample.
    pub async fn tick(&self) -> Result<TickOutcome, CoordinatorError> {
        let state = self.state();
        if state != CoordinatorState::Active {
            return Err(CoordinatorError::NotActive(state));
        }
        let mut last_sample = self.tick_lock.lock().await;

        let report = match self.monitor.health_report() {
            Ok(r) => r,
            Err(MonitorError::NoSamples) => return Ok(TickOutcome::Idle),
            Err(e) => return Err(e.into()),
        };
        if *last_sample == Some(report.timestamp) {
            return Ok(TickOutcome::Idle);
        }
        *last_sample = Some(report.timestamp);

        let vector = report.feature_vector();
        let detection = self.detector.detect(&vector)?;
        if !detection.is_anomaly {
            return Ok(TickOutcome::Healthy);
        }
        let incident_start = Instant::now();

        self.log.append(
            HealingEventType::AnomalyDetected,
            json!({
                "confidence": detection.confidence,
                "forest_score": detection.forest_score,
                "matched_pattern_id": detection.matched_pattern_id,
                "similarity": detection.similarity,
                "inferred_bug_type": detection.inferred_bug_type,
                "health_score": report.health_score,
                "alerts": report.alerts.len(),
            }),
        );
        info!(
            confidence = detection.confidence,
            forest_score = detection.forest_score,
            matched = detection.matched_pattern_id.as_deref(),
            "Anomaly detected"
        );

        let bug_type = match &detection.inferred_bug_type {
            Some(b) if b.is_known() && detection.confidence > self.config.min_detection_confidence => {
                b.clone()
            }
            _ => {
                return Ok(TickOutcome::Anomalous {
                    confidence: detection.confidence,
                })
            }
        };

        let bug = self.bug_report(bug_type, detection.confidence);
        self.log.append(
            HealingEventType::BugFound,
            json!({
                "bug_id": bug.id,
                "bug_type": bug.bug_type,
                "severity": bug.severity,
                "location": bug.location,
                "message": bug.message,
                "recommended_action": detection.recommended_action,
            }),
        );
        info!(bug_id = %bug.id, bug_type = %bug.bug_type, severity = ?bug.severity, "Bug found");

        let candidates = self.generator.generate_patches(&bug);
        let Some(best) = select_best_patch(&candidates).cloned() else {
            self.log.append(
                HealingEventType::PatchGenerated,
                json!({ "bug_id": bug.id, "candidates": 0, "aborted": true }),
            );
            warn!(bug_id = %bug.id, "No patch candidate, remediation aborted");
            return Ok(TickOutcome::Aborted { bug_id: bug.id });
        };
        self.log.append(
            HealingEventType::PatchGenerated,
            json!({
                "bug_id": bug.id,
                "candidates": candidates.len(),
                "candidate_ids": candidates.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
                "selected": best.id,
                "strategy": best.strategy,
                "selection_score": selection_score(&best),
            }),
        );

        let (original, patched, tests) = match self.prepare(&bug, &best).await {
            Ok(prepared) => prepared,
            Err(e) => {
                return Ok(self.reject(best.id, format!("target could not prepare the patch: {e:#}")))
            }
        };

        let validation = self
            .validator
            .validate_patch(&best.id, &original, &patched, &tests)
            .await;
        self.log.append(
            HealingEventType::PatchValidated,
            json!({
                "patch_id": validation.patch_id,
                "passed": validation.passed,
                "tests": validation.test_results.len(),
                "pass_rate": validation.pass_rate,
                "safety_score": validation.safety_score,
                "overall_confidence": validation.overall_confidence,
                "performance_regression": validation.performance_regression,
                "memory_leak_detected": validation.memory_leak_detected,
                "leak_findings": validation.leak_findings,
                "lines_changed": validation.lines_changed,
            }),
        );

        let patch_id = best.id.clone();
        let approved =
            match ApprovedPatch::approve(best, validation, self.config.min_validation_confidence) {
                Ok(a) => a,
                Err(e) => return Ok(self.reject(patch_id, e.to_string())),
            };

        match self.target.apply(&approved).await {
            Ok(receipt) => {
                let time_to_repair_ms = incident_start.elapsed().as_secs_f64() * 1000.0;
                self.log.append(
                    HealingEventType::PatchApplied,
                    json!({
                        "patch_id": patch_id,
                        "success": true,
                        "time_to_repair_ms": time_to_repair_ms,
                        "fingerprint": receipt.fingerprint,
                    }),
                );
                info!(patch_id = %patch_id, time_to_repair_ms, "Patch applied");
                if let Err(e) = self.detector.record_pattern(&vector, true) {
                    warn!(error = %e, "Could not reinforce pattern library");
                }
                Ok(TickOutcome::Applied {
                    patch_id,
                    time_to_repair_ms,
                })
            }
            Err(e) => Ok(self.reject(patch_id, e.to_string())),
        }
    }

    /// Original source, patched source and test cases for `candidate`.
    async fn prepare(
        &self,
        bug: &BugReport,
        candidate: &PatchCandidate,
    ) -> anyhow::Result<(String, String, Vec<PatchTestCase>)> {
        let original = self.target.original_source(&bug.location).await?;
        let patched = self.target.render_patch(candidate, &original).await?;
        let tests = self.target.test_cases(bug).await?;
        Ok((original, patched, tests))
    }

    fn reject(&self, patch_id: String, reason: String) -> TickOutcome {
        self.log.append(
            HealingEventType::PatchApplied,
            json!({ "patch_id": patch_id, "success": false, "reason": reason }),
        );
        warn!(patch_id = %patch_id, reason = %reason, "Patch not applied");
        TickOutcome::Rejected { patch_id, reason }
    }

    fn bug_report(&self, bug_type: BugType, confidence: f64) -> BugReport {
        let seq = self.bug_seq.fetch_add(1, Ordering::Relaxed);
        BugReport {
            id: format!("bug-{seq}"),
            message: format!("{bug_type} suspected (confidence {confidence:.2})"),
            location: self.config.default_location.clone(),
            bug_type,
            severity: Severity::from_confidence(confidence),
            detected_at: Utc::now(),
        }
    }

    /// Revert an applied patch through the target and log the rollback.
    pub async fn rollback(&self, patch_id: &str, reason: &str) -> Result<(), CoordinatorError> {
        self.target.rollback(patch_id, reason).await?;
        self.log.append(
            HealingEventType::Rollback,
            json!({ "patch_id": patch_id, "reason": reason }),
        );
        warn!(patch_id, reason, "Patch rolled back");
        Ok(())
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn healing_stats(&self) -> HealingStats {
        self.log.stats()
    }

    pub fn events(&self, limit: usize) -> Vec<HealingEvent> {
        self.log.recent(limit)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealingEvent> {
        self.log.subscribe()
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn detector(&self) -> &Arc<AnomalyDetector> {
        &self.detector
    }

    pub fn validator(&self) -> &SandboxValidator {
        &self.validator
    }
}

/// Build a detector over the persisted library, falling back to a freshly
/// seeded one when nothing is stored or the store cannot be read.
pub fn restore_detector(config: DetectorConfig, store: &dyn PatternStore) -> AnomalyDetector {
    match store.load() {
        Ok(Some(patterns)) => {
            info!(
                backend = store.backend_name(),
                patterns = patterns.len(),
                "Restored pattern library"
            );
            AnomalyDetector::with_library(config, PatternLibrary::from_patterns(patterns))
        }
        Ok(None) => AnomalyDetector::new(config),
        Err(e) => {
            warn!(backend = store.backend_name(), error = %e, "Pattern library unreadable, starting fresh");
            AnomalyDetector::new(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryPatternStore;
    use crate::types::HealthMetrics;

    fn engine_config(dir: &std::path::Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.detector.seed = Some(7);
        config.healing.journal_path = dir.join("journal.jsonl").display().to_string();
        config
    }

    fn coordinator(config: &EngineConfig) -> SelfHealingCoordinator {
        let monitor = Arc::new(HealthMonitor::new(config.monitor.clone()));
        let detector = Arc::new(AnomalyDetector::new(config.detector.clone()));
        let target = Arc::new(JournalTarget::open(&config.healing, 1_000).unwrap());
        SelfHealingCoordinator::new(config, monitor, detector, target).unwrap()
    }

    fn calm(i: usize) -> HealthMetrics {
        let t = (i % 5) as f64 / 4.0;
        HealthMetrics {
            cpu_usage: 0.3 + 0.2 * t,
            memory_usage: 0.4 + 0.2 * t,
            error_rate: 2.0 * t,
            response_time: 100.0 + 200.0 * t,
            queue_depth: 10.0 * t,
            deadlock_risk: 0.1 * t,
            anomaly_score: 0.0,
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(&engine_config(dir.path()));
        assert_eq!(c.state(), CoordinatorState::Stopped);
        assert!(matches!(
            c.stop(),
            Err(CoordinatorError::InvalidTransition { .. })
        ));
        c.start().unwrap();
        assert_eq!(c.state(), CoordinatorState::Active);
        assert!(c.start().is_err());
        c.stop().unwrap();
        assert_eq!(c.state(), CoordinatorState::Stopped);
    }

    #[tokio::test]
    async fn test_tick_requires_active() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(&engine_config(dir.path()));
        assert!(matches!(
            c.tick().await,
            Err(CoordinatorError::NotActive(CoordinatorState::Stopped))
        ));
    }

    #[tokio::test]
    async fn test_quiet_ticks_log_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(&engine_config(dir.path()));
        c.start().unwrap();
        assert_eq!(c.tick().await.unwrap(), TickOutcome::Idle);

        for i in 0..12 {
            c.monitor().record(calm(i)).unwrap();
        }
        let outcome = c.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Healthy | TickOutcome::Anomalous { .. }));
        // same sample again
        assert_eq!(c.tick().await.unwrap(), TickOutcome::Idle);
        assert_eq!(c.healing_stats().bugs_found, 0);
    }

    #[tokio::test]
    async fn test_rollback_of_unknown_patch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(&engine_config(dir.path()));
        assert!(matches!(
            c.rollback("nope", "test").await,
            Err(CoordinatorError::Apply(ApplyError::NotApplied(_)))
        ));
        assert!(c.events(10).is_empty());
    }

    #[test]
    fn test_stop_persists_library() {
        let dir = tempfile::tempdir().unwrap();
        let config = engine_config(dir.path());
        let store = Arc::new(InMemoryPatternStore::new());
        let c = coordinator(&config).with_store(Box::new(SharedStore(Arc::clone(&store))));
        c.start().unwrap();
        c.stop().unwrap();
        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.len(), c.detector().patterns().len());

        let restored = restore_detector(config.detector.clone(), store.as_ref());
        assert_eq!(restored.patterns(), saved);
    }

    struct SharedStore(Arc<InMemoryPatternStore>);

    impl PatternStore for SharedStore {
        fn load(&self) -> Result<Option<Vec<crate::types::AnomalyPattern>>, StorageError> {
            self.0.load()
        }
        fn save(&self, patterns: &[crate::types::AnomalyPattern]) -> Result<(), StorageError> {
            self.0.save(patterns)
        }
        fn backend_name(&self) -> &'static str {
            "shared"
        }
    }
}
