//! Audit trail types: HealingEvent and HealingStats

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingEventType {
    AnomalyDetected,
    BugFound,
    PatchGenerated,
    PatchValidated,
    PatchApplied,
    Rollback,
}

impl std::fmt::Display for HealingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealingEventType::AnomalyDetected => "anomaly_detected",
            HealingEventType::BugFound => "bug_found",
            HealingEventType::PatchGenerated => "patch_generated",
            HealingEventType::PatchValidated => "patch_validated",
            HealingEventType::PatchApplied => "patch_applied",
            HealingEventType::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: HealingEventType,
    /// Step-specific payload (always a JSON object)
    pub details: serde_json::Value,
}

impl HealingEvent {
    /// `details.success` for `patch_applied` events.
    pub fn succeeded(&self) -> Option<bool> {
        self.details.get("success").and_then(serde_json::Value::as_bool)
    }
}

/// Aggregates derived from the event log on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealingStats {
    pub total_events: usize,
    pub anomalies_detected: usize,
    pub bugs_found: usize,
    /// Total candidates across all `patch_generated` events
    pub patches_generated: usize,
    pub patches_validated: usize,
    pub validations_passed: usize,
    pub patches_applied: usize,
    pub apply_failures: usize,
    pub rollbacks: usize,
    /// bugs_found / anomalies_detected
    pub detection_rate: f64,
    /// patches_applied / patches_validated
    pub patch_success_rate: f64,
    /// Mean time-to-repair over successful applies
    pub mean_time_to_repair_ms: Option<f64>,
}
