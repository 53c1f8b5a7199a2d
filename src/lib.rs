//! Mender: closed-loop fault remediation
//!
//! Watches service health, detects anomalous behaviour, proposes candidate
//! patches, validates them in a confined sandbox and applies only the ones
//! that pass.
//!
//! ## Architecture
//!
//! - **Monitor**: rolling health window, tiered alerts, trends, health score
//! - **Detector**: isolation forest plus a cosine-similarity pattern library
//! - **Patches**: strategy table, candidate synthesis and ranking, apply gate
//! - **Sandbox**: out-of-process test execution with hard timeouts
//! - **Coordinator**: the healing state machine and its audit log

pub mod api;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod monitor;
pub mod patches;
pub mod sandbox;
pub mod storage;
pub mod telemetry;
pub mod types;

pub use config::EngineConfig;
pub use coordinator::{
    CoordinatorError, CoordinatorState, HealingLog, JournalTarget, RemediationTarget,
    SelfHealingCoordinator, TickOutcome,
};
pub use detector::{AnomalyDetector, DetectorError};
pub use monitor::{HealthMonitor, MonitorError};
pub use patches::{select_best_patch, ApprovedPatch, PatchApplier, PatchGenerator};
pub use sandbox::SandboxValidator;
pub use storage::{PatternStore, StorageError};
pub use telemetry::{MetricEvent, MetricSource};
pub use types::{
    BugReport, BugType, DetectionResult, HealingEvent, HealingEventType, HealingStats,
    HealthMetrics, HealthReport, PatchCandidate, PatchTestCase, ValidationResult,
};
