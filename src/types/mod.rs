//! Shared data structures for the remediation loop
//!
//! - Health sampling: HealthMetrics, Alert, Trend, HealthReport
//! - Detection: AnomalyPattern, DetectionResult, BugType, BugReport
//! - Patching: PatchCandidate, PatchTestCase, ValidationResult
//! - Audit: HealingEvent, HealingStats

mod detection;
mod healing;
mod health;
mod patch;

pub use detection::*;
pub use healing::*;
pub use health::*;
pub use patch::*;
