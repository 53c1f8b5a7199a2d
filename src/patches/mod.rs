//! Patch Generator - bug report → ranked candidate fixes
//!
//! Each bug class maps to two fix strategies. Every strategy contributes one
//! candidate carrying that strategy's prior confidence, impact and risk, and
//! a diff template aimed at the bug's location.
//!
//! Applying a patch is delegated to a [`PatchApplier`], which only accepts an
//! [`ApprovedPatch`]. That type can only be built from a candidate together
//! with its own passing validation, so unvalidated code cannot reach the
//! apply path.

pub mod strategies;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{BugReport, Level, PatchCandidate, PatchStrategy, ValidationResult};
use strategies::{prior, render_diff, strategies_for, summary};

// ============================================================================
// Generation
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct PatchGenerator;

impl PatchGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Candidates for `bug`, in strategy-table order. Always returns at
    /// least one candidate; unmapped bug types use the fallback strategies.
    pub fn generate_patches(&self, bug: &BugReport) -> Vec<PatchCandidate> {
        let candidates: Vec<PatchCandidate> = strategies_for(&bug.bug_type)
            .into_iter()
            .map(|strategy| self.candidate(bug, strategy))
            .collect();
        debug!(
            bug_id = %bug.id,
            bug_type = %bug.bug_type,
            count = candidates.len(),
            "Generated patch candidates"
        );
        candidates
    }

    fn candidate(&self, bug: &BugReport, strategy: PatchStrategy) -> PatchCandidate {
        let p = prior(strategy);
        PatchCandidate {
            id: format!("{}-{}", bug.id, strategy),
            bug_id: bug.id.clone(),
            description: format!(
                "{} for {} at {}: {}",
                strategy,
                bug.bug_type,
                bug.location,
                summary(strategy)
            ),
            diff: render_diff(strategy, &bug.location),
            strategy,
            confidence: p.confidence,
            estimated_impact: p.impact,
            risk_level: p.risk,
        }
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Ranking score: confidence, plus an impact bonus, minus a risk penalty,
/// plus a bonus for the conservative strategies.
pub fn selection_score(c: &PatchCandidate) -> f64 {
    let impact_bonus = match c.estimated_impact {
        Level::High => 0.10,
        Level::Medium => 0.05,
        Level::Low => 0.0,
    };
    let risk_penalty = match c.risk_level {
        Level::High => 0.15,
        Level::Medium => 0.05,
        Level::Low => 0.0,
    };
    let strategy_bonus = match c.strategy {
        PatchStrategy::ErrorHandling | PatchStrategy::NullCheck => 0.10,
        _ => 0.0,
    };
    c.confidence + impact_bonus - risk_penalty + strategy_bonus
}

/// Scores closer than this are a tie.
const SCORE_TIE_EPSILON: f64 = 1e-9;

/// Highest-scoring candidate; ties go to the earliest. `None` on empty input.
pub fn select_best_patch(candidates: &[PatchCandidate]) -> Option<&PatchCandidate> {
    candidates.iter().fold(None, |best: Option<&PatchCandidate>, c| match best {
        Some(b) if selection_score(c) <= selection_score(b) + SCORE_TIE_EPSILON => Some(b),
        _ => Some(c),
    })
}

// ============================================================================
// Apply gate
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum ApprovalError {
    #[error("Validation result is for {validated}, not {candidate}")]
    PatchIdMismatch { candidate: String, validated: String },

    #[error("Patch {0} did not pass validation")]
    ValidationFailed(String),

    #[error("Validation confidence {confidence:.3} does not exceed {required:.3}")]
    LowConfidence { confidence: f64, required: f64 },
}

/// A candidate that passed sandbox validation with enough confidence.
///
/// Fields are private: the only way to obtain one is [`ApprovedPatch::approve`].
#[derive(Debug, Clone)]
pub struct ApprovedPatch {
    candidate: PatchCandidate,
    validation: ValidationResult,
}

impl ApprovedPatch {
    pub fn approve(
        candidate: PatchCandidate,
        validation: ValidationResult,
        min_confidence: f64,
    ) -> Result<Self, ApprovalError> {
        if validation.patch_id != candidate.id {
            return Err(ApprovalError::PatchIdMismatch {
                candidate: candidate.id,
                validated: validation.patch_id,
            });
        }
        if !validation.passed {
            return Err(ApprovalError::ValidationFailed(candidate.id));
        }
        if validation.overall_confidence <= min_confidence {
            return Err(ApprovalError::LowConfidence {
                confidence: validation.overall_confidence,
                required: min_confidence,
            });
        }
        Ok(Self {
            candidate,
            validation,
        })
    }

    pub fn candidate(&self) -> &PatchCandidate {
        &self.candidate
    }

    pub fn validation(&self) -> &ValidationResult {
        &self.validation
    }

    pub fn id(&self) -> &str {
        &self.candidate.id
    }
}

/// Proof that a patch was handed to the apply mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReceipt {
    pub patch_id: String,
    /// Content fingerprint of what was applied
    pub fingerprint: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Applying {patch_id} failed: {source}")]
    Failed {
        patch_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Patch {0} is not currently applied")]
    NotApplied(String),
}

/// The delegated, auditable mechanism that materialises a patch.
///
/// Implementations must leave the system unchanged when they return an
/// error, and `rollback` must be safe to retry.
#[async_trait]
pub trait PatchApplier: Send + Sync {
    async fn apply(&self, patch: &ApprovedPatch) -> Result<ApplyReceipt, ApplyError>;

    async fn rollback(&self, patch_id: &str, reason: &str) -> Result<(), ApplyError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BugType, Severity};

    fn bug(bug_type: BugType) -> BugReport {
        BugReport {
            id: "bug-1".into(),
            message: "test".into(),
            location: "service/handler.rs".into(),
            bug_type,
            severity: Severity::High,
            detected_at: Utc::now(),
        }
    }

    fn validation(patch_id: &str, passed: bool, confidence: f64) -> ValidationResult {
        ValidationResult {
            patch_id: patch_id.into(),
            passed,
            test_results: Vec::new(),
            pass_rate: if passed { 1.0 } else { 0.0 },
            performance_regression: false,
            memory_leak_detected: false,
            leak_findings: Vec::new(),
            safety_score: 100.0,
            overall_confidence: confidence,
            mean_duration_ms: 1.0,
            lines_changed: 3,
        }
    }

    #[test]
    fn test_memory_leak_candidates() {
        let candidates = PatchGenerator::new().generate_patches(&bug(BugType::MemoryLeak));
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, "bug-1-memory_leak_fix");
        assert_eq!(candidates[0].strategy, PatchStrategy::MemoryLeakFix);
        assert_eq!(candidates[0].confidence, 0.70);
        assert_eq!(candidates[0].estimated_impact, Level::High);
        assert_eq!(candidates[1].strategy, PatchStrategy::ResourceCleanup);
        assert!(candidates[0].diff.contains("service/handler.rs"));
        assert!(candidates
            .iter()
            .all(|c| c.bug_id == "bug-1" && c.description.contains("memory_leak")));
    }

    #[test]
    fn test_unmapped_bug_type_uses_fallback() {
        let candidates =
            PatchGenerator::new().generate_patches(&bug(BugType::Other("thundering_herd".into())));
        let strategies: Vec<_> = candidates.iter().map(|c| c.strategy).collect();
        assert_eq!(
            strategies,
            vec![PatchStrategy::ErrorHandling, PatchStrategy::NullCheck]
        );
    }

    #[test]
    fn test_selection_scores() {
        let g = PatchGenerator::new();
        let c = g.generate_patches(&bug(BugType::ExceptionHandling));
        // error_handling: 0.80 + 0.05 - 0.0 + 0.1
        assert!((selection_score(&c[0]) - 0.95).abs() < 1e-12);
        // null_check: 0.85 + 0.0 - 0.0 + 0.1
        assert!((selection_score(&c[1]) - 0.95).abs() < 1e-12);
        // equal scores: earliest wins
        assert_eq!(select_best_patch(&c).unwrap().strategy, PatchStrategy::ErrorHandling);
    }

    #[test]
    fn test_select_best_patch_picks_highest() {
        let g = PatchGenerator::new();
        // memory_leak_fix 0.70+0.10-0.05 and resource_cleanup 0.75+0.05-0.05
        // tie up to rounding; the earlier candidate wins
        let c = g.generate_patches(&bug(BugType::MemoryLeak));
        assert_eq!(select_best_patch(&c).unwrap().strategy, PatchStrategy::MemoryLeakFix);

        // race_condition_fix 0.60+0.10-0.15 = 0.55, timeout_guard 0.70+0.05 = 0.75
        let c = g.generate_patches(&bug(BugType::Deadlock));
        assert_eq!(select_best_patch(&c).unwrap().strategy, PatchStrategy::TimeoutGuard);
    }

    #[test]
    fn test_select_best_patch_empty_and_deterministic() {
        assert!(select_best_patch(&[]).is_none());
        let c = PatchGenerator::new().generate_patches(&bug(BugType::InfiniteLoop));
        let first = select_best_patch(&c).unwrap().id.clone();
        for _ in 0..10 {
            assert_eq!(select_best_patch(&c).unwrap().id, first);
        }
    }

    #[test]
    fn test_approval_gate() {
        let c = PatchGenerator::new().generate_patches(&bug(BugType::Deadlock));
        let best = c[1].clone();

        let ok = ApprovedPatch::approve(best.clone(), validation(&best.id, true, 0.9), 0.7).unwrap();
        assert_eq!(ok.id(), best.id);

        assert_eq!(
            ApprovedPatch::approve(best.clone(), validation("other", true, 0.9), 0.7).unwrap_err(),
            ApprovalError::PatchIdMismatch {
                candidate: best.id.clone(),
                validated: "other".into()
            }
        );
        assert_eq!(
            ApprovedPatch::approve(best.clone(), validation(&best.id, false, 0.9), 0.7).unwrap_err(),
            ApprovalError::ValidationFailed(best.id.clone())
        );
        // confidence must strictly exceed the floor
        assert!(matches!(
            ApprovedPatch::approve(best.clone(), validation(&best.id, true, 0.7), 0.7),
            Err(ApprovalError::LowConfidence { .. })
        ));
    }
}
