//! Patch types: strategies, candidates, test cases and validation results

use serde::{Deserialize, Serialize};

// ============================================================================
// Strategy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStrategy {
    NullCheck,
    ErrorHandling,
    ResourceCleanup,
    TimeoutGuard,
    RaceConditionFix,
    LogicCorrection,
    MemoryLeakFix,
}

impl PatchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchStrategy::NullCheck => "null_check",
            PatchStrategy::ErrorHandling => "error_handling",
            PatchStrategy::ResourceCleanup => "resource_cleanup",
            PatchStrategy::TimeoutGuard => "timeout_guard",
            PatchStrategy::RaceConditionFix => "race_condition_fix",
            PatchStrategy::LogicCorrection => "logic_correction",
            PatchStrategy::MemoryLeakFix => "memory_leak_fix",
        }
    }
}

impl std::fmt::Display for PatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-step scale shared by estimated impact and risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    Medium,
    High,
}

// ============================================================================
// Candidate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchCandidate {
    pub id: String,
    pub bug_id: String,
    pub description: String,
    /// Unified-diff style change description
    pub diff: String,
    pub strategy: PatchStrategy,
    /// Strategy prior, 0..=1
    pub confidence: f64,
    pub estimated_impact: Level,
    pub risk_level: Level,
}

// ============================================================================
// Validation
// ============================================================================

/// One sandboxed check of a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchTestCase {
    pub name: String,
    /// Written to the candidate's stdin (strings verbatim, everything else as JSON)
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub expected_output: serde_json::Value,
    /// Hard wall-clock limit in milliseconds
    pub timeout_ms: u64,
}

/// Outcome of one test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
    pub duration_ms: f64,
    pub timed_out: bool,
    pub actual: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub patch_id: String,
    pub passed: bool,
    pub test_results: Vec<TestOutcome>,
    pub pass_rate: f64,
    pub performance_regression: bool,
    pub memory_leak_detected: bool,
    /// Names of the leak idioms found by the static scan
    pub leak_findings: Vec<String>,
    /// 0..=100
    pub safety_score: f64,
    /// 0..=1
    pub overall_confidence: f64,
    /// Mean test duration for this run
    pub mean_duration_ms: f64,
    /// Lines that differ between the original and patched sources
    pub lines_changed: usize,
}

impl ValidationResult {
    pub fn failed_count(&self) -> usize {
        self.test_results.iter().filter(|t| !t.passed).count()
    }
}
