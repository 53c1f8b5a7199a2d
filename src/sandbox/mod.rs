//! Sandbox Validator - runs candidate patches against test cases in isolation
//!
//! Each test case executes the patched source in its own confined child
//! process (see [`runner`]). Exceptions, non-zero exits and timeouts are
//! captured as failed tests and never escape the validator. On top of the
//! pass rate the validator checks for a performance regression against the
//! patch's first recorded run and statically scans the patched source for
//! leak-prone idioms.

pub mod baseline;
pub mod leak;
pub mod runner;

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::defaults::{
    FAILED_TEST_PENALTY, LEAK_PENALTY, PASS_RATE_WEIGHT, REGRESSION_PENALTY,
};
use crate::config::SandboxConfig;
use crate::types::{PatchTestCase, TestOutcome, ValidationResult};
use baseline::{BaselineCheck, PerformanceBaselines};
use leak::LeakScanner;
use runner::SandboxRunner;

pub use runner::SandboxError;

pub struct SandboxValidator {
    config: SandboxConfig,
    runner: SandboxRunner,
    baselines: PerformanceBaselines,
    leaks: LeakScanner,
}

impl SandboxValidator {
    pub fn new(config: SandboxConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            runner: SandboxRunner::new(&config),
            baselines: PerformanceBaselines::new(config.regression_tolerance),
            leaks: LeakScanner::new()?,
            config,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Baseline mean test duration recorded for `patch_id`, if any
    pub fn baseline_ms(&self, patch_id: &str) -> Option<f64> {
        self.baselines.get(patch_id)
    }

    /// Effective timeout for a test: its own limit capped at the ceiling.
    fn timeout_for(&self, test: &PatchTestCase) -> Duration {
        let requested = if test.timeout_ms == 0 {
            self.config.default_timeout_ms
        } else {
            test.timeout_ms
        };
        Duration::from_millis(requested.min(self.config.max_timeout_ms))
    }

    async fn run_test(&self, source: &str, test: &PatchTestCase) -> TestOutcome {
        let timeout = self.timeout_for(test);
        match self.runner.run(source, &test.input, timeout).await {
            Ok(out) if out.timed_out => TestOutcome {
                name: test.name.clone(),
                passed: false,
                duration_ms: out.duration_ms,
                timed_out: true,
                actual: None,
                error: Some(format!("timed out after {} ms", timeout.as_millis())),
            },
            Ok(out) if !out.success() => TestOutcome {
                name: test.name.clone(),
                passed: false,
                duration_ms: out.duration_ms,
                timed_out: false,
                actual: Some(out.parsed_stdout()),
                error: Some(match out.exit_code {
                    Some(code) => format!("exited with status {code}: {}", out.stderr.trim()),
                    None => "terminated by signal".to_string(),
                }),
            },
            Ok(out) => {
                let actual = out.parsed_stdout();
                TestOutcome {
                    name: test.name.clone(),
                    passed: actual == test.expected_output,
                    duration_ms: out.duration_ms,
                    timed_out: false,
                    actual: Some(actual),
                    error: None,
                }
            }
            Err(e) => {
                warn!(test = %test.name, error = %e, "Sandbox run could not start");
                TestOutcome {
                    name: test.name.clone(),
                    passed: false,
                    duration_ms: 0.0,
                    timed_out: false,
                    actual: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Validate `patched` (a rewrite of `original`) against `tests`.
    ///
    /// Never fails: every problem with the candidate shows up as a failed
    /// test or a lowered safety score. With no tests the pass rate is 0 and
    /// the patch does not pass.
    pub async fn validate_patch(
        &self,
        patch_id: &str,
        original: &str,
        patched: &str,
        tests: &[PatchTestCase],
    ) -> ValidationResult {
        let mut test_results = Vec::with_capacity(tests.len());
        for test in tests {
            let outcome = self.run_test(patched, test).await;
            debug!(
                patch_id,
                test = %outcome.name,
                passed = outcome.passed,
                duration_ms = outcome.duration_ms,
                "Test finished"
            );
            test_results.push(outcome);
        }

        let passed_count = test_results.iter().filter(|t| t.passed).count();
        let failed_count = test_results.len() - passed_count;
        let pass_rate = if test_results.is_empty() {
            0.0
        } else {
            passed_count as f64 / test_results.len() as f64
        };
        let mean_duration_ms = if test_results.is_empty() {
            0.0
        } else {
            test_results.iter().map(|t| t.duration_ms).sum::<f64>() / test_results.len() as f64
        };

        // no runs, nothing to compare or establish
        let performance_regression = !test_results.is_empty()
            && match self.baselines.check(patch_id, mean_duration_ms) {
                BaselineCheck::Established => {
                    debug!(patch_id, baseline_ms = mean_duration_ms, "Performance baseline established");
                    false
                }
                check => check.is_regression(),
            };

        let leak_findings = self.leaks.scan(patched);
        let memory_leak_detected = !leak_findings.is_empty();

        let safety_score = (100.0
            - FAILED_TEST_PENALTY * failed_count as f64
            - if performance_regression { REGRESSION_PENALTY } else { 0.0 }
            - if memory_leak_detected { LEAK_PENALTY } else { 0.0 })
        .max(0.0);
        let overall_confidence =
            PASS_RATE_WEIGHT * pass_rate + (1.0 - PASS_RATE_WEIGHT) * (safety_score / 100.0);
        let passed = pass_rate >= self.config.min_pass_rate
            && !performance_regression
            && !memory_leak_detected;

        let result = ValidationResult {
            patch_id: patch_id.to_string(),
            passed,
            test_results,
            pass_rate,
            performance_regression,
            memory_leak_detected,
            leak_findings,
            safety_score,
            overall_confidence,
            mean_duration_ms,
            lines_changed: lines_changed(original, patched),
        };

        info!(
            patch_id,
            passed,
            pass_rate,
            safety_score,
            overall_confidence,
            regression = performance_regression,
            leak = memory_leak_detected,
            "Patch validated"
        );
        result
    }
}

/// Lines present in one source and not the other, counted as a multiset.
fn lines_changed(original: &str, patched: &str) -> usize {
    use std::collections::HashMap;
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for line in original.lines() {
        *counts.entry(line).or_default() += 1;
    }
    for line in patched.lines() {
        *counts.entry(line).or_default() -= 1;
    }
    counts.values().map(|c| c.unsigned_abs() as usize).sum()
}
