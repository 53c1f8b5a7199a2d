//! Sandbox isolation and scoring tests
//!
//! Candidate code is untrusted: these check that it cannot outlive its
//! timeout, see the host environment, or escape scoring.

use std::time::{Duration, Instant};

use mender::config::SandboxConfig;
use mender::sandbox::SandboxValidator;
use mender::types::PatchTestCase;
use serde_json::{json, Value};

fn validator() -> SandboxValidator {
    SandboxValidator::new(SandboxConfig::default()).unwrap()
}

fn case(input: Value, expected: Value, timeout_ms: u64) -> PatchTestCase {
    PatchTestCase {
        name: "case".into(),
        input,
        expected_output: expected,
        timeout_ms,
    }
}

#[tokio::test]
async fn infinite_loop_is_bounded_by_timeout() {
    let started = Instant::now();
    let r = validator()
        .validate_patch(
            "loop",
            "",
            "while true; do :; done\n",
            &[case(Value::Null, json!("never"), 300)],
        )
        .await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!r.passed);
    assert!(r.test_results[0].timed_out);
    assert_eq!(r.pass_rate, 0.0);
}

#[tokio::test]
async fn background_children_are_killed_with_the_group() {
    // the orphan keeps stdout open, so only a group kill ends the run
    let started = Instant::now();
    let r = validator()
        .validate_patch(
            "orphan",
            "",
            "sleep 30 &\necho started\n",
            &[case(Value::Null, json!("started"), 400)],
        )
        .await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(r.test_results[0].timed_out);
}

/// Alive and not yet a zombie.
fn process_running(pid: u64) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}

#[tokio::test]
async fn detached_background_child_dies_when_the_run_exits() {
    // stdio detached, so the run ends normally while the sleep lives on
    let r = validator()
        .validate_patch(
            "detached",
            "",
            "sleep 30 >/dev/null 2>&1 </dev/null &\necho $!\n",
            &[case(Value::Null, Value::Null, 2_000)],
        )
        .await;
    let outcome = &r.test_results[0];
    assert!(!outcome.timed_out, "{outcome:?}");
    let pid = outcome
        .actual
        .as_ref()
        .and_then(Value::as_u64)
        .expect("script prints the background pid");

    let deadline = Instant::now() + Duration::from_secs(2);
    while process_running(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!process_running(pid), "background pid {pid} survived the run");
}

#[tokio::test]
async fn host_environment_is_not_visible() {
    std::env::set_var("MENDER_SANDBOX_SECRET", "hunter2");
    let r = validator()
        .validate_patch(
            "env",
            "",
            "printf '%s\\n' \"${MENDER_SANDBOX_SECRET:-unset}\"\n",
            &[case(Value::Null, json!("unset"), 2_000)],
        )
        .await;
    assert!(r.passed, "{:?}", r.test_results);
}

#[tokio::test]
async fn runs_in_a_fresh_scratch_directory() {
    let r = validator()
        .validate_patch(
            "scratch",
            "",
            "ls | wc -l\n",
            &[case(Value::Null, json!(1), 2_000)],
        )
        .await;
    assert!(r.passed, "{:?}", r.test_results);
}

#[tokio::test]
async fn first_run_sets_baseline_and_slower_rerun_regresses() {
    let v = validator();
    let tests = [case(json!(3), json!(6), 5_000)];

    let slow_first = v
        .validate_patch("slow-first", "", "sleep 0.3\nread x\necho $((x * 2))\n", &tests)
        .await;
    // an objectively slow first run is never flagged
    assert!(!slow_first.performance_regression);
    assert!(slow_first.passed);

    let fast = v
        .validate_patch("p", "", "read x\necho $((x * 2))\n", &tests)
        .await;
    assert!(fast.passed);
    assert!(!fast.performance_regression);

    let slower = v
        .validate_patch("p", "", "sleep 0.4\nread x\necho $((x * 2))\n", &tests)
        .await;
    assert!(slower.performance_regression);
    assert!(!slower.passed);
    assert_eq!(slower.safety_score, 80.0);
    assert!((slower.overall_confidence - (0.6 + 0.4 * 0.8)).abs() < 1e-9);
}

#[tokio::test]
async fn zero_tests_never_pass() {
    let r = validator()
        .validate_patch("empty", "", "true\n", &[])
        .await;
    assert!(!r.passed);
    assert_eq!(r.pass_rate, 0.0);
    assert!(r.overall_confidence <= 0.4 + 1e-9);
}
