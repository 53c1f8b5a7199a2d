//! Strategy table, priors and diff templates

use crate::types::{BugType, Level, PatchStrategy};

/// Prior confidence, estimated impact and risk of a strategy. These are
/// properties of the fix technique, not of the particular bug.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyPrior {
    pub confidence: f64,
    pub impact: Level,
    pub risk: Level,
}

pub fn prior(strategy: PatchStrategy) -> StrategyPrior {
    let (confidence, impact, risk) = match strategy {
        PatchStrategy::NullCheck => (0.85, Level::Low, Level::Low),
        PatchStrategy::ErrorHandling => (0.80, Level::Medium, Level::Low),
        PatchStrategy::ResourceCleanup => (0.75, Level::Medium, Level::Medium),
        PatchStrategy::TimeoutGuard => (0.70, Level::Medium, Level::Low),
        PatchStrategy::MemoryLeakFix => (0.70, Level::High, Level::Medium),
        PatchStrategy::RaceConditionFix => (0.60, Level::High, Level::High),
        PatchStrategy::LogicCorrection => (0.55, Level::High, Level::High),
    };
    StrategyPrior {
        confidence,
        impact,
        risk,
    }
}

/// The two strategies tried for a bug class, in generation order.
pub fn strategies_for(bug_type: &BugType) -> [PatchStrategy; 2] {
    use PatchStrategy::*;
    match bug_type {
        BugType::MemoryLeak => [MemoryLeakFix, ResourceCleanup],
        BugType::InfiniteLoop => [TimeoutGuard, LogicCorrection],
        BugType::Deadlock => [RaceConditionFix, TimeoutGuard],
        BugType::ExceptionHandling => [ErrorHandling, NullCheck],
        BugType::PerformanceDegradation => [TimeoutGuard, ResourceCleanup],
        BugType::ResourceExhaustion => [ResourceCleanup, TimeoutGuard],
        BugType::Unknown | BugType::Other(_) => [ErrorHandling, NullCheck],
    }
}

/// Short human summary used in candidate descriptions.
pub fn summary(strategy: PatchStrategy) -> &'static str {
    match strategy {
        PatchStrategy::NullCheck => "guard missing or empty inputs before use",
        PatchStrategy::ErrorHandling => "catch failures on the call path and fall back",
        PatchStrategy::ResourceCleanup => "release acquired resources on every exit path",
        PatchStrategy::TimeoutGuard => "bound the operation with a deadline",
        PatchStrategy::RaceConditionFix => "acquire locks in a fixed global order with timeouts",
        PatchStrategy::LogicCorrection => "cap iterations and fix the loop exit condition",
        PatchStrategy::MemoryLeakFix => "tear down listeners and timers and bound cache growth",
    }
}

/// Lines the strategy adds at the patched location.
fn added_lines(strategy: PatchStrategy) -> &'static [&'static str] {
    match strategy {
        PatchStrategy::NullCheck => &[
            "if input is missing or empty:",
            "    log.warn(\"rejecting empty input\")",
            "    return default_response()",
        ],
        PatchStrategy::ErrorHandling => &[
            "try:",
            "    result = handle(input)",
            "except error as e:",
            "    log.error(\"handler failed\", error=e)",
            "    result = fallback_response()",
        ],
        PatchStrategy::ResourceCleanup => &[
            "resource = acquire()",
            "try:",
            "    use(resource)",
            "finally:",
            "    release(resource)",
        ],
        PatchStrategy::TimeoutGuard => &[
            "deadline = now() + TIMEOUT_MS",
            "result = run_with_deadline(operation, deadline)",
            "if result is timed_out:",
            "    abort(operation)",
            "    return timeout_response()",
        ],
        PatchStrategy::RaceConditionFix => &[
            "for lock in sorted(required_locks, key=lock_rank):",
            "    if not lock.acquire(timeout=LOCK_TIMEOUT_MS):",
            "        release_all(held_locks)",
            "        return retry_later()",
            "    held_locks.push(lock)",
        ],
        PatchStrategy::LogicCorrection => &[
            "iterations = 0",
            "while not done and iterations < MAX_ITERATIONS:",
            "    step()",
            "    iterations += 1",
            "if not done:",
            "    raise LoopLimitExceeded(iterations)",
        ],
        PatchStrategy::MemoryLeakFix => &[
            "on_teardown(lambda: clear_interval(timer))",
            "on_teardown(lambda: remove_listener(event, handler))",
            "if len(cache) > CACHE_LIMIT:",
            "    cache.evict_oldest(len(cache) - CACHE_LIMIT)",
        ],
    }
}

/// Unified-diff style template applying `strategy` at `location`.
pub fn render_diff(strategy: PatchStrategy, location: &str) -> String {
    let lines = added_lines(strategy);
    let mut diff = format!(
        "--- a/{location}\n+++ b/{location}\n@@ -0,0 +1,{} @@ {}\n",
        lines.len(),
        strategy
    );
    for line in lines {
        diff.push('+');
        diff.push_str(line);
        diff.push('\n');
    }
    diff
}

/// Lines a diff adds, without the leading `+`.
pub fn added_from_diff(diff: &str) -> Vec<&str> {
    diff.lines()
        .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
        .map(|l| &l[1..])
        .collect()
}
