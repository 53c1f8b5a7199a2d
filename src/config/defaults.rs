//! System-wide default constants.
//!
//! Grouped by subsystem. Values that operators tune live in
//! `engine_config.rs`; these are the fixed sizes and limits behind them.

// ============================================================================
// Monitor
// ============================================================================

/// Default rolling window capacity (samples).
pub const HEALTH_WINDOW_SIZE: usize = 100;

/// Samples needed before the monitor computes an anomaly score.
pub const MIN_SAMPLES_FOR_ANOMALY_SCORE: usize = 3;

/// Samples compared when computing a metric's trend.
pub const TREND_SAMPLES: usize = 3;

/// Health-score deduction per emergency alert.
pub const EMERGENCY_PENALTY: f64 = 30.0;

/// Health-score deduction per critical alert.
pub const CRITICAL_PENALTY: f64 = 10.0;

// ============================================================================
// Detector
// ============================================================================

/// Floor applied to reference standard deviations so near-constant
/// metrics do not blow up z-scores.
pub const MIN_REFERENCE_STD: f64 = 1e-3;

/// Deviation length (σ) below which a vector's direction is noise: such a
/// vector only matches or merges with a pattern at the same point.
pub const MIN_MATCH_DEVIATION: f64 = 2.0;

// ============================================================================
// Sandbox
// ============================================================================

/// Safety-score deduction per failed test.
pub const FAILED_TEST_PENALTY: f64 = 10.0;

/// Safety-score deduction for a performance regression.
pub const REGRESSION_PENALTY: f64 = 20.0;

/// Safety-score deduction for a suspected leak.
pub const LEAK_PENALTY: f64 = 30.0;

/// Weight of the pass rate in overall confidence (remainder is safety).
pub const PASS_RATE_WEIGHT: f64 = 0.6;

// ============================================================================
// Healing
// ============================================================================

/// Audit log ring-buffer capacity (events).
pub const EVENT_LOG_CAPACITY: usize = 1_000;

/// Broadcast channel capacity for live healing events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default page size for `/api/v1/events`.
pub const DEFAULT_EVENT_PAGE: usize = 50;
