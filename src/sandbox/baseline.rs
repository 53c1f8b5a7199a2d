//! Per-patch performance baselines

use std::collections::HashMap;
use std::sync::Mutex;

/// Mean test duration recorded the first time each patch id is validated.
///
/// The first observation becomes the baseline and is never itself flagged.
/// Later observations are compared against it and do not move it. The
/// lookup-or-insert happens under one lock, so concurrent validations of
/// the same patch cannot race on the baseline.
pub struct PerformanceBaselines {
    tolerance: f64,
    baselines: Mutex<HashMap<String, f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BaselineCheck {
    Established,
    WithinTolerance { baseline_ms: f64 },
    Regressed { baseline_ms: f64 },
}

impl BaselineCheck {
    pub fn is_regression(self) -> bool {
        matches!(self, BaselineCheck::Regressed { .. })
    }
}

impl PerformanceBaselines {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            baselines: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, patch_id: &str, mean_ms: f64) -> BaselineCheck {
        let mut baselines = self.baselines.lock().unwrap_or_else(|e| e.into_inner());
        match baselines.get(patch_id) {
            None => {
                baselines.insert(patch_id.to_string(), mean_ms);
                BaselineCheck::Established
            }
            Some(&baseline_ms) if mean_ms > baseline_ms * (1.0 + self.tolerance) => {
                BaselineCheck::Regressed { baseline_ms }
            }
            Some(&baseline_ms) => BaselineCheck::WithinTolerance { baseline_ms },
        }
    }

    pub fn get(&self, patch_id: &str) -> Option<f64> {
        self.baselines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(patch_id)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_run_sets_baseline() {
        let b = PerformanceBaselines::new(0.2);
        // even an objectively slow first run is not flagged
        assert_eq!(b.check("p", 10_000.0), BaselineCheck::Established);
        assert_eq!(b.get("p"), Some(10_000.0));
    }

    #[test]
    fn test_regression_threshold() {
        let b = PerformanceBaselines::new(0.2);
        b.check("p", 100.0);
        assert!(!b.check("p", 119.0).is_regression());
        assert!(!b.check("p", 120.0).is_regression());
        assert_eq!(b.check("p", 121.0), BaselineCheck::Regressed { baseline_ms: 100.0 });
        // later runs never move the baseline
        assert_eq!(b.get("p"), Some(100.0));
        // baselines are per patch id
        assert_eq!(b.check("q", 500.0), BaselineCheck::Established);
    }

    #[test]
    fn test_concurrent_first_observations_establish_once() {
        let b = Arc::new(PerformanceBaselines::new(0.2));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let b = Arc::clone(&b);
                std::thread::spawn(move || b.check("shared", 10.0 + i as f64))
            })
            .collect();
        let established = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|c| *c == BaselineCheck::Established)
            .count();
        assert_eq!(established, 1);
    }
}
