//! Bounded rolling window of health samples

use std::collections::VecDeque;

use crate::types::{FeatureVector, HealthSample, Metric};

/// Ring buffer of timestamped samples; the oldest sample is evicted on overflow.
#[derive(Debug, Clone)]
pub struct HealthHistory {
    samples: VecDeque<HealthSample>,
    capacity: usize,
}

impl HealthHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, returning the evicted one if the window was full.
    pub fn push(&mut self, sample: HealthSample) -> Option<HealthSample> {
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&HealthSample> {
        self.samples.back()
    }

    pub fn latest_mut(&mut self) -> Option<&mut HealthSample> {
        self.samples.back_mut()
    }

    /// Oldest-first iterator.
    pub fn iter(&self) -> impl Iterator<Item = &HealthSample> {
        self.samples.iter()
    }

    /// The newest `n` samples, oldest first.
    pub fn last_n(&self, n: usize) -> impl Iterator<Item = &HealthSample> {
        self.samples.iter().skip(self.samples.len().saturating_sub(n))
    }

    /// Column of one metric across the window, oldest first.
    pub fn values(&self, metric: Metric) -> Vec<f64> {
        self.samples.iter().map(|s| s.metrics.get(metric)).collect()
    }

    pub fn feature_vectors(&self) -> Vec<FeatureVector> {
        self.samples.iter().map(|s| s.metrics.to_vector()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HealthMetrics;
    use chrono::Utc;

    fn sample(cpu: f64) -> HealthSample {
        HealthSample {
            timestamp: Utc::now(),
            metrics: HealthMetrics {
                cpu_usage: cpu,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut h = HealthHistory::new(3);
        for i in 0..3 {
            assert!(h.push(sample(i as f64)).is_none());
        }
        let evicted = h.push(sample(3.0)).expect("window was full");
        assert_eq!(evicted.metrics.cpu_usage, 0.0);
        assert_eq!(h.len(), 3);
        assert_eq!(h.values(Metric::CpuUsage), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_last_n_is_oldest_first() {
        let mut h = HealthHistory::new(10);
        for i in 0..5 {
            h.push(sample(i as f64));
        }
        let tail: Vec<f64> = h.last_n(3).map(|s| s.metrics.cpu_usage).collect();
        assert_eq!(tail, vec![2.0, 3.0, 4.0]);
        assert_eq!(h.last_n(50).count(), 5);
    }
}
