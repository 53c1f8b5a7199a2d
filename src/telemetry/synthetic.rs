//! Synthetic telemetry for demos and tests

use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use super::{MetricEvent, MetricSource};
use crate::config::NormalEnvelope;
use crate::types::{HealthMetrics, Metric};

/// Draws each sampled metric from a normal distribution centred in its
/// envelope (σ = span / 6, clamped to the envelope), with an optional
/// scheduled spike.
pub struct SyntheticMetricSource {
    envelope: NormalEnvelope,
    rng: StdRng,
    emitted: u64,
    spike: Option<(u64, HealthMetrics)>,
}

impl SyntheticMetricSource {
    pub fn new(envelope: NormalEnvelope, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            envelope,
            rng,
            emitted: 0,
            spike: None,
        }
    }

    /// Emit `spike` (non-zero fields override the normal draw) as the
    /// `at`-th sample, counting from zero.
    pub fn with_spike(mut self, at: u64, spike: HealthMetrics) -> Self {
        self.spike = Some((at, spike));
        self
    }

    /// Draw one sample.
    pub fn next_sample(&mut self) -> HealthMetrics {
        let mut metrics = HealthMetrics::default();
        for metric in Metric::SAMPLED {
            let [low, high] = self.envelope.range(metric);
            let mid = (low + high) / 2.0;
            let sigma = ((high - low) / 6.0).max(f64::EPSILON);
            let value = match Normal::new(mid, sigma) {
                Ok(dist) => dist.sample(&mut self.rng).clamp(low, high),
                Err(_) => mid,
            };
            metrics.set(metric, value);
        }

        if let Some((at, spike)) = self.spike {
            if self.emitted == at {
                for metric in Metric::SAMPLED {
                    let v = spike.get(metric);
                    if v != 0.0 {
                        metrics.set(metric, v);
                    }
                }
            }
        }

        self.emitted += 1;
        metrics
    }
}

#[async_trait]
impl MetricSource for SyntheticMetricSource {
    async fn pull(&mut self) -> Result<MetricEvent> {
        Ok(MetricEvent::Sample(self.next_sample()))
    }

    fn source_name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_stay_in_envelope() {
        let envelope = NormalEnvelope::default();
        let mut src = SyntheticMetricSource::new(envelope.clone(), Some(3));
        for _ in 0..200 {
            let m = src.next_sample();
            for metric in Metric::SAMPLED {
                let [low, high] = envelope.range(metric);
                let v = m.get(metric);
                assert!(v >= low && v <= high, "{metric} = {v}");
            }
            assert_eq!(m.anomaly_score, 0.0);
        }
    }

    #[test]
    fn test_seed_is_reproducible() {
        let mut a = SyntheticMetricSource::new(NormalEnvelope::default(), Some(11));
        let mut b = SyntheticMetricSource::new(NormalEnvelope::default(), Some(11));
        for _ in 0..10 {
            assert_eq!(a.next_sample(), b.next_sample());
        }
    }

    #[test]
    fn test_scheduled_spike() {
        let spike = HealthMetrics {
            memory_usage: 0.97,
            response_time: 9_000.0,
            ..Default::default()
        };
        let mut src = SyntheticMetricSource::new(NormalEnvelope::default(), Some(1)).with_spike(2, spike);
        let first = src.next_sample();
        let _ = src.next_sample();
        let third = src.next_sample();
        assert!(first.response_time <= 300.0);
        assert_eq!(third.memory_usage, 0.97);
        assert_eq!(third.response_time, 9_000.0);
        // untouched fields still come from the envelope
        assert!(third.cpu_usage <= 0.5);
    }
}
