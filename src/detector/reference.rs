//! Per-feature reference statistics used to put raw health vectors on a
//! common scale before comparing directions.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::config::defaults::MIN_REFERENCE_STD;
use crate::config::NormalEnvelope;
use crate::types::{FeatureVector, Metric, FEATURE_DIM};

/// Mean and standard deviation per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFrame {
    pub mean: FeatureVector,
    pub std: FeatureVector,
}

impl ReferenceFrame {
    /// Frame implied by an operating envelope: centre of the range, with
    /// the range treated as ±2σ.
    pub fn from_envelope(envelope: &NormalEnvelope) -> Self {
        let mut mean = [0.0; FEATURE_DIM];
        let mut std = [0.0; FEATURE_DIM];
        for metric in Metric::ALL {
            let [low, high] = envelope.range(metric);
            mean[metric.index()] = (low + high) / 2.0;
            std[metric.index()] = (high - low) / 4.0;
        }
        Self { mean, std }
    }

    /// Sample statistics of `data`. Returns `None` with fewer than two rows.
    pub fn from_data(data: &[FeatureVector]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }
        let mut mean = [0.0; FEATURE_DIM];
        let mut std = [0.0; FEATURE_DIM];
        for i in 0..FEATURE_DIM {
            let column: Vec<f64> = data.iter().map(|v| v[i]).collect();
            mean[i] = column.iter().mean();
            std[i] = column.iter().std_dev();
            if !mean[i].is_finite() || !std[i].is_finite() {
                // sums overflowed: fall back to the halved range
                let min = column.iter().copied().fold(f64::INFINITY, f64::min);
                let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                mean[i] = min / 2.0 + max / 2.0;
                std[i] = max / 2.0 - min / 2.0;
            }
        }
        Some(Self { mean, std })
    }

    /// Standard deviation with a floor so near-constant features do not
    /// explode z-scores.
    pub fn effective_std(&self, i: usize) -> f64 {
        let mean = self.mean[i];
        if !mean.is_finite() {
            return MIN_REFERENCE_STD;
        }
        let floor = (mean.abs() * MIN_REFERENCE_STD).max(MIN_REFERENCE_STD);
        let std = self.std[i];
        if std.is_finite() {
            std.max(floor)
        } else {
            floor
        }
    }

    pub fn z_score(&self, v: &FeatureVector, i: usize) -> f64 {
        (v[i] - self.mean[i]) / self.effective_std(i)
    }

    /// Whole-vector z-scores `(v − μ) / σ`.
    pub fn deviation(&self, v: &FeatureVector) -> FeatureVector {
        let mut d = [0.0; FEATURE_DIM];
        for (i, x) in d.iter_mut().enumerate() {
            *x = self.z_score(v, i);
        }
        d
    }

    /// Inverse of [`deviation`](Self::deviation): raw vector at the given
    /// z-scores.
    pub fn point_at(&self, deviation: &FeatureVector) -> FeatureVector {
        let mut v = [0.0; FEATURE_DIM];
        for (i, x) in v.iter_mut().enumerate() {
            *x = self.mean[i] + deviation[i] * self.effective_std(i);
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_frame() {
        let frame = ReferenceFrame::from_envelope(&NormalEnvelope::default());
        let rt = Metric::ResponseTime.index();
        assert_eq!(frame.mean[rt], 200.0);
        assert_eq!(frame.std[rt], 50.0);
    }

    #[test]
    fn test_data_frame_uses_sample_std() {
        let data = vec![[1.0; FEATURE_DIM], [3.0; FEATURE_DIM]];
        let frame = ReferenceFrame::from_data(&data).unwrap();
        assert_eq!(frame.mean[0], 2.0);
        assert!((frame.std[0] - 2f64.sqrt()).abs() < 1e-12);
        assert!(ReferenceFrame::from_data(&data[..1]).is_none());
    }

    #[test]
    fn test_constant_feature_is_floored() {
        let data = vec![[0.0; FEATURE_DIM]; 5];
        let frame = ReferenceFrame::from_data(&data).unwrap();
        assert_eq!(frame.effective_std(0), MIN_REFERENCE_STD);
        assert!(frame.z_score(&[1.0; FEATURE_DIM], 0).is_finite());
    }

    #[test]
    fn test_overflowing_column_stays_finite() {
        let data: Vec<FeatureVector> = (0..6)
            .map(|i| [if i % 2 == 0 { 1e308 } else { -1e308 }; FEATURE_DIM])
            .collect();
        let frame = ReferenceFrame::from_data(&data).unwrap();
        assert_eq!(frame.mean[0], 0.0);
        assert_eq!(frame.std[0], 1e308);
        assert!(frame.z_score(&data[0], 0).is_finite());
    }

    #[test]
    fn test_point_at_inverts_deviation() {
        let frame = ReferenceFrame::from_envelope(&NormalEnvelope::default());
        let v = [0.45, 0.52, 1.1, 240.0, 3.0, 0.04, 0.7];
        let back = frame.point_at(&frame.deviation(&v));
        for i in 0..FEATURE_DIM {
            assert!((back[i] - v[i]).abs() < 1e-9);
        }
    }
}
