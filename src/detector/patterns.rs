//! Pattern library - labelled points in feature space, matched by direction
//!
//! Vectors are compared as z-scored deviations from the detector's reference
//! frame, so similarity measures "which metrics moved, and in what
//! proportion" rather than raw magnitudes dominated by milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reference::ReferenceFrame;
use crate::config::defaults::MIN_MATCH_DEVIATION;
use crate::types::{AnomalyPattern, BugType, FeatureVector, Severity, FEATURE_DIM};

/// Prefix of the built-in bug signatures.
pub const SIGNATURE_PREFIX: &str = "sig-";

/// Cosine similarity in [-1, 1]. Identical vectors are always 1.0, even
/// when both are zero; otherwise a zero vector has similarity 0.
pub fn cosine_similarity(a: &FeatureVector, b: &FeatureVector) -> f64 {
    if a == b {
        return 1.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na <= f64::EPSILON || nb <= f64::EPSILON {
        return 0.0;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0)
}

/// Similarity of two deviations for matching purposes. A deviation shorter
/// than [`MIN_MATCH_DEVIATION`] has no usable direction and only matches
/// itself. Deviations that overflowed never match.
fn match_similarity(deviation: &FeatureVector, candidate: &FeatureVector) -> Option<f64> {
    let length = deviation.iter().map(|x| x * x).sum::<f64>().sqrt();
    if length < MIN_MATCH_DEVIATION && deviation != candidate {
        return None;
    }
    let sim = cosine_similarity(deviation, candidate);
    sim.is_finite().then_some(sim)
}

/// Deviation direction (in σ) characteristic of each bug class, ordered
/// cpu, memory, error_rate, response_time, queue_depth, deadlock_risk,
/// anomaly_score.
pub fn bug_signatures() -> Vec<(BugType, FeatureVector)> {
    vec![
        (BugType::MemoryLeak, [0.0, 4.0, 0.5, 1.0, 0.5, 0.0, 1.0]),
        (BugType::InfiniteLoop, [4.0, 0.5, 0.0, 1.5, 1.0, 0.0, 1.0]),
        (BugType::Deadlock, [0.0, 0.0, 0.5, 1.5, 1.5, 4.0, 1.0]),
        (BugType::ExceptionHandling, [0.0, 0.0, 4.0, 0.5, 0.0, 0.0, 1.0]),
        (BugType::PerformanceDegradation, [0.5, 0.5, 1.0, 4.0, 1.0, 0.0, 1.0]),
        (BugType::ResourceExhaustion, [0.5, 1.0, 0.5, 1.0, 4.0, 0.0, 1.0]),
    ]
}

/// What `record` did with a vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Merged { id: String, frequency: u64 },
    Added { id: String },
}

impl RecordOutcome {
    pub fn id(&self) -> &str {
        match self {
            RecordOutcome::Merged { id, .. } | RecordOutcome::Added { id } => id,
        }
    }
}

/// Best library entry for a vector.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub pattern: AnomalyPattern,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternLibrary {
    patterns: Vec<AnomalyPattern>,
    next_id: u64,
}

impl PatternLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a persisted record list.
    pub fn from_patterns(patterns: Vec<AnomalyPattern>) -> Self {
        let next_id = patterns
            .iter()
            .filter_map(|p| p.id.strip_prefix("pat-")?.parse::<u64>().ok())
            .max()
            .map_or(0, |n| n + 1);
        Self { patterns, next_id }
    }

    /// Library holding one bug signature per taxonomy class, anchored to `frame`.
    pub fn seeded(frame: &ReferenceFrame, now: DateTime<Utc>) -> Self {
        let patterns = bug_signatures()
            .into_iter()
            .map(|(bug_type, direction)| AnomalyPattern {
                id: format!("{SIGNATURE_PREFIX}{bug_type}"),
                feature_vector: frame.point_at(&direction),
                severity: Severity::High,
                frequency: 0,
                last_seen: now,
                bug_occurred: true,
            })
            .collect();
        Self { patterns, next_id: 0 }
    }

    pub fn patterns(&self) -> &[AnomalyPattern] {
        &self.patterns
    }

    pub fn into_patterns(self) -> Vec<AnomalyPattern> {
        self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&AnomalyPattern> {
        self.patterns.iter().find(|p| p.id == id)
    }

    /// Move never-observed signatures to the same deviation direction in a
    /// new reference frame. Observed patterns stay where they were seen.
    pub fn reanchor_signatures(&mut self, from: &ReferenceFrame, to: &ReferenceFrame) {
        for p in &mut self.patterns {
            if p.frequency == 0 && p.id.starts_with(SIGNATURE_PREFIX) {
                let direction = from.deviation(&p.feature_vector);
                p.feature_vector = to.point_at(&direction);
            }
        }
    }

    /// Highest-similarity pattern at or above `threshold`. Ties prefer the
    /// more frequent pattern, then the earlier one. A vector close to the
    /// frame's mean only matches a pattern recorded at the same point.
    pub fn best_match(
        &self,
        vector: &FeatureVector,
        frame: &ReferenceFrame,
        threshold: f64,
    ) -> Option<PatternMatch> {
        let deviation = frame.deviation(vector);
        let mut best: Option<(&AnomalyPattern, f64)> = None;
        for p in &self.patterns {
            let Some(sim) = match_similarity(&deviation, &frame.deviation(&p.feature_vector))
            else {
                continue;
            };
            if sim < threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((b, b_sim)) => sim > b_sim || (sim == b_sim && p.frequency > b.frequency),
            };
            if better {
                best = Some((p, sim));
            }
        }
        best.map(|(p, similarity)| PatternMatch {
            pattern: p.clone(),
            similarity,
        })
    }

    /// Merge `vector` into the most similar pattern with the same
    /// `bug_occurred` flag (similarity ≥ `threshold`), or append a new one.
    pub fn record(
        &mut self,
        vector: &FeatureVector,
        bug_occurred: bool,
        severity: Severity,
        frame: &ReferenceFrame,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> RecordOutcome {
        let deviation = frame.deviation(vector);
        let target = self
            .patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| p.bug_occurred == bug_occurred)
            .filter_map(|(i, p)| {
                match_similarity(&deviation, &frame.deviation(&p.feature_vector)).map(|sim| (i, sim))
            })
            .filter(|(_, sim)| *sim >= threshold)
            .fold(None::<(usize, f64)>, |best, (i, sim)| match best {
                Some((_, b)) if b >= sim => best,
                _ => Some((i, sim)),
            });

        if let Some((i, _)) = target {
            let p = &mut self.patterns[i];
            p.frequency += 1;
            p.last_seen = now;
            p.severity = p.severity.max(severity);
            return RecordOutcome::Merged {
                id: p.id.clone(),
                frequency: p.frequency,
            };
        }

        let id = format!("pat-{}", self.next_id);
        self.next_id += 1;
        self.patterns.push(AnomalyPattern {
            id: id.clone(),
            feature_vector: *vector,
            severity,
            frequency: 1,
            last_seen: now,
            bug_occurred,
        });
        RecordOutcome::Added { id }
    }
}

/// Checked conversion from an arbitrary slice to a feature vector.
pub(crate) fn to_feature_vector(v: &[f64]) -> Option<FeatureVector> {
    <[f64; FEATURE_DIM]>::try_from(v).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalEnvelope;

    fn frame() -> ReferenceFrame {
        ReferenceFrame::from_envelope(&NormalEnvelope::default())
    }

    #[test]
    fn test_cosine_similarity_basics() {
        let a = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &a), 1.0);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&[0.0; 7], &[0.0; 7]), 1.0);
        assert_eq!(cosine_similarity(&[0.0; 7], &a), 0.0);
        let neg = a.map(|x| -x);
        assert_eq!(cosine_similarity(&a, &neg), -1.0);
    }

    #[test]
    fn test_seeded_library_has_one_signature_per_class() {
        let lib = PatternLibrary::seeded(&frame(), Utc::now());
        assert_eq!(lib.len(), 6);
        assert!(lib.patterns().iter().all(|p| p.bug_occurred && p.frequency == 0));
        assert!(lib.get("sig-memory_leak").is_some());
        assert!(lib.get("sig-resource_exhaustion").is_some());
    }

    #[test]
    fn test_signature_matches_its_own_direction() {
        let f = frame();
        let lib = PatternLibrary::seeded(&f, Utc::now());
        // Memory far above normal, everything else slightly up
        let v = f.point_at(&[0.0, 8.0, 1.0, 2.0, 1.0, 0.0, 2.0]);
        let m = lib.best_match(&v, &f, 0.8).unwrap();
        assert_eq!(m.pattern.id, "sig-memory_leak");
        assert!(m.similarity > 0.99);
    }

    #[test]
    fn test_record_is_idempotent_under_merge() {
        let f = frame();
        let mut lib = PatternLibrary::new();
        let v = f.point_at(&[3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let first = lib.record(&v, true, Severity::Medium, &f, 0.8, Utc::now());
        let second = lib.record(&v, true, Severity::Medium, &f, 0.8, Utc::now());
        assert_eq!(first, RecordOutcome::Added { id: "pat-0".into() });
        assert_eq!(
            second,
            RecordOutcome::Merged {
                id: "pat-0".into(),
                frequency: 2
            }
        );
        assert_eq!(lib.len(), 1);
    }

    #[test]
    fn test_opposite_flag_does_not_merge() {
        let f = frame();
        let mut lib = PatternLibrary::new();
        let v = f.point_at(&[0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 0.0]);
        lib.record(&v, true, Severity::High, &f, 0.8, Utc::now());
        let outcome = lib.record(&v, false, Severity::Low, &f, 0.8, Utc::now());
        assert!(matches!(outcome, RecordOutcome::Added { .. }));
        assert_eq!(lib.len(), 2);
    }

    #[test]
    fn test_from_patterns_continues_id_sequence() {
        let f = frame();
        let mut lib = PatternLibrary::seeded(&f, Utc::now());
        lib.record(&f.point_at(&[0.0, 0.0, 0.0, 0.0, 0.0, -3.0, 0.0]), false, Severity::Low, &f, 0.8, Utc::now());
        lib.record(&f.point_at(&[-3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]), false, Severity::Low, &f, 0.8, Utc::now());

        let mut restored = PatternLibrary::from_patterns(lib.clone().into_patterns());
        let outcome = restored.record(
            &f.point_at(&[0.0, -3.0, 0.0, 0.0, -3.0, 0.0, 0.0]),
            false,
            Severity::Low,
            &f,
            0.99,
            Utc::now(),
        );
        assert_eq!(outcome.id(), "pat-2");
    }

    #[test]
    fn test_reanchor_moves_only_unobserved_signatures() {
        let old = frame();
        let mut new = old.clone();
        new.mean[3] = 1_000.0;
        new.std[3] = 100.0;

        let mut lib = PatternLibrary::seeded(&old, Utc::now());
        let v = old.point_at(&[0.0, 4.0, 0.5, 1.0, 0.5, 0.0, 1.0]);
        lib.record(&v, true, Severity::High, &old, 0.8, Utc::now());
        let observed_before = lib.get("sig-memory_leak").unwrap().feature_vector;

        lib.reanchor_signatures(&old, &new);

        assert_eq!(lib.get("sig-memory_leak").unwrap().feature_vector, observed_before);
        let perf = lib.get("sig-performance_degradation").unwrap();
        assert!((new.deviation(&perf.feature_vector)[3] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_deviation_matches_only_its_own_point() {
        let f = frame();
        let mut lib = PatternLibrary::seeded(&f, Utc::now());
        // 1.5σ along the memory leak direction: right heading, too short
        let near = f.point_at(&[0.0, 1.5, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(lib.best_match(&near, &f, 0.8).is_none());

        let outcome = lib.record(&near, true, Severity::Medium, &f, 0.8, Utc::now());
        assert_eq!(outcome, RecordOutcome::Added { id: "pat-0".into() });
        let m = lib.best_match(&near, &f, 0.8).unwrap();
        assert_eq!(m.pattern.id, "pat-0");
        assert_eq!(m.similarity, 1.0);

        let beside = f.point_at(&[0.0, 1.4, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(lib.best_match(&beside, &f, 0.8).is_none());
    }

    #[test]
    fn test_to_feature_vector_checks_length() {
        assert!(to_feature_vector(&[0.0; 7]).is_some());
        assert!(to_feature_vector(&[0.0; 6]).is_none());
        assert!(to_feature_vector(&[0.0; 8]).is_none());
    }
}
