//! Anomaly Detector - isolation forest + labelled pattern library
//!
//! Two cooperating mechanisms score a health feature vector:
//!
//! 1. **Isolation forest**: unsupervised, trained on recent normal
//!    operation; scores how easily the vector is isolated.
//! 2. **Pattern library**: cosine-similarity scan over remembered
//!    (vector, bug_occurred) pairs, compared as deviations from the
//!    reference frame.
//!
//! A vector is anomalous when the forest score exceeds its threshold or
//! the best matching pattern is a known bug. Only a bug-pattern match
//! triggers bug-type inference.
//!
//! ## Concurrency
//!
//! The trained model and the library are published through `ArcSwap`, so
//! `detect()` reads a consistent snapshot without locking. `train()` and
//! `record_pattern()` are serialised by a writer mutex and publish a new
//! snapshot when done (single writer, many readers).

pub mod isolation_forest;
pub mod patterns;
pub mod reference;

pub use isolation_forest::IsolationForest;
pub use patterns::{cosine_similarity, PatternLibrary, PatternMatch, RecordOutcome};
pub use reference::ReferenceFrame;

use arc_swap::ArcSwap;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{DetectorConfig, InferenceStrategy};
use crate::types::{
    AnomalyPattern, BugType, DetectionResult, FeatureVector, Metric, Polarity, Severity,
    FEATURE_DIM,
};
use patterns::to_feature_vector;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Feature vector has {actual} elements, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Training needs at least {required} finite samples, got {actual}")]
    InsufficientTrainingData { required: usize, actual: usize },

    #[error("Feature vector contains a non-finite value at index {0}")]
    NonFinite(usize),
}

/// Forest plus the frame its training data defined.
struct Model {
    forest: Option<IsolationForest>,
    frame: ReferenceFrame,
}

/// Summary of one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub samples: usize,
    pub subsample_size: usize,
    pub trees: usize,
}

pub struct AnomalyDetector {
    config: DetectorConfig,
    model: ArcSwap<Model>,
    library: ArcSwap<PatternLibrary>,
    writer: Mutex<()>,
}

impl AnomalyDetector {
    /// Untrained detector. Seeds the library with bug signatures when
    /// `config.seed_library` is set.
    pub fn new(config: DetectorConfig) -> Self {
        let frame = ReferenceFrame::from_envelope(&config.envelope);
        let library = if config.seed_library {
            PatternLibrary::seeded(&frame, Utc::now())
        } else {
            PatternLibrary::new()
        };
        Self::assemble(config, frame, library)
    }

    /// Untrained detector over a restored library.
    pub fn with_library(config: DetectorConfig, library: PatternLibrary) -> Self {
        let frame = ReferenceFrame::from_envelope(&config.envelope);
        Self::assemble(config, frame, library)
    }

    fn assemble(config: DetectorConfig, frame: ReferenceFrame, library: PatternLibrary) -> Self {
        Self {
            config,
            model: ArcSwap::from_pointee(Model {
                forest: None,
                frame,
            }),
            library: ArcSwap::from_pointee(library),
            writer: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    // ========================================================================
    // Detection
    // ========================================================================

    /// Score a 7-element feature vector.
    ///
    /// Fails only on a wrong length or a non-finite element; for any
    /// well-formed vector the confidence lies in [0, 1].
    pub fn detect(&self, vector: &[f64]) -> Result<DetectionResult, DetectorError> {
        let v = checked_vector(vector)?;
        let model = self.model.load();
        let library = self.library.load();

        let forest_score = model.forest.as_ref().map_or(0.0, |f| f.score(&v));

        let matched = library.best_match(&v, &model.frame, self.config.similarity_threshold);

        let bug_match = matched.as_ref().filter(|m| m.pattern.bug_occurred);
        let is_anomaly = forest_score > self.config.anomaly_threshold || bug_match.is_some();
        let confidence = bug_match
            .map_or(forest_score, |m| forest_score.max(m.similarity))
            .clamp(0.0, 1.0);

        let inferred_bug_type = bug_match.map(|_| self.infer_bug_type(&v, &model.frame));
        let recommended_action = inferred_bug_type
            .as_ref()
            .map(|b| b.recommended_action().to_string());

        debug!(
            forest_score,
            confidence,
            is_anomaly,
            matched = matched.as_ref().map(|m| m.pattern.id.as_str()),
            "Detection"
        );

        Ok(DetectionResult {
            is_anomaly,
            confidence,
            forest_score,
            matched_pattern_id: matched.as_ref().map(|m| m.pattern.id.clone()),
            similarity: matched.as_ref().map(|m| m.similarity),
            inferred_bug_type,
            recommended_action,
        })
    }

    /// Map the metric excursion of `v` onto the bug taxonomy.
    fn infer_bug_type(&self, v: &FeatureVector, frame: &ReferenceFrame) -> BugType {
        let excursions = Metric::SAMPLED.iter().filter_map(|&m| {
            let z = frame.z_score(v, m.index());
            let worse = match m.polarity() {
                Polarity::HigherIsWorse => z,
                Polarity::LowerIsWorse => -z,
            };
            (worse > self.config.z_threshold).then_some((m, worse))
        });

        let picked = match self.config.inference {
            InferenceStrategy::FirstExceeding => excursions.map(|(m, _)| m).next(),
            InferenceStrategy::Strongest => excursions
                .fold(None::<(Metric, f64)>, |best, (m, z)| match best {
                    Some((_, bz)) if bz >= z => best,
                    _ => Some((m, z)),
                })
                .map(|(m, _)| m),
        };

        picked.map_or(BugType::Unknown, BugType::from_metric)
    }

    // ========================================================================
    // Learning
    // ========================================================================

    /// Fit a new forest and reference frame on `data` (non-finite rows are
    /// skipped) and publish them. Unobserved bug signatures follow the new
    /// frame.
    pub fn train(&self, data: &[FeatureVector]) -> Result<TrainingSummary, DetectorError> {
        let clean: Vec<FeatureVector> = data
            .iter()
            .filter(|v| v.iter().all(|x| x.is_finite()))
            .copied()
            .collect();
        let required = self.config.min_training_samples.max(2);
        if clean.len() < required {
            return Err(DetectorError::InsufficientTrainingData {
                required,
                actual: clean.len(),
            });
        }

        let seed = self.config.seed.unwrap_or_else(rand::random);
        let forest = IsolationForest::fit(
            &clean,
            self.config.num_trees,
            self.config.max_samples,
            seed,
        )
        .ok_or(DetectorError::InsufficientTrainingData {
            required,
            actual: clean.len(),
        })?;
        let frame = ReferenceFrame::from_data(&clean).ok_or(
            DetectorError::InsufficientTrainingData {
                required,
                actual: clean.len(),
            },
        )?;

        let summary = TrainingSummary {
            samples: clean.len(),
            subsample_size: forest.subsample_size(),
            trees: forest.num_trees(),
        };

        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let previous = self.model.load();
        let mut library = PatternLibrary::clone(&self.library.load());
        library.reanchor_signatures(&previous.frame, &frame);
        self.library.store(Arc::new(library));
        self.model.store(Arc::new(Model {
            forest: Some(forest),
            frame,
        }));

        info!(
            samples = summary.samples,
            subsample = summary.subsample_size,
            trees = summary.trees,
            "Isolation forest trained"
        );
        Ok(summary)
    }

    /// Remember `vector` in the library, merging into a similar pattern
    /// with the same `bug_occurred` flag when one exists.
    pub fn record_pattern(
        &self,
        vector: &[f64],
        bug_occurred: bool,
    ) -> Result<RecordOutcome, DetectorError> {
        let v = checked_vector(vector)?;
        let model = self.model.load();
        let severity = if bug_occurred {
            let forest_score = model.forest.as_ref().map_or(0.0, |f| f.score(&v));
            Severity::from_confidence(forest_score).max(Severity::Medium)
        } else {
            Severity::Low
        };

        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut library = PatternLibrary::clone(&self.library.load());
        let outcome = library.record(
            &v,
            bug_occurred,
            severity,
            &model.frame,
            self.config.similarity_threshold,
            Utc::now(),
        );
        self.library.store(Arc::new(library));

        debug!(pattern = outcome.id(), bug_occurred, "Pattern recorded");
        Ok(outcome)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn is_trained(&self) -> bool {
        self.model.load().forest.is_some()
    }

    pub fn reference(&self) -> ReferenceFrame {
        self.model.load().frame.clone()
    }

    /// Snapshot of the library.
    pub fn library(&self) -> Arc<PatternLibrary> {
        self.library.load_full()
    }

    pub fn patterns(&self) -> Vec<AnomalyPattern> {
        self.library.load().patterns().to_vec()
    }
}

fn checked_vector(vector: &[f64]) -> Result<FeatureVector, DetectorError> {
    let v = to_feature_vector(vector).ok_or(DetectorError::DimensionMismatch {
        expected: FEATURE_DIM,
        actual: vector.len(),
    })?;
    if let Some(i) = v.iter().position(|x| !x.is_finite()) {
        return Err(DetectorError::NonFinite(i));
    }
    Ok(v)
}

// ============================================================================
// Tests
// ============================================================================
