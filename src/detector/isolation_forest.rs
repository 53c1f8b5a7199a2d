//! Isolation Forest - unsupervised anomaly scoring by random partitioning
//!
//! Each tree is grown on a random subsample (without replacement) by
//! repeatedly choosing a feature and a split value uniformly inside that
//! feature's range in the current partition. Points that are easy to
//! isolate end up at shallow depth; averaging depth over the ensemble and
//! normalising by `c(ψ)` gives a score in (0, 1] where values near 1 mean
//! "isolated almost immediately".

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::types::{FeatureVector, FEATURE_DIM};

/// Euler–Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points,
/// used to normalise depths and to credit unexpanded leaves.
///
/// `c(n) = 2·(ln(n−1) + γ) − 2(n−1)/n` for n > 2, `c(2) = 1`, `c(≤1) = 0`.
pub fn c_factor(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

// ============================================================================
// Isolation Tree
// ============================================================================

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// One random-partition tree.
#[derive(Debug, Clone)]
pub struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    /// Grow a tree over `data[indices]` with the given depth limit.
    fn grow(data: &[FeatureVector], indices: Vec<usize>, depth_limit: usize, rng: &mut StdRng) -> Self {
        Self {
            root: grow_node(data, indices, 0, depth_limit, rng),
        }
    }

    /// Depth at which `v` lands in a leaf, plus `c(leaf size)` for the
    /// points the leaf left unseparated.
    pub fn path_length(&self, v: &FeatureVector) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Leaf { size } => return depth + c_factor(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if v[*feature] < *threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

fn grow_node(
    data: &[FeatureVector],
    indices: Vec<usize>,
    depth: usize,
    depth_limit: usize,
    rng: &mut StdRng,
) -> Node {
    if indices.len() <= 1 || depth >= depth_limit {
        return Node::Leaf { size: indices.len() };
    }

    // Only features that still vary inside this partition can split it
    let mut splittable: Vec<(usize, f64, f64)> = Vec::with_capacity(FEATURE_DIM);
    for feature in 0..FEATURE_DIM {
        let (min, max) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            let x = data[i][feature];
            (lo.min(x), hi.max(x))
        });
        // a range too wide for f64 cannot be sampled uniformly
        if max > min && (max - min).is_finite() {
            splittable.push((feature, min, max));
        }
    }
    if splittable.is_empty() {
        return Node::Leaf { size: indices.len() };
    }

    let (feature, min, max) = splittable[rng.gen_range(0..splittable.len())];
    let threshold = rng.gen_range(min..max);
    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.into_iter().partition(|&i| data[i][feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(grow_node(data, left, depth + 1, depth_limit, rng)),
        right: Box::new(grow_node(data, right, depth + 1, depth_limit, rng)),
    }
}

// ============================================================================
// Isolation Forest
// ============================================================================

/// Ensemble of isolation trees sharing one subsample size.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    subsample_size: usize,
    trained_on: usize,
}

impl IsolationForest {
    /// Build `num_trees` trees from `data`.
    ///
    /// Subsample size is `min(max_samples, data.len())`; depth is limited
    /// to `ceil(log2(subsample))`. Trees are grown in parallel, each from
    /// its own seed drawn from `seed`, so a fixed seed reproduces the forest.
    /// Returns `None` with fewer than two training points.
    pub fn fit(data: &[FeatureVector], num_trees: usize, max_samples: usize, seed: u64) -> Option<Self> {
        if data.len() < 2 || num_trees == 0 {
            return None;
        }
        let subsample_size = max_samples.clamp(2, data.len());
        let depth_limit = (subsample_size as f64).log2().ceil() as usize;

        let mut master = StdRng::seed_from_u64(seed);
        let tree_seeds: Vec<u64> = (0..num_trees).map(|_| master.gen()).collect();

        let trees = tree_seeds
            .into_par_iter()
            .map(|tree_seed| {
                let mut rng = StdRng::seed_from_u64(tree_seed);
                let indices = rand::seq::index::sample(&mut rng, data.len(), subsample_size).into_vec();
                IsolationTree::grow(data, indices, depth_limit, &mut rng)
            })
            .collect();

        Some(Self {
            trees,
            subsample_size,
            trained_on: data.len(),
        })
    }

    /// Mean path length of `v` across all trees.
    pub fn average_path_length(&self, v: &FeatureVector) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|t| t.path_length(v)).sum();
        total / self.trees.len() as f64
    }

    /// Anomaly score `2^(−E[h(v)] / c(ψ))`, in (0, 1]. Shorter average
    /// paths score closer to 1.
    pub fn score(&self, v: &FeatureVector) -> f64 {
        let c = c_factor(self.subsample_size);
        if c <= 0.0 {
            return 0.0;
        }
        2f64.powf(-self.average_path_length(v) / c).clamp(0.0, 1.0)
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn subsample_size(&self) -> usize {
        self.subsample_size
    }

    /// Number of vectors the forest was fitted on.
    pub fn trained_on(&self) -> usize {
        self.trained_on
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_data(n: usize, seed: u64) -> Vec<FeatureVector> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let mut v = [0.0; FEATURE_DIM];
                for x in &mut v {
                    *x = rng.gen_range(0.0..1.0);
                }
                v
            })
            .collect()
    }

    #[test]
    fn test_c_factor_values() {
        assert_eq!(c_factor(0), 0.0);
        assert_eq!(c_factor(1), 0.0);
        assert_eq!(c_factor(2), 1.0);
        // c(256) ≈ 10.24
        assert!((c_factor(256) - 10.24).abs() < 0.01, "{}", c_factor(256));
    }

    #[test]
    fn test_fit_requires_two_points() {
        assert!(IsolationForest::fit(&[], 10, 256, 0).is_none());
        assert!(IsolationForest::fit(&[[0.5; FEATURE_DIM]], 10, 256, 0).is_none());
    }

    #[test]
    fn test_subsample_is_capped_by_data() {
        let data = uniform_data(40, 1);
        let forest = IsolationForest::fit(&data, 20, 256, 1).unwrap();
        assert_eq!(forest.subsample_size(), 40);
        assert_eq!(forest.num_trees(), 20);
        assert_eq!(forest.trained_on(), 40);

        let data = uniform_data(600, 1);
        let forest = IsolationForest::fit(&data, 5, 256, 1).unwrap();
        assert_eq!(forest.subsample_size(), 256);
    }

    #[test]
    fn test_extreme_outlier_scores_higher_across_seeds() {
        let data = uniform_data(256, 7);
        let inlier = [0.5; FEATURE_DIM];
        let mut outlier = inlier;
        outlier[2] = 10.0;

        for seed in 0..8 {
            let forest = IsolationForest::fit(&data, 100, 256, seed).unwrap();
            let s_in = forest.score(&inlier);
            let s_out = forest.score(&outlier);
            assert!(
                s_out > s_in,
                "seed {seed}: outlier {s_out:.4} should exceed inlier {s_in:.4}"
            );
            assert!((0.0..=1.0).contains(&s_in));
            assert!((0.0..=1.0).contains(&s_out));
        }
    }

    #[test]
    fn test_same_seed_same_scores() {
        let data = uniform_data(100, 3);
        let a = IsolationForest::fit(&data, 30, 64, 99).unwrap();
        let b = IsolationForest::fit(&data, 30, 64, 99).unwrap();
        let point = [0.9, 0.1, 0.5, 0.5, 0.2, 0.8, 0.3];
        assert_eq!(a.score(&point), b.score(&point));
    }

    #[test]
    fn test_range_wider_than_f64_is_not_split() {
        let mut data = uniform_data(32, 5);
        for (i, v) in data.iter_mut().enumerate() {
            v[0] = if i % 2 == 0 { 1e308 } else { -1e308 };
        }
        let forest = IsolationForest::fit(&data, 20, 32, 5).unwrap();
        let s = forest.score(&data[0]);
        assert!((0.0..=1.0).contains(&s), "{s}");

        // nothing splittable at all: single leaf per tree
        let extremes: Vec<FeatureVector> = (0..8)
            .map(|i| [if i % 2 == 0 { f64::MAX } else { -f64::MAX }; FEATURE_DIM])
            .collect();
        let forest = IsolationForest::fit(&extremes, 4, 8, 0).unwrap();
        assert!((forest.score(&extremes[1]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_constant_data_gives_single_leaf() {
        let data = vec![[0.3; FEATURE_DIM]; 16];
        let forest = IsolationForest::fit(&data, 4, 16, 0).unwrap();
        // Every tree is one leaf of 16 points: path = c(16), score = 0.5
        let s = forest.score(&[0.3; FEATURE_DIM]);
        assert!((s - 0.5).abs() < 1e-9, "{s}");
    }
}
