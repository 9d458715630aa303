use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{seq::index, Rng, SeedableRng};
use rayon::prelude::*;

use crate::errors::{PipelineError, Result};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One isolation tree stored as a flat node arena; index 0 is the root.
#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn build(data: &ArrayView2<f64>, sample: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(data, sample, 0, height_limit, rng);
        tree
    }

    fn grow(
        &mut self,
        data: &ArrayView2<f64>,
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });
        if depth >= height_limit || rows.len() <= 1 {
            return id;
        }

        // Only features with a non-degenerate range can separate rows.
        let ranges: Vec<(usize, f64, f64)> = (0..data.ncols())
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    let v = data[[r, f]];
                    (lo.min(v), hi.max(v))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if ranges.is_empty() {
            return id;
        }

        let (feature, lo, hi) = ranges[rng.gen_range(0..ranges.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[[r, feature]] <= threshold);

        let left = self.grow(data, left_rows, depth + 1, height_limit, rng);
        let right = self.grow(data, right_rows, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, x: &ArrayView1<f64>) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Unsupervised outlier model with a contamination-derived decision threshold.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    n_features: usize,
    subsample_size: usize,
    threshold: f64,
}

impl IsolationForest {
    pub fn fit(
        data: ArrayView2<f64>,
        n_trees: usize,
        max_samples: usize,
        contamination: f64,
        seed: u64,
    ) -> Result<Self> {
        let n = data.nrows();
        if n == 0 {
            return Err(PipelineError::EmptyTrainingTable);
        }
        let subsample_size = max_samples.min(n);
        let height_limit = (subsample_size.max(2) as f64).log2().ceil() as usize;

        let mut rng = StdRng::seed_from_u64(seed);
        let trees = (0..n_trees)
            .map(|_| {
                let sample = index::sample(&mut rng, n, subsample_size).into_vec();
                IsolationTree::build(&data, sample, height_limit, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            n_features: data.ncols(),
            subsample_size,
            threshold: f64::INFINITY,
        };
        let training_scores = forest.score_samples(data)?;
        forest.threshold = quantile(&training_scores, 1.0 - contamination);
        Ok(forest)
    }

    /// Anomaly score in (0, 1]; higher is more anomalous.
    pub fn score_samples(&self, data: ArrayView2<f64>) -> Result<Vec<f64>> {
        if data.ncols() != self.n_features {
            return Err(PipelineError::FeatureMismatch {
                expected: self.n_features,
                found: data.ncols(),
            });
        }
        let norm = average_path_length(self.subsample_size);
        let n_trees = self.trees.len().max(1) as f64;
        let scores = (0..data.nrows())
            .into_par_iter()
            .map(|i| {
                let x = data.row(i);
                let mean_path = self.trees.iter().map(|t| t.path_length(&x)).sum::<f64>() / n_trees;
                if norm > 0.0 {
                    2f64.powf(-mean_path / norm)
                } else {
                    0.5
                }
            })
            .collect();
        Ok(scores)
    }

    /// `true` for rows scoring strictly above the fitted threshold.
    pub fn predict(&self, data: ArrayView2<f64>) -> Result<Vec<bool>> {
        Ok(self
            .score_samples(data)?
            .into_iter()
            .map(|s| s > self.threshold)
            .collect())
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

/// Linear-interpolation quantile, `q` in [0, 1].
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn clustered_with_outlier() -> Array2<f64> {
        let mut rows: Vec<f64> = Vec::new();
        for i in 0..60 {
            rows.push(0.6 + 0.001 * (i % 7) as f64);
            rows.push(0.0);
        }
        rows.extend_from_slice(&[-0.4, 1.0]);
        Array2::from_shape_vec((61, 2), rows).unwrap()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert_relative_eq!(average_path_length(256), 10.244_770_920_119_917, epsilon = 1e-9);
    }

    #[test]
    fn test_quantile_interpolates() {
        assert_relative_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 0.5), 2.5);
        assert_relative_eq!(quantile(&[4.0, 1.0], 1.0), 4.0);
    }

    #[test]
    fn test_isolated_point_scores_highest() {
        let data = clustered_with_outlier();
        let forest = IsolationForest::fit(data.view(), 100, 256, 0.02, 42).unwrap();
        let scores = forest.score_samples(data.view()).unwrap();
        let max_idx = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(max_idx, 60);
        assert!(forest.predict(data.view()).unwrap()[60]);
    }

    #[test]
    fn test_same_seed_same_scores() {
        let data = clustered_with_outlier();
        let a = IsolationForest::fit(data.view(), 50, 32, 0.06, 7).unwrap();
        let b = IsolationForest::fit(data.view(), 50, 32, 0.06, 7).unwrap();
        assert_eq!(
            a.score_samples(data.view()).unwrap(),
            b.score_samples(data.view()).unwrap()
        );
    }

    #[test]
    fn test_rejects_wrong_feature_count() {
        let data = clustered_with_outlier();
        let forest = IsolationForest::fit(data.view(), 10, 16, 0.06, 42).unwrap();
        let narrow = Array2::<f64>::zeros((3, 1));
        assert!(matches!(
            forest.score_samples(narrow.view()),
            Err(PipelineError::FeatureMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_empty_training_fails() {
        let empty = Array2::<f64>::zeros((0, 2));
        assert!(matches!(
            IsolationForest::fit(empty.view(), 10, 16, 0.06, 42),
            Err(PipelineError::EmptyTrainingTable)
        ));
    }
}
