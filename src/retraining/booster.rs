//! Gradient-boosted tree training with logistic loss.
//!
//! Exact greedy split search over feature orders sorted once up front,
//! second-order leaf weights with L2 regularization, row and column
//! subsampling from a seeded generator.

use super::CancellationToken;
use crate::error::RetrainError;
use crate::models::tree::{sigmoid, Node, Tree, TreeEnsemble};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Fixed hyperparameter profile of the booster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Minimum hessian sum per child
    pub min_child_weight: f64,
    /// Minimum loss reduction to split
    pub gamma: f64,
    /// L2 regularization on leaf weights
    pub lambda: f64,
    /// Fraction of rows sampled per tree
    pub subsample: f64,
    /// Fraction of features sampled per tree
    pub colsample_bytree: f64,
    /// Weight multiplier on positive samples
    pub scale_pos_weight: f64,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            n_trees: 150,
            max_depth: 3,
            learning_rate: 0.1,
            min_child_weight: 1.0,
            gamma: 0.0,
            lambda: 1.0,
            subsample: 0.8,
            colsample_bytree: 0.8,
            scale_pos_weight: 1.0,
        }
    }
}

impl BoosterParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.n_trees == 0 || self.max_depth == 0 {
            return Err("booster needs at least one tree of depth >= 1".to_string());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(format!("learning_rate must lie in (0, 1], got {}", self.learning_rate));
        }
        for (name, v) in [("subsample", self.subsample), ("colsample_bytree", self.colsample_bytree)] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(format!("{name} must lie in (0, 1], got {v}"));
            }
        }
        if self.lambda < 0.0 || self.gamma < 0.0 || self.min_child_weight < 0.0 || self.scale_pos_weight <= 0.0 {
            return Err("booster regularization parameters must be non-negative".to_string());
        }
        Ok(())
    }
}

pub struct GradientBooster {
    params: BoosterParams,
    seed: u64,
}

impl GradientBooster {
    pub fn new(params: BoosterParams, seed: u64) -> Self {
        Self { params, seed }
    }

    /// Fit an ensemble on `rows`; checks `cancel` before every tree.
    pub fn fit(
        &self,
        rows: &[Vec<f64>],
        labels: &[bool],
        cancel: &CancellationToken,
    ) -> Result<TreeEnsemble, RetrainError> {
        self.params.validate().map_err(RetrainError::Training)?;
        if rows.is_empty() || rows.len() != labels.len() {
            return Err(RetrainError::Training(format!(
                "{} rows with {} labels",
                rows.len(),
                labels.len()
            )));
        }
        let n_features = rows[0].len();
        if n_features == 0 || rows.iter().any(|r| r.len() != n_features) {
            return Err(RetrainError::Training("rows have inconsistent widths".to_string()));
        }

        let positives = labels.iter().filter(|&&l| l).count() as f64;
        let prior = (positives / labels.len() as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (prior / (1.0 - prior)).ln();

        let order: Vec<Vec<usize>> = (0..n_features)
            .map(|f| {
                let mut idx: Vec<usize> = (0..rows.len()).collect();
                idx.sort_by(|&a, &b| rows[a][f].total_cmp(&rows[b][f]));
                idx
            })
            .collect();

        let weights: Vec<f64> = labels
            .iter()
            .map(|&l| if l { self.params.scale_pos_weight } else { 1.0 })
            .collect();

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut margins = vec![base_score; rows.len()];
        let mut grad = vec![0.0; rows.len()];
        let mut hess = vec![0.0; rows.len()];
        let mut trees = Vec::with_capacity(self.params.n_trees);

        let n_rows_sampled = ((rows.len() as f64 * self.params.subsample).ceil() as usize).clamp(1, rows.len());
        let n_cols_sampled =
            ((n_features as f64 * self.params.colsample_bytree).ceil() as usize).clamp(1, n_features);

        for _ in 0..self.params.n_trees {
            cancel.check()?;

            for i in 0..rows.len() {
                let p = sigmoid(margins[i]);
                let y = if labels[i] { 1.0 } else { 0.0 };
                grad[i] = (p - y) * weights[i];
                hess[i] = (p * (1.0 - p)).max(1e-16) * weights[i];
            }

            let mut members = sample(&mut rng, rows.len(), n_rows_sampled).into_vec();
            members.sort_unstable();
            let mut features = sample(&mut rng, n_features, n_cols_sampled).into_vec();
            features.sort_unstable();

            let mut builder = TreeBuilder {
                rows,
                order: &order,
                grad: &grad,
                hess: &hess,
                features: &features,
                params: &self.params,
                stamp: vec![usize::MAX; rows.len()],
                next_stamp: 0,
                nodes: Vec::new(),
            };
            builder.build(&members, 0);
            let tree = Tree::new(builder.nodes);

            for (margin, row) in margins.iter_mut().zip(rows) {
                *margin += tree.predict(row);
            }
            trees.push(tree);
        }

        TreeEnsemble::new(base_score, trees, n_features).map_err(|e| RetrainError::Training(e.to_string()))
    }
}

struct SplitChoice {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    order: &'a [Vec<usize>],
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    params: &'a BoosterParams,
    /// Marks which rows belong to the node currently being split
    stamp: Vec<usize>,
    next_stamp: usize,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        -g / (h + self.params.lambda) * self.params.learning_rate
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda)
    }

    /// Build the subtree over `members` and return its root index.
    fn build(&mut self, members: &[usize], depth: usize) -> usize {
        let g: f64 = members.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = members.iter().map(|&i| self.hess[i]).sum();
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: self.leaf_value(g, h),
            cover: h,
        });

        if depth >= self.params.max_depth || h < 2.0 * self.params.min_child_weight || members.len() < 2 {
            return idx;
        }
        let Some(split) = self.best_split(members, g, h) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = members
            .iter()
            .partition(|&&i| self.rows[i][split.feature] < split.threshold);

        let left = self.build(&left_rows, depth + 1);
        let right = self.build(&right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
            cover: h,
            gain: split.gain,
        };
        idx
    }

    fn best_split(&mut self, members: &[usize], g: f64, h: f64) -> Option<SplitChoice> {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        for &i in members {
            self.stamp[i] = stamp;
        }

        let parent = self.score(g, h);
        let mcw = self.params.min_child_weight;
        let mut best: Option<SplitChoice> = None;

        for &f in self.features {
            let mut gl = 0.0;
            let mut hl = 0.0;
            let mut prev: Option<f64> = None;

            for &i in &self.order[f] {
                if self.stamp[i] != stamp {
                    continue;
                }
                let x = self.rows[i][f];
                if let Some(p) = prev {
                    if x > p && hl >= mcw && h - hl >= mcw {
                        let gain = 0.5 * (self.score(gl, hl) + self.score(g - gl, h - hl) - parent)
                            - self.params.gamma;
                        let better = best
                            .as_ref()
                            .map_or(true, |b| gain.partial_cmp(&b.gain) == Some(Ordering::Greater));
                        if gain > 1e-12 && better {
                            best = Some(SplitChoice {
                                feature: f,
                                threshold: p + (x - p) / 2.0,
                                gain,
                            });
                        }
                    }
                }
                gl += self.grad[i];
                hl += self.hess[i];
                prev = Some(x);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FraudModel;

    /// Fraud iff x0 > 0.5 and x1 > 0.5, plus a noise column
    fn conjunction(n: usize) -> (Vec<Vec<f64>>, Vec<bool>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n {
            let a = (i % 7) as f64 / 6.0;
            let b = (i % 5) as f64 / 4.0;
            let noise = ((i * 31) % 11) as f64;
            rows.push(vec![a, b, noise]);
            labels.push(a > 0.5 && b > 0.5);
        }
        (rows, labels)
    }

    #[test]
    fn test_learns_conjunction() {
        let (rows, labels) = conjunction(350);
        let params = BoosterParams {
            n_trees: 60,
            learning_rate: 0.3,
            subsample: 1.0,
            colsample_bytree: 1.0,
            ..Default::default()
        };
        let ensemble = GradientBooster::new(params, 42)
            .fit(&rows, &labels, &CancellationToken::new())
            .unwrap();

        let errors = rows
            .iter()
            .zip(&labels)
            .filter(|(r, l)| (ensemble.predict_proba(r).unwrap() >= 0.5) != **l)
            .count();
        assert_eq!(errors, 0);

        let importance = ensemble.feature_importance().unwrap();
        assert!(importance[2] < importance[0]);
        assert!(importance[2] < importance[1]);
    }

    #[test]
    fn test_training_is_deterministic_for_a_seed() {
        let (rows, labels) = conjunction(120);
        let params = BoosterParams {
            n_trees: 10,
            ..Default::default()
        };
        let a = GradientBooster::new(params.clone(), 7)
            .fit(&rows, &labels, &CancellationToken::new())
            .unwrap();
        let b = GradientBooster::new(params, 7)
            .fit(&rows, &labels, &CancellationToken::new())
            .unwrap();
        assert_eq!(a.trees, b.trees);
    }

    #[test]
    fn test_cancellation_stops_training() {
        let (rows, labels) = conjunction(50);
        let token = CancellationToken::new();
        token.cancel();
        let result = GradientBooster::new(BoosterParams::default(), 1).fit(&rows, &labels, &token);
        assert!(matches!(result, Err(RetrainError::Cancelled)));
    }

    #[test]
    fn test_rejects_bad_input() {
        let token = CancellationToken::new();
        let booster = GradientBooster::new(BoosterParams::default(), 1);
        assert!(booster.fit(&[], &[], &token).is_err());
        assert!(booster.fit(&[vec![1.0], vec![1.0, 2.0]], &[true, false], &token).is_err());

        let bad = BoosterParams {
            learning_rate: 0.0,
            ..Default::default()
        };
        assert!(GradientBooster::new(bad, 1).fit(&[vec![1.0]], &[true], &token).is_err());
    }
}
