//! Gradient-boosted decision tree ensemble with path attribution

use super::{Contributions, FraudModel};
use crate::error::ModelError;
use serde::{Deserialize, Serialize};

/// One node of a binary regression tree.
///
/// Samples with `x[feature] < threshold` go left. Child indices must be
/// greater than the parent's index, so a tree is stored in pre-order or
/// breadth-first order and never contains cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        /// Training weight that reached this node
        cover: f64,
        /// Loss reduction of this split
        #[serde(default)]
        gain: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

/// A single regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
    /// Cover-weighted expected output of every node, filled by `prepare`
    #[serde(skip)]
    expected: Vec<f64>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            expected: Vec::new(),
        }
    }

    /// A tree with a single leaf.
    pub fn leaf(value: f64) -> Self {
        Self::new(vec![Node::Leaf { value, cover: 1.0 }])
    }

    /// Check structure and compute the per-node expectations used for attribution.
    fn prepare(&mut self, tree_idx: usize, n_features: usize) -> Result<(), ModelError> {
        let malformed = |reason: String| ModelError::MalformedTree {
            tree: tree_idx,
            reason,
        };

        if self.nodes.is_empty() {
            return Err(malformed("tree has no nodes".to_string()));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(malformed(format!(
                            "node {i} splits on feature {feature}, model has {n_features}"
                        )));
                    }
                    if !threshold.is_finite() {
                        return Err(malformed(format!("node {i} has a non-finite threshold")));
                    }
                    for child in [*left, *right] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(malformed(format!(
                                "node {i} has invalid child index {child}"
                            )));
                        }
                    }
                }
                Node::Leaf { value, .. } => {
                    if !value.is_finite() {
                        return Err(malformed(format!("leaf {i} has a non-finite value")));
                    }
                }
            }
        }

        let mut expected = vec![0.0; self.nodes.len()];
        for i in (0..self.nodes.len()).rev() {
            expected[i] = match &self.nodes[i] {
                Node::Leaf { value, .. } => *value,
                Node::Split { left, right, .. } => {
                    let (lc, rc) = (self.nodes[*left].cover(), self.nodes[*right].cover());
                    if lc + rc > 0.0 {
                        (expected[*left] * lc + expected[*right] * rc) / (lc + rc)
                    } else {
                        (expected[*left] + expected[*right]) / 2.0
                    }
                }
            };
        }
        self.expected = expected;
        Ok(())
    }

    /// Leaf value reached by `x`.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value, .. } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    idx = if x[*feature] < *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Add this tree's decision-path contributions into `out`; returns the root expectation.
    fn contribute(&self, x: &[f64], out: &mut [f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { .. } => break,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    let next = if x[*feature] < *threshold { *left } else { *right };
                    out[*feature] += self.expected[next] - self.expected[idx];
                    idx = next;
                }
            }
        }
        self.expected[0]
    }
}

/// Additive tree ensemble with a logistic link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    /// Margin added before the tree outputs
    pub base_score: f64,
    pub trees: Vec<Tree>,
    pub n_features: usize,
    #[serde(skip)]
    prepared: bool,
}

impl TreeEnsemble {
    /// Build and validate an ensemble.
    pub fn new(base_score: f64, trees: Vec<Tree>, n_features: usize) -> Result<Self, ModelError> {
        let mut ensemble = Self {
            base_score,
            trees,
            n_features,
            prepared: false,
        };
        ensemble.prepare()?;
        Ok(ensemble)
    }

    /// Validate every tree and compute attribution tables. Required after deserialization.
    pub fn prepare(&mut self) -> Result<(), ModelError> {
        if !self.base_score.is_finite() {
            return Err(ModelError::NonFinite);
        }
        let n_features = self.n_features;
        for (i, tree) in self.trees.iter_mut().enumerate() {
            tree.prepare(i, n_features)?;
        }
        self.prepared = true;
        Ok(())
    }

    fn check(&self, x: &[f64]) -> Result<(), ModelError> {
        if !self.prepared {
            return Err(ModelError::MalformedTree {
                tree: 0,
                reason: "ensemble was not prepared".to_string(),
            });
        }
        if x.len() != self.n_features {
            return Err(ModelError::FeatureCount {
                expected: self.n_features,
                actual: x.len(),
            });
        }
        Ok(())
    }

    /// Raw additive score before the logistic link.
    pub fn margin(&self, x: &[f64]) -> Result<f64, ModelError> {
        self.check(x)?;
        let margin = self.base_score + self.trees.iter().map(|t| t.predict(x)).sum::<f64>();
        if margin.is_finite() {
            Ok(margin)
        } else {
            Err(ModelError::NonFinite)
        }
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl FraudModel for TreeEnsemble {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f64]) -> Result<f64, ModelError> {
        Ok(sigmoid(self.margin(x)?))
    }

    fn contributions(&self, x: &[f64]) -> Result<Contributions, ModelError> {
        self.check(x)?;
        let mut values = vec![0.0; self.n_features];
        let mut bias = self.base_score;
        for tree in &self.trees {
            bias += tree.contribute(x, &mut values);
        }
        Ok(Contributions { bias, values })
    }

    fn feature_importance(&self) -> Result<Vec<f64>, ModelError> {
        let mut gains = vec![0.0; self.n_features];
        let mut splits = vec![0.0; self.n_features];
        for tree in &self.trees {
            for node in &tree.nodes {
                if let Node::Split { feature, gain, .. } = node {
                    if *feature < self.n_features {
                        gains[*feature] += gain.max(0.0);
                        splits[*feature] += 1.0;
                    }
                }
            }
        }

        // Hand-built trees carry no gain, fall back to split frequency
        let raw = if gains.iter().sum::<f64>() > 0.0 { gains } else { splits };
        let total: f64 = raw.iter().sum();
        if total > 0.0 {
            Ok(raw.into_iter().map(|v| v / total).collect())
        } else {
            Ok(raw)
        }
    }
}
