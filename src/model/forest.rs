//! Native isolation forest evaluator for forests fitted offline.
//! Scores follow the usual convention: `decision = score_samples - offset`,
//! outlier when `decision < 0`.

use super::{OutlierDetector, Prediction};
use crate::error::ModelError;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    /// Samples with `x[feature] <= threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        samples: u64,
    },
}

/// Nodes in pre-order; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    /// Sub-sample size each tree was grown on
    pub max_samples: u64,
    pub offset: f64,
    pub trees: Vec<IsolationTree>,
}

/// Average path length of an unsuccessful BST search over `n` points.
pub(crate) fn average_path_length(n: u64) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

impl IsolationTree {
    fn path_length(&self, row: &[f64]) -> Result<f64, ModelError> {
        let mut idx = 0usize;
        let mut depth = 0.0;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes
        for _ in 0..self.nodes.len() {
            let node = self
                .nodes
                .get(idx)
                .ok_or_else(|| ModelError::Backend(format!("tree node {} out of range", idx)))?;
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let x = row.get(*feature).ok_or(ModelError::DimensionMismatch {
                        expected: feature + 1,
                        got: row.len(),
                    })?;
                    idx = if *x <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                TreeNode::Leaf { samples } => return Ok(depth + average_path_length(*samples)),
            }
        }
        Err(ModelError::Backend("tree traversal did not reach a leaf".into()))
    }

    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("empty tree".into());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } = node
            {
                if *feature >= n_features {
                    return Err(format!(
                        "node {} splits on feature {} but schema has {}",
                        i, feature, n_features
                    ));
                }
                if !threshold.is_finite() {
                    return Err(format!("node {} has non-finite threshold", i));
                }
                // Children strictly after the parent keeps traversal finite
                for child in [*left, *right] {
                    if child <= i || child >= self.nodes.len() {
                        return Err(format!("node {} has invalid child {}", i, child));
                    }
                }
            }
        }
        Ok(())
    }
}

impl IsolationForest {
    pub fn validate(&self, artifact: &str, n_features: usize) -> Result<(), ModelError> {
        let invalid = |reason: String| ModelError::InvalidArtifact {
            artifact: artifact.to_string(),
            reason,
        };
        if self.trees.is_empty() {
            return Err(invalid("forest has no trees".into()));
        }
        if self.max_samples < 2 {
            return Err(invalid(format!("max_samples {} < 2", self.max_samples)));
        }
        if !self.offset.is_finite() {
            return Err(invalid("non-finite offset".into()));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(n_features)
                .map_err(|e| invalid(format!("tree {}: {}", t, e)))?;
        }
        Ok(())
    }

    /// Raw score in [-1, 0); lower is more anomalous
    pub fn score_sample(&self, row: &[f64]) -> Result<f64, ModelError> {
        let mut total = 0.0;
        for tree in &self.trees {
            total += tree.path_length(row)?;
        }
        let mean = total / self.trees.len() as f64;
        Ok(-(2f64.powf(-mean / average_path_length(self.max_samples))))
    }
}

impl OutlierDetector for IsolationForest {
    fn kind(&self) -> &'static str {
        "isolation_forest"
    }

    fn validate(&self, artifact: &str, n_features: usize) -> Result<(), ModelError> {
        IsolationForest::validate(self, artifact, n_features)
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<Prediction>, ModelError> {
        rows.par_iter()
            .map(|row| {
                let score = self.score_sample(row)? - self.offset;
                Ok(Prediction {
                    score,
                    is_outlier: score < 0.0,
                })
            })
            .collect()
    }
}
