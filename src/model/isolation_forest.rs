//! Pre-trained isolation forest, evaluated natively.
//!
//! The model is exported from the training pipeline as JSON:
//!
//! ```json
//! {
//!   "max_samples": 256,
//!   "offset": -0.52,
//!   "trees": [
//!     { "nodes": [
//!         { "split": { "feature": 0, "threshold": 5.5, "left": 1, "right": 2 } },
//!         { "leaf": { "samples": 12 } },
//!         { "leaf": { "samples": 244 } }
//!     ] }
//!   ]
//! }
//! ```
//!
//! Scores follow the usual `decision_function` convention: the raw isolation
//! score shifted by the training offset, so negative values are anomalous.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::detection::features::FEATURE_COUNT;
use crate::{ShieldError, ShieldResult};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// One tree node. Children always sit after their parent in `nodes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        samples: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IsolationTree {
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IsolationForest {
    /// Sub-sample size each tree was grown on.
    pub max_samples: usize,

    /// Training offset subtracted from the raw score.
    pub offset: f64,

    pub trees: Vec<IsolationTree>,
}

/// Average path length of an unsuccessful BST search over `n` points.
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

impl IsolationTree {
    /// Depth of the leaf `sample` falls into, plus the expected remaining
    /// depth for the points that leaf still holds.
    ///
    /// A walk that leaves the node table, names an unknown feature, or takes
    /// more steps than there are nodes is a model error.
    fn path_length(&self, sample: &[f64; FEATURE_COUNT]) -> ShieldResult<f64> {
        let mut idx = 0;
        let mut depth = 0.0;
        for _ in 0..=self.nodes.len() {
            let node = self
                .nodes
                .get(idx)
                .ok_or_else(|| invalid(format!("walk reached missing node {}", idx)))?;
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = sample.get(*feature).ok_or_else(|| {
                        invalid(format!("node {} splits on unknown feature {}", idx, feature))
                    })?;
                    idx = if *value <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                TreeNode::Leaf { samples } => return Ok(depth + average_path_length(*samples)),
            }
        }
        Err(invalid("walk did not reach a leaf".to_string()))
    }

    fn validate(&self, tree_idx: usize) -> ShieldResult<()> {
        if self.nodes.is_empty() {
            return Err(invalid(format!("tree {} has no nodes", tree_idx)));
        }
        let len = self.nodes.len();
        for (idx, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } = node
            {
                if *feature >= FEATURE_COUNT {
                    return Err(invalid(format!(
                        "tree {} node {} splits on feature {} (model has {})",
                        tree_idx, idx, feature, FEATURE_COUNT
                    )));
                }
                if !threshold.is_finite() {
                    return Err(invalid(format!(
                        "tree {} node {} has a non-finite threshold",
                        tree_idx, idx
                    )));
                }
                // Forward-only children rule out cycles.
                for child in [*left, *right] {
                    if child <= idx || child >= len {
                        return Err(invalid(format!(
                            "tree {} node {} has out-of-order child {}",
                            tree_idx, idx, child
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl IsolationForest {
    /// Load and validate a model file.
    pub fn load(path: &Path) -> ShieldResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ShieldError::ModelUnavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> ShieldResult<Self> {
        let model: IsolationForest = serde_json::from_str(json)
            .map_err(|e| invalid(format!("malformed model file: {}", e)))?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> ShieldResult<()> {
        if self.trees.is_empty() {
            return Err(invalid("model has no trees".to_string()));
        }
        if self.max_samples < 2 {
            return Err(invalid(format!(
                "max_samples must be at least 2, got {}",
                self.max_samples
            )));
        }
        if !self.offset.is_finite() {
            return Err(invalid("offset is not finite".to_string()));
        }
        for (idx, tree) in self.trees.iter().enumerate() {
            tree.validate(idx)?;
        }
        Ok(())
    }

    /// Raw isolation score in [-1, 0); closer to -1 is more isolated.
    pub fn score_samples(&self, sample: &[f64; FEATURE_COUNT]) -> ShieldResult<f64> {
        if self.trees.is_empty() {
            return Err(invalid("model has no trees".to_string()));
        }
        let mut total = 0.0;
        for tree in &self.trees {
            total += tree.path_length(sample)?;
        }
        let mean = total / self.trees.len() as f64;
        Ok(-(2f64.powf(-mean / average_path_length(self.max_samples))))
    }

    /// Offset-shifted score; negative means anomalous.
    pub fn decision_function(&self, sample: &[f64; FEATURE_COUNT]) -> ShieldResult<f64> {
        Ok(self.score_samples(sample)? - self.offset)
    }

    pub fn node_count(&self) -> usize {
        self.trees.iter().map(|t| t.nodes.len()).sum()
    }
}

fn invalid(msg: String) -> ShieldError {
    ShieldError::ModelUnavailable(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One tree isolating `hour > 22` after a single split; the rest of the
    /// points share a deep leaf.
    fn night_forest() -> IsolationForest {
        IsolationForest {
            max_samples: 256,
            offset: -0.5,
            trees: vec![IsolationTree {
                nodes: vec![
                    TreeNode::Split {
                        feature: 0,
                        threshold: 22.5,
                        left: 1,
                        right: 2,
                    },
                    TreeNode::Leaf { samples: 250 },
                    TreeNode::Leaf { samples: 1 },
                ],
            }],
        }
    }

    #[test]
    fn test_average_path_length_small_cases() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.2448).abs() < 1e-3, "c(256) = {}", c256);
    }

    #[test]
    fn test_isolated_point_is_negative() {
        let forest = night_forest();
        let outlier = forest.decision_function(&[23.0, 1.0, 1.0, 0.0, 0.0]).unwrap();
        assert!(outlier < 0.0, "outlier scored {}", outlier);
    }

    #[test]
    fn test_dense_point_is_positive() {
        let forest = night_forest();
        let inlier = forest.decision_function(&[14.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(inlier > 0.0, "inlier scored {}", inlier);
    }

    #[test]
    fn test_scores_are_deterministic() {
        let forest = night_forest();
        let x = [3.0, 1.0, 0.0, 1.0, 2.0];
        assert_eq!(
            forest.decision_function(&x).unwrap(),
            forest.decision_function(&x).unwrap()
        );
    }

    #[test]
    fn test_json_roundtrip_format() {
        let json = r#"{
            "max_samples": 8,
            "offset": -0.5,
            "trees": [ { "nodes": [
                { "split": { "feature": 2, "threshold": 0.5, "left": 1, "right": 2 } },
                { "leaf": { "samples": 7 } },
                { "leaf": { "samples": 1 } }
            ] } ]
        }"#;
        let forest = IsolationForest::from_json(json).unwrap();
        assert_eq!(forest.node_count(), 3);
    }

    #[test]
    fn test_rejects_unknown_feature() {
        let mut forest = night_forest();
        forest.trees[0].nodes[0] = TreeNode::Split {
            feature: 9,
            threshold: 1.0,
            left: 1,
            right: 2,
        };
        assert!(matches!(forest.validate(), Err(ShieldError::ModelUnavailable(_))));
    }

    #[test]
    fn test_rejects_cycles() {
        let mut forest = night_forest();
        forest.trees[0].nodes[0] = TreeNode::Split {
            feature: 0,
            threshold: 1.0,
            left: 0,
            right: 2,
        };
        assert!(forest.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_forest() {
        let forest = IsolationForest {
            max_samples: 256,
            offset: -0.5,
            trees: vec![],
        };
        assert!(forest.validate().is_err());
    }

    #[test]
    fn test_unvalidated_bad_child_is_error_not_panic() {
        let forest = IsolationForest {
            max_samples: 256,
            offset: -0.5,
            trees: vec![IsolationTree {
                nodes: vec![TreeNode::Split {
                    feature: 0,
                    threshold: 1.0,
                    left: 7,
                    right: 8,
                }],
            }],
        };
        assert!(matches!(
            forest.decision_function(&[3.0, 1.0, 1.0, 0.0, 0.0]),
            Err(ShieldError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_unvalidated_cycle_terminates() {
        let mut forest = night_forest();
        forest.trees[0].nodes[0] = TreeNode::Split {
            feature: 0,
            threshold: 99.0,
            left: 0,
            right: 0,
        };
        assert!(forest.decision_function(&[3.0, 0.0, 0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_unvalidated_unknown_feature_is_error() {
        let mut forest = night_forest();
        forest.trees[0].nodes[0] = TreeNode::Split {
            feature: 42,
            threshold: 1.0,
            left: 1,
            right: 2,
        };
        assert!(matches!(
            forest.decision_function(&[3.0, 0.0, 0.0, 0.0, 0.0]),
            Err(ShieldError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_malformed_json_is_model_error() {
        assert!(matches!(
            IsolationForest::from_json("{ not json"),
            Err(ShieldError::ModelUnavailable(_))
        ));
    }
}
