//! # Anomaly Scorer
//!
//! The boundary to the pre-trained, unsupervised anomaly model. The rest of
//! the pipeline only sees `AnomalyScorer::score`: feature vector in, real
//! number out, negative meaning anomalous.
//!
//! `ModelHandle` owns an optionally-loaded model. An empty handle fails every
//! call with `ModelUnavailable`; it never hands back a neutral score, because
//! a zero here would silently read as "not anomalous" downstream.

pub mod isolation_forest;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::detection::features::FeatureVector;
use crate::{ModelConfig, ShieldError, ShieldResult};
pub use isolation_forest::IsolationForest;

/// Scores one feature vector. Deterministic and stateless per call.
pub trait AnomalyScorer: Send + Sync {
    fn score(&self, features: &FeatureVector) -> ShieldResult<f64>;
}

impl AnomalyScorer for IsolationForest {
    fn score(&self, features: &FeatureVector) -> ShieldResult<f64> {
        self.decision_function(&features.as_array())
    }
}

/// Shape of the loaded model, for status output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub path: Option<PathBuf>,
    pub trees: usize,
    pub nodes: usize,
    pub max_samples: usize,
    pub offset: f64,
    pub inference_count: u64,
}

/// Swappable slot holding the current model, if any.
pub struct ModelHandle {
    path: Option<PathBuf>,
    model: RwLock<Option<Arc<IsolationForest>>>,
    inference_count: AtomicU64,
}

impl ModelHandle {
    /// A handle with no model; every score call fails.
    pub fn unloaded() -> Self {
        Self {
            path: None,
            model: RwLock::new(None),
            inference_count: AtomicU64::new(0),
        }
    }

    /// Wrap an already-built model. The model is validated first.
    pub fn with_model(model: IsolationForest) -> ShieldResult<Self> {
        model.validate()?;
        Ok(Self {
            path: None,
            model: RwLock::new(Some(Arc::new(model))),
            inference_count: AtomicU64::new(0),
        })
    }

    /// Load a model file; any read or validation problem is an error.
    pub fn load(path: &Path) -> ShieldResult<Self> {
        let model = IsolationForest::load(path)?;
        log::info!(
            "[MODEL] Loaded isolation forest from {} ({} trees)",
            path.display(),
            model.trees.len()
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            model: RwLock::new(Some(Arc::new(model))),
            inference_count: AtomicU64::new(0),
        })
    }

    /// Load the configured model. A missing file leaves the handle empty
    /// (evaluations will fail until a model is installed); a present but
    /// broken file is an error.
    pub fn from_config(config: &ModelConfig) -> ShieldResult<Self> {
        if config.path.exists() {
            return Self::load(&config.path);
        }
        log::warn!(
            "[MODEL] Model not found at {}; evaluations will fail until one is loaded",
            config.path.display()
        );
        Ok(Self {
            path: Some(config.path.clone()),
            ..Self::unloaded()
        })
    }

    /// Re-read the model from its configured path and swap it in.
    pub fn reload(&self) -> ShieldResult<()> {
        let path = self.path.as_deref().ok_or_else(|| {
            ShieldError::ModelUnavailable("handle has no model path to reload from".to_string())
        })?;
        let model = IsolationForest::load(path)?;
        *self.model.write() = Some(Arc::new(model));
        log::info!("[MODEL] Reloaded model from {}", path.display());
        Ok(())
    }

    /// Install a model directly. A model that fails validation is refused
    /// and the current one stays in place.
    pub fn install(&self, model: IsolationForest) -> ShieldResult<()> {
        model.validate()?;
        let trees = model.trees.len();
        *self.model.write() = Some(Arc::new(model));
        log::info!("[MODEL] Installed isolation forest ({} trees)", trees);
        Ok(())
    }

    pub fn unload(&self) {
        *self.model.write() = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.model.read().is_some()
    }

    pub fn info(&self) -> Option<ModelInfo> {
        let guard = self.model.read();
        let model = guard.as_ref()?;
        Some(ModelInfo {
            path: self.path.clone(),
            trees: model.trees.len(),
            nodes: model.node_count(),
            max_samples: model.max_samples,
            offset: model.offset,
            inference_count: self.inference_count.load(Ordering::Relaxed),
        })
    }
}

impl AnomalyScorer for ModelHandle {
    fn score(&self, features: &FeatureVector) -> ShieldResult<f64> {
        let model = self
            .model
            .read()
            .clone()
            .ok_or_else(|| ShieldError::ModelUnavailable("no anomaly model loaded".to_string()))?;
        let score = model.score(features)?;
        self.inference_count.fetch_add(1, Ordering::Relaxed);
        Ok(score)
    }
}
