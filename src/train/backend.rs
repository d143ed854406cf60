//! Backend seam between the training loop and an actual model.
//!
//! The trainer owns batching, callbacks, out-of-memory recovery and
//! checkpoint plumbing; everything touching model weights goes through
//! [`ModelBackend`]. A backend signals memory pressure with
//! [`BackendError::ResourceExhausted`], which the trainer answers by
//! shrinking the batch size and restarting the fit loop.

use crate::sequences::Batch;
use log::info;
use serde_yaml::Mapping;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend ran out of device or host memory. Recoverable: the
    /// trainer retries with a smaller batch size.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An optimizer, loss or metric name the backend does not implement
    #[error("unsupported by backend: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure
    #[error("backend error: {0}")]
    Other(String),
}

/// What a model is compiled with before fitting starts.
///
/// Mirrors the `fit` hyperparameter group; build one with
/// [`From<&FitParams>`](crate::hparams::FitParams) or by hand in tests.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    /// Optimizer name, e.g. `Adam`
    pub optimizer: String,
    /// Optimizer keyword arguments, passed through untouched
    pub optimizer_kwargs: Mapping,
    /// Loss function name
    pub loss: String,
    /// Metric names evaluated on validation batches
    pub metrics: Vec<String>,
    /// Whether targets are integer class maps rather than one-hot
    pub sparse: bool,
}

impl CompileOptions {
    #[must_use]
    pub fn new(optimizer: impl Into<String>, loss: impl Into<String>) -> Self {
        Self {
            optimizer: optimizer.into(),
            optimizer_kwargs: Mapping::new(),
            loss: loss.into(),
            metrics: Vec::new(),
            sparse: false,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Vec<String>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    /// With integer targets, metrics need their sparse variants: any metric
    /// name lacking the `sparse_` prefix is rewritten (and the rename logged)
    #[must_use]
    pub fn with_sparse_metrics(mut self) -> Self {
        if self.sparse {
            for metric in &mut self.metrics {
                if !metric.starts_with("sparse_") {
                    let renamed = format!("sparse_{metric}");
                    info!("Note: changing {metric} --> {renamed} (sparse=true passed)");
                    *metric = renamed;
                }
            }
        }
        self
    }
}

impl From<&crate::hparams::FitParams> for CompileOptions {
    fn from(fit: &crate::hparams::FitParams) -> Self {
        Self {
            optimizer: fit.optimizer.clone(),
            optimizer_kwargs: fit.optimizer_kwargs.clone(),
            loss: fit.loss.clone(),
            metrics: fit.metrics.clone(),
            sparse: fit.sparse,
        }
    }
}

/// Everything the trainer asks of a model.
///
/// Implementations wrap whatever actually computes gradients; the data
/// pipeline and trainer stay agnostic of it.
pub trait ModelBackend: Send {
    /// Bind optimizer, loss and metrics before fitting
    fn compile(&mut self, options: &CompileOptions) -> Result<(), BackendError>;

    /// Run one gradient step and return the batch loss
    fn train_on_batch(&mut self, batch: &Batch) -> Result<f32, BackendError>;

    /// Evaluate one batch and return named metric values, `loss` included
    fn evaluate_on_batch(&mut self, batch: &Batch) -> Result<Vec<(String, f32)>, BackendError>;

    /// Current learning rate
    fn lr(&self) -> f32;

    /// Replace the learning rate
    fn set_lr(&mut self, lr: f32);

    /// Persist the model weights to `path`. The parent directory may not
    /// exist yet; implementations create it as needed.
    fn save_weights(&mut self, path: &Path) -> Result<(), BackendError>;
}
