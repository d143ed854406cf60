//! Callback-driven training loop over sampled image batches
//!
//! This module provides the training half of the pipeline:
//! - A [`ModelBackend`] seam hiding the actual model implementation
//! - The [`Trainer`] with epochs, validation and out-of-memory recovery
//! - Callbacks (early stopping, checkpoints, learning-rate plateaus,
//!   CSV logs) resolved from hyperparameter descriptors
//! - [`TrainerServices`], the request channel callbacks reach the
//!   backend through
//!
//! # Example
//!
//! ```no_run
//! use segmentar::train::callback::{resolve_callbacks, CallbackRegistry};
//! use segmentar::train::{CompileOptions, Trainer};
//! # fn backend() -> Box<dyn segmentar::train::ModelBackend> { unimplemented!() }
//! # let specs = vec![];
//!
//! let callbacks = resolve_callbacks(
//!     &specs,
//!     &CallbackRegistry::builtin(),
//!     &CallbackRegistry::custom(),
//! )?;
//! let mut trainer = Trainer::new(backend());
//! trainer.compile(CompileOptions::new("Adam", "sparse_categorical_crossentropy"))?;
//! // trainer.fit(&mut train_seq, Some(&mut val_seq), callbacks, config, &mut hparams)?;
//! # let _ = callbacks;
//! # Ok::<(), segmentar::train::TrainError>(())
//! ```

mod backend;
pub mod callback;
mod error;
mod services;
mod trainer;

pub use backend::{BackendError, CompileOptions, ModelBackend};
pub use callback::{
    resolve_callbacks, CallbackError, CallbackManager, CallbackRegistry, CallbackSpec,
};
pub use error::{Result, TrainError};
pub use services::{CheckpointRequest, TrainerServices};
pub use trainer::{FitConfig, FitSummary, Trainer};
