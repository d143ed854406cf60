//! Training-pipeline tooling for volumetric medical image segmentation.
//!
//! The crate covers the data side of a segmentation training run:
//! - cross-validation dataset splitting ([`split`])
//! - lazily loaded NIfTI image/label pairs behind a bounded load queue
//!   ([`image`])
//! - batch sequences sampling planes or boxes from loaded volumes
//!   ([`sequences`])
//! - layout-preserving YAML hyperparameter files ([`hparams`])
//! - a callback-driven trainer with out-of-memory recovery ([`train`])
//!
//! The neural network itself stays behind the [`train::ModelBackend`] trait:
//! this crate discovers and loads the data, builds batches, and orchestrates
//! the run, while gradient computation belongs to the backend.

pub mod cli;
pub mod hparams;
pub mod image;
pub mod sequences;
pub mod split;
pub mod train;

pub use hparams::YamlHParams;
pub use image::{ImagePair, ImagePairLoader, ImageQueue};
pub use train::Trainer;
