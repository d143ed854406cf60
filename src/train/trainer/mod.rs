//! Trainer abstraction for training loops
//!
//! The `Trainer` pairs a [`ModelBackend`](crate::train::ModelBackend) with
//! batch sequences and drives the whole run:
//! - compile (optimizer, loss, metrics)
//! - epochs of training steps with callback dispatch
//! - in-epoch validation
//! - learning-rate and checkpoint requests from callbacks
//! - out-of-memory recovery by batch-size reduction

mod core;
mod fit;
mod result;

pub use core::Trainer;
pub use fit::FitConfig;
pub use result::FitSummary;
