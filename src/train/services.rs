//! Channels callbacks use to ask the trainer for backend-side actions.
//!
//! Callbacks run while the trainer holds the backend, so they cannot touch
//! it directly. Instead they deposit requests here; the trainer drains them
//! after the epoch-end callbacks have fired and applies them through the
//! backend.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// A request to persist the model weights
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRequest {
    pub path: PathBuf,
    /// Whether the request marks a new best monitored loss
    pub is_best: bool,
}

#[derive(Default)]
struct ServiceState {
    pending_lr: Mutex<Option<f32>>,
    checkpoints: Mutex<Vec<CheckpointRequest>>,
}

/// Cloneable handle to the trainer's request channels
#[derive(Clone, Default)]
pub struct TrainerServices {
    state: Arc<ServiceState>,
}

impl TrainerServices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a new learning rate; a later request overrides an earlier one
    pub fn request_lr(&self, lr: f32) {
        *self
            .state
            .pending_lr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(lr);
    }

    /// Take the pending learning rate request, if any
    pub fn take_lr(&self) -> Option<f32> {
        self.state
            .pending_lr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Ask for the weights to be saved to `path`
    pub fn request_checkpoint(&self, path: impl Into<PathBuf>, is_best: bool) {
        self.state
            .checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CheckpointRequest {
                path: path.into(),
                is_best,
            });
    }

    /// Drain all pending checkpoint requests, in request order
    pub fn take_checkpoints(&self) -> Vec<CheckpointRequest> {
        std::mem::take(
            &mut self
                .state
                .checkpoints
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl std::fmt::Debug for TrainerServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainerServices").finish_non_exhaustive()
    }
}
