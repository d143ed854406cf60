//! Core types of the callback system: the context passed to callbacks, the
//! action they answer with, and the [`TrainerCallback`] trait itself.

use crate::train::services::TrainerServices;

/// Training state passed to every callback event
#[derive(Clone, Debug)]
pub struct CallbackContext {
    /// Current epoch (0-indexed)
    pub epoch: usize,
    /// Total epochs planned
    pub max_epochs: usize,
    /// Current step within the epoch
    pub step: usize,
    /// Steps per epoch
    pub steps_per_epoch: usize,
    /// Steps since training started
    pub global_step: usize,
    /// Mean training loss of the epoch so far
    pub loss: f32,
    /// Current learning rate
    pub lr: f32,
    /// Best monitored loss seen so far
    pub best_loss: Option<f32>,
    /// Validation loss of the current epoch, when validation ran
    pub val_loss: Option<f32>,
    /// Named validation metrics of the current epoch (`val_` prefixed)
    pub metrics: Vec<(String, f32)>,
    /// Seconds since training started
    pub elapsed_secs: f64,
}

impl Default for CallbackContext {
    fn default() -> Self {
        Self {
            epoch: 0,
            max_epochs: 0,
            step: 0,
            steps_per_epoch: 0,
            global_step: 0,
            loss: 0.0,
            lr: 0.0,
            best_loss: None,
            val_loss: None,
            metrics: Vec::new(),
            elapsed_secs: 0.0,
        }
    }
}

impl CallbackContext {
    /// The loss a monitor policy resolves to: validation loss when
    /// available, training loss otherwise
    #[must_use]
    pub fn monitored(&self, monitor: Monitor) -> f32 {
        match monitor {
            Monitor::TrainLoss => self.loss,
            Monitor::ValLoss => self.val_loss.unwrap_or(self.loss),
        }
    }
}

/// Which loss a callback watches for improvement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Monitor {
    TrainLoss,
    #[default]
    ValLoss,
}

impl std::str::FromStr for Monitor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loss" => Ok(Monitor::TrainLoss),
            "val_loss" => Ok(Monitor::ValLoss),
            other => Err(format!(
                "unknown monitor '{other}' (expected 'loss' or 'val_loss')"
            )),
        }
    }
}

/// Action a callback answers an event with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    /// Continue training normally
    Continue,
    /// Stop training (early stopping)
    Stop,
}

/// Trait for training callbacks.
///
/// All methods have default no-op implementations, so a callback only
/// implements the events it cares about.
pub trait TrainerCallback: Send {
    /// Receive the trainer's service channels before training starts.
    /// Callbacks that adjust the learning rate or request checkpoints keep
    /// a clone of the handle here.
    fn bind(&mut self, _services: &TrainerServices) {}

    /// Called once before training starts
    fn on_train_begin(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called once after training ends
    fn on_train_end(&mut self, _ctx: &CallbackContext) {}

    /// Called before each epoch
    fn on_epoch_begin(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called after each epoch, with validation results in the context
    fn on_epoch_end(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called before each training step
    fn on_step_begin(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called after each training step
    fn on_step_end(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Callback name for logging
    fn name(&self) -> &'static str {
        "TrainerCallback"
    }
}

impl std::fmt::Debug for dyn TrainerCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.name()).finish_non_exhaustive()
    }
}
