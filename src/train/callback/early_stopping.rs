//! Early stopping callback to halt training when the monitored loss plateaus.

use super::traits::{CallbackAction, CallbackContext, Monitor, TrainerCallback};
use log::info;

/// Stops training after `patience` epochs without improvement of the
/// monitored loss by at least `min_delta`.
#[derive(Clone, Debug)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f32,
    monitor: Monitor,
    best: f32,
    pub(crate) epochs_without_improvement: usize,
}

impl EarlyStopping {
    #[must_use]
    pub fn new(patience: usize, min_delta: f32, monitor: Monitor) -> Self {
        Self {
            patience,
            min_delta,
            monitor,
            best: f32::INFINITY,
            epochs_without_improvement: 0,
        }
    }

    /// Reset the improvement tracking
    pub fn reset(&mut self) {
        self.best = f32::INFINITY;
        self.epochs_without_improvement = 0;
    }

    fn check_improvement(&mut self, loss: f32) -> bool {
        if loss < self.best - self.min_delta {
            self.best = loss;
            self.epochs_without_improvement = 0;
            true
        } else {
            self.epochs_without_improvement += 1;
            false
        }
    }
}

impl TrainerCallback for EarlyStopping {
    fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        self.check_improvement(ctx.monitored(self.monitor));
        if self.epochs_without_improvement >= self.patience {
            info!(
                "early stopping: no improvement for {} epoch(s) (best: {:.4})",
                self.patience, self.best
            );
            CallbackAction::Stop
        } else {
            CallbackAction::Continue
        }
    }

    fn name(&self) -> &'static str {
        "EarlyStopping"
    }
}
