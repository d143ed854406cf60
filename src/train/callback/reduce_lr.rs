//! Learning rate reduction on monitored-loss plateaus.

use super::traits::{CallbackAction, CallbackContext, Monitor, TrainerCallback};
use crate::train::services::TrainerServices;
use log::info;

/// Requests a lower learning rate through the trainer's service channel when
/// the monitored loss has not improved for `patience` epochs. The new rate is
/// `lr * factor`, clamped to `min_lr`.
#[derive(Clone, Debug)]
pub struct ReduceLROnPlateau {
    factor: f32,
    patience: usize,
    min_lr: f32,
    monitor: Monitor,
    best: f32,
    epochs_without_improvement: usize,
    services: Option<TrainerServices>,
}

impl ReduceLROnPlateau {
    #[must_use]
    pub fn new(factor: f32, patience: usize) -> Self {
        Self {
            factor,
            patience,
            min_lr: 0.0,
            monitor: Monitor::default(),
            best: f32::INFINITY,
            epochs_without_improvement: 0,
            services: None,
        }
    }

    #[must_use]
    pub fn with_min_lr(mut self, min_lr: f32) -> Self {
        self.min_lr = min_lr;
        self
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = monitor;
        self
    }
}

impl TrainerCallback for ReduceLROnPlateau {
    fn bind(&mut self, services: &TrainerServices) {
        self.services = Some(services.clone());
    }

    fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        let Some(services) = &self.services else {
            return CallbackAction::Continue;
        };
        let loss = ctx.monitored(self.monitor);
        if loss < self.best {
            self.best = loss;
            self.epochs_without_improvement = 0;
            return CallbackAction::Continue;
        }

        self.epochs_without_improvement += 1;
        if self.epochs_without_improvement >= self.patience {
            let new_lr = (ctx.lr * self.factor).max(self.min_lr);
            if new_lr < ctx.lr {
                info!(
                    "Plateau for {} epochs, reducing learning rate to {:e}",
                    self.epochs_without_improvement, new_lr
                );
                services.request_lr(new_lr);
            }
            self.epochs_without_improvement = 0;
        }
        CallbackAction::Continue
    }

    fn name(&self) -> &'static str {
        "ReduceLROnPlateau"
    }
}
