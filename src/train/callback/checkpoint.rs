//! Checkpoint callback requesting weight saves at epoch end.

use super::traits::{CallbackAction, CallbackContext, Monitor, TrainerCallback};
use crate::train::services::TrainerServices;
use log::debug;
use std::path::PathBuf;

/// Requests a weight save through the trainer's service channel whenever the
/// monitored loss improves (or after every epoch with `save_best_only` off).
/// The trainer forwards the request to the backend after the epoch-end
/// callbacks have fired.
#[derive(Clone, Debug, Default)]
pub struct ModelCheckpoint {
    dir: PathBuf,
    save_best_only: bool,
    monitor: Monitor,
    best: Option<f32>,
    services: Option<TrainerServices>,
}

impl ModelCheckpoint {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            save_best_only: true,
            monitor: Monitor::default(),
            best: None,
            services: None,
        }
    }

    #[must_use]
    pub fn save_best_only(mut self, only: bool) -> Self {
        self.save_best_only = only;
        self
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = monitor;
        self
    }

    /// Weight file for a given epoch
    #[must_use]
    pub fn epoch_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("checkpoint_epoch_{epoch}.bin"))
    }

    /// Weight file holding the best model so far
    #[must_use]
    pub fn best_path(&self) -> PathBuf {
        self.dir.join("checkpoint_best.bin")
    }
}

impl TrainerCallback for ModelCheckpoint {
    fn bind(&mut self, services: &TrainerServices) {
        self.services = Some(services.clone());
    }

    fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        let Some(services) = &self.services else {
            return CallbackAction::Continue;
        };
        let loss = ctx.monitored(self.monitor);
        if self.best.is_none_or(|best| loss < best) {
            self.best = Some(loss);
            debug!(
                "checkpoint: epoch {} improved monitored loss to {loss:.4}",
                ctx.epoch
            );
            services.request_checkpoint(self.best_path(), true);
        }
        if !self.save_best_only {
            services.request_checkpoint(self.epoch_path(ctx.epoch), false);
        }
        CallbackAction::Continue
    }

    fn name(&self) -> &'static str {
        "ModelCheckpoint"
    }
}
