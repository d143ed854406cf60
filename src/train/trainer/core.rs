//! Core Trainer struct and basic methods

use crate::train::backend::{CompileOptions, ModelBackend};
use crate::train::callback::CallbackContext;
use crate::train::error::Result;
use crate::train::services::TrainerServices;
use log::info;
use std::time::Instant;

/// High-level trainer that drives a [`ModelBackend`] through batches drawn
/// from a [`BatchSequence`](crate::sequences::BatchSequence).
///
/// The trainer owns the loop mechanics: steps and epochs, validation,
/// callback dispatch, requests deposited by callbacks (learning rate
/// changes, checkpoints) and recovery from backend out-of-memory failures.
///
/// # Example
///
/// ```no_run
/// use segmentar::train::{CompileOptions, Trainer};
/// # fn backend() -> Box<dyn segmentar::train::ModelBackend> { unimplemented!() }
///
/// let mut trainer = Trainer::new(backend());
/// trainer.compile(CompileOptions::new("Adam", "sparse_categorical_crossentropy"))?;
/// // let summary = trainer.fit(&mut train_seq, None, callbacks, config, &mut hparams)?;
/// # Ok::<(), segmentar::train::TrainError>(())
/// ```
pub struct Trainer {
    /// The model being trained
    pub(crate) backend: Box<dyn ModelBackend>,

    /// Request channels handed to callbacks through `bind`
    pub(crate) services: TrainerServices,

    /// Best monitored loss achieved during training
    pub(crate) best_loss: Option<f32>,

    /// Training start time
    pub(crate) start_time: Option<Instant>,

    /// Steps since training started
    pub(crate) global_step: usize,
}

impl Trainer {
    /// Create a trainer around a backend
    pub fn new(backend: Box<dyn ModelBackend>) -> Self {
        Self {
            backend,
            services: TrainerServices::new(),
            best_loss: None,
            start_time: None,
            global_step: 0,
        }
    }

    /// Bind optimizer, loss and metrics on the backend. With sparse targets
    /// every metric is rewritten to its `sparse_` variant first.
    pub fn compile(&mut self, options: CompileOptions) -> Result<()> {
        let options = options.with_sparse_metrics();
        self.backend.compile(&options)?;
        info!("Optimizer:   {}", options.optimizer);
        info!("Loss:        {}", options.loss);
        info!(
            "Targets:     {}",
            if options.sparse { "Integer" } else { "One-Hot" }
        );
        info!("Metrics:     {}", options.metrics.join(", "));
        Ok(())
    }

    /// Get current learning rate
    pub fn lr(&self) -> f32 {
        self.backend.lr()
    }

    /// Set learning rate
    pub fn set_lr(&mut self, lr: f32) {
        self.backend.set_lr(lr);
    }

    /// The request channels callbacks deposit into
    pub fn services(&self) -> &TrainerServices {
        &self.services
    }

    /// Keep the lowest monitored loss seen so far
    pub(crate) fn update_best_loss(&mut self, loss: f32) {
        if self.best_loss.is_none_or(|best| loss < best) {
            self.best_loss = Some(loss);
        }
    }

    /// Build callback context from current state
    pub(crate) fn build_context(
        &self,
        epoch: usize,
        max_epochs: usize,
        step: usize,
        steps_per_epoch: usize,
        loss: f32,
        val_loss: Option<f32>,
        metrics: Vec<(String, f32)>,
    ) -> CallbackContext {
        CallbackContext {
            epoch,
            max_epochs,
            step,
            steps_per_epoch,
            global_step: self.global_step,
            loss,
            lr: self.lr(),
            best_loss: self.best_loss,
            val_loss,
            metrics,
            elapsed_secs: self.start_time.map_or(0.0, |t| t.elapsed().as_secs_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::test_support::MockBackend;

    #[test]
    fn test_trainer_creation() {
        let trainer = Trainer::new(Box::new(MockBackend::new(0.001)));
        assert_eq!(trainer.lr(), 0.001);
        assert_eq!(trainer.global_step, 0);
        assert!(trainer.best_loss.is_none());
    }

    #[test]
    fn test_set_lr() {
        let mut trainer = Trainer::new(Box::new(MockBackend::new(0.001)));
        trainer.set_lr(0.01);
        assert_eq!(trainer.lr(), 0.01);
    }

    #[test]
    fn test_compile_rewrites_sparse_metrics() {
        let backend = MockBackend::new(0.001);
        let recording = backend.recording();
        let mut trainer = Trainer::new(Box::new(backend));
        trainer
            .compile(
                CompileOptions::new("Adam", "categorical_crossentropy")
                    .with_metrics(vec!["categorical_accuracy".to_string()])
                    .with_sparse(true),
            )
            .unwrap();

        let compiled = recording.lock().unwrap().compiled.clone().unwrap();
        assert_eq!(compiled.metrics, vec!["sparse_categorical_accuracy"]);
    }

    #[test]
    fn test_update_best_loss() {
        let mut trainer = Trainer::new(Box::new(MockBackend::new(0.001)));
        trainer.update_best_loss(0.5);
        trainer.update_best_loss(0.8);
        assert_eq!(trainer.best_loss, Some(0.5));
        trainer.update_best_loss(0.1);
        assert_eq!(trainer.best_loss, Some(0.1));
    }

    #[test]
    fn test_build_context_snapshot() {
        let mut trainer = Trainer::new(Box::new(MockBackend::new(0.05)));
        trainer.global_step = 7;
        trainer.best_loss = Some(0.3);
        let ctx = trainer.build_context(2, 10, 1, 4, 0.4, Some(0.35), vec![]);
        assert_eq!(ctx.epoch, 2);
        assert_eq!(ctx.global_step, 7);
        assert_eq!(ctx.lr, 0.05);
        assert_eq!(ctx.best_loss, Some(0.3));
        assert_eq!(ctx.val_loss, Some(0.35));
    }
}
