//! The fit loop: epochs over sampled batches, in-epoch validation, callback
//! dispatch and out-of-memory recovery.

use crate::hparams::YamlHParams;
use crate::sequences::BatchSequence;
use crate::train::backend::BackendError;
use crate::train::callback::{CallbackAction, CallbackManager};
use crate::train::error::{Result, TrainError};
use crate::train::trainer::core::Trainer;
use crate::train::trainer::result::FitSummary;
use log::{debug, info, warn};
use serde_yaml::Value;
use std::time::Instant;

/// Epoch budget and batch sizing of one fit run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitConfig {
    /// Total epochs to run
    pub n_epochs: usize,
    /// First epoch index, non-zero when resuming
    pub init_epoch: usize,
    /// Samples per gradient step
    pub batch_size: usize,
}

impl FitConfig {
    #[must_use]
    pub fn new(n_epochs: usize, batch_size: usize) -> Self {
        Self {
            n_epochs,
            init_epoch: 0,
            batch_size,
        }
    }
}

impl From<&crate::hparams::FitParams> for FitConfig {
    fn from(fit: &crate::hparams::FitParams) -> Self {
        Self {
            n_epochs: fit.n_epochs,
            init_epoch: fit.init_epoch,
            batch_size: fit.batch_size,
        }
    }
}

/// Result of running the inner step loop for one epoch
struct EpochStepResult {
    total_loss: f32,
    num_steps: usize,
    stopped_early: bool,
}

/// Result of one uninterrupted pass over the epoch budget
struct EpochsOutcome {
    epochs_run: usize,
    final_loss: f32,
    stopped_early: bool,
}

impl Trainer {
    /// Train on batches from `train`, validating on `val` when given.
    ///
    /// Validation runs inside each epoch, before the epoch-end callbacks
    /// fire, so early stopping and checkpointing see the epoch's validation
    /// results. Requests callbacks deposit through their service channel
    /// (learning rate changes, checkpoints) are applied right after the
    /// epoch-end callbacks.
    ///
    /// When the backend reports [`BackendError::ResourceExhausted`], the
    /// batch size shrinks by 2, the new value is written back into the `fit`
    /// hyperparameter group, and the loop restarts from `init_epoch`; a
    /// batch size of zero is a hard error. Queues feeding either sequence
    /// are stopped when fitting ends, whatever the outcome.
    pub fn fit(
        &mut self,
        train: &mut dyn BatchSequence,
        mut val: Option<&mut dyn BatchSequence>,
        mut callbacks: CallbackManager,
        config: FitConfig,
        hparams: &mut YamlHParams,
    ) -> Result<FitSummary> {
        self.start_time = Some(Instant::now());
        self.best_loss = None;
        self.global_step = 0;
        callbacks.bind_all(&self.services);

        let outcome =
            self.fit_with_retries(train, val.as_deref_mut(), &mut callbacks, &config, hparams);

        train.stop_queue();
        if let Some(val) = val.as_deref() {
            val.stop_queue();
        }
        info!("Training stopped.");
        outcome
    }

    /// Run the epoch loop, restarting with a smaller batch size after every
    /// out-of-memory failure
    fn fit_with_retries(
        &mut self,
        train: &mut dyn BatchSequence,
        mut val: Option<&mut (dyn BatchSequence + '_)>,
        callbacks: &mut CallbackManager,
        config: &FitConfig,
        hparams: &mut YamlHParams,
    ) -> Result<FitSummary> {
        let mut batch_size = config.batch_size;
        let mut oom_events = 0u32;

        let ctx =
            self.build_context(config.init_epoch, config.n_epochs, 0, 0, 0.0, None, Vec::new());
        if callbacks.on_train_begin(&ctx) == CallbackAction::Stop {
            return Ok(self.summarize(0, 0.0, true, oom_events, batch_size));
        }

        loop {
            match self.run_epochs(train, val.as_deref_mut(), callbacks, batch_size, config) {
                Ok(outcome) => {
                    let ctx = self.build_context(
                        config.init_epoch + outcome.epochs_run,
                        config.n_epochs,
                        0,
                        0,
                        outcome.final_loss,
                        None,
                        Vec::new(),
                    );
                    callbacks.on_train_end(&ctx);
                    return Ok(self.summarize(
                        outcome.epochs_run,
                        outcome.final_loss,
                        outcome.stopped_early,
                        oom_events,
                        batch_size,
                    ));
                }
                Err(TrainError::Backend(BackendError::ResourceExhausted(_))) => {
                    oom_events += 1;
                    batch_size = batch_size.saturating_sub(2);
                    warn!("[MEMORY ERROR] Reducing batch size by 2 (now {batch_size})");
                    if batch_size == 0 {
                        return Err(TrainError::BatchSizeExhausted);
                    }
                    hparams.set_value("fit", "batch_size", Value::from(batch_size as u64), true)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One pass over `init_epoch..n_epochs` at a fixed batch size
    fn run_epochs(
        &mut self,
        train: &mut dyn BatchSequence,
        mut val: Option<&mut (dyn BatchSequence + '_)>,
        callbacks: &mut CallbackManager,
        batch_size: usize,
        config: &FitConfig,
    ) -> Result<EpochsOutcome> {
        train.set_batch_size(batch_size);
        let train_steps = (train.images_per_epoch() / batch_size).max(1);
        info!("Using {train_steps} steps per train epoch (batch size {batch_size})");
        let val_steps = match val.as_deref_mut() {
            Some(seq) => {
                seq.set_batch_size(batch_size);
                let steps = (seq.images_per_epoch() / batch_size).max(1);
                info!("Using {steps} steps per validation epoch");
                Some(steps)
            }
            None => None,
        };

        let mut outcome = EpochsOutcome {
            epochs_run: 0,
            final_loss: 0.0,
            stopped_early: false,
        };
        for epoch in config.init_epoch..config.n_epochs {
            let ctx = self.build_context(
                epoch,
                config.n_epochs,
                0,
                train_steps,
                outcome.final_loss,
                None,
                Vec::new(),
            );
            if callbacks.on_epoch_begin(&ctx) == CallbackAction::Stop {
                outcome.stopped_early = true;
                break;
            }

            let steps = self.run_epoch_steps(train, callbacks, epoch, config.n_epochs, train_steps)?;
            if steps.stopped_early {
                outcome.stopped_early = true;
                break;
            }
            let avg_loss = steps.total_loss / steps.num_steps.max(1) as f32;
            outcome.final_loss = avg_loss;

            // validation happens inside the epoch so its results reach the
            // epoch-end callbacks below
            let (val_loss, metrics) = match (val.as_deref_mut(), val_steps) {
                (Some(seq), Some(steps)) => self.run_validation(seq, steps)?,
                _ => (None, Vec::new()),
            };
            self.update_best_loss(val_loss.unwrap_or(avg_loss));
            outcome.epochs_run += 1;

            let ctx = self.build_context(
                epoch,
                config.n_epochs,
                train_steps,
                train_steps,
                avg_loss,
                val_loss,
                metrics,
            );
            let stop = callbacks.on_epoch_end(&ctx) == CallbackAction::Stop;
            self.apply_service_requests();
            if stop {
                outcome.stopped_early = true;
                break;
            }
        }
        Ok(outcome)
    }

    /// Inner step loop of one epoch
    fn run_epoch_steps(
        &mut self,
        train: &mut dyn BatchSequence,
        callbacks: &mut CallbackManager,
        epoch: usize,
        max_epochs: usize,
        steps_per_epoch: usize,
    ) -> Result<EpochStepResult> {
        let mut total_loss = 0.0;
        let mut num_steps = 0usize;
        for step in 0..steps_per_epoch {
            let running = if num_steps > 0 {
                total_loss / num_steps as f32
            } else {
                0.0
            };
            let ctx =
                self.build_context(epoch, max_epochs, step, steps_per_epoch, running, None, Vec::new());
            if callbacks.on_step_begin(&ctx) == CallbackAction::Stop {
                return Ok(EpochStepResult {
                    total_loss,
                    num_steps,
                    stopped_early: true,
                });
            }

            let batch = train.next_batch()?;
            let loss = self.backend.train_on_batch(&batch)?;
            total_loss += loss;
            num_steps += 1;
            self.global_step += 1;

            let running = total_loss / num_steps as f32;
            let ctx =
                self.build_context(epoch, max_epochs, step, steps_per_epoch, running, None, Vec::new());
            if callbacks.on_step_end(&ctx) == CallbackAction::Stop {
                return Ok(EpochStepResult {
                    total_loss,
                    num_steps,
                    stopped_early: true,
                });
            }
        }
        Ok(EpochStepResult {
            total_loss,
            num_steps,
            stopped_early: false,
        })
    }

    /// Evaluate `steps` validation batches; returns the mean validation
    /// loss and the other metrics renamed with a `val_` prefix
    fn run_validation(
        &mut self,
        val: &mut dyn BatchSequence,
        steps: usize,
    ) -> Result<(Option<f32>, Vec<(String, f32)>)> {
        let mut sums: Vec<(String, f32)> = Vec::new();
        for _ in 0..steps {
            let batch = val.next_batch()?;
            for (name, value) in self.backend.evaluate_on_batch(&batch)? {
                match sums.iter_mut().find(|(n, _)| *n == name) {
                    Some((_, sum)) => *sum += value,
                    None => sums.push((name, value)),
                }
            }
        }

        let mut val_loss = None;
        let mut metrics = Vec::with_capacity(sums.len());
        for (name, sum) in sums {
            let mean = sum / steps as f32;
            if name == "loss" {
                val_loss = Some(mean);
            } else {
                metrics.push((format!("val_{name}"), mean));
            }
        }
        Ok((val_loss, metrics))
    }

    /// Apply what callbacks deposited during the epoch: at most one pending
    /// learning rate, then every checkpoint request in order. A failed save
    /// is logged and training continues.
    fn apply_service_requests(&mut self) {
        if let Some(lr) = self.services.take_lr() {
            info!("Applying requested learning rate {lr:e}");
            self.backend.set_lr(lr);
        }
        for request in self.services.take_checkpoints() {
            match self.backend.save_weights(&request.path) {
                Ok(()) => debug!(
                    "saved weights to '{}'{}",
                    request.path.display(),
                    if request.is_best { " (new best)" } else { "" }
                ),
                Err(err) => warn!(
                    "could not save weights to '{}': {err}",
                    request.path.display()
                ),
            }
        }
    }

    fn summarize(
        &self,
        epochs_run: usize,
        final_loss: f32,
        stopped_early: bool,
        oom_events: u32,
        final_batch_size: usize,
    ) -> FitSummary {
        FitSummary {
            epochs_run,
            final_loss,
            best_loss: self.best_loss.unwrap_or(final_loss),
            stopped_early,
            oom_events,
            final_batch_size,
            elapsed_secs: self.start_time.map_or(0.0, |t| t.elapsed().as_secs_f64()),
        }
    }
}
