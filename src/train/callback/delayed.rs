//! Wrapper postponing a callback's epoch events to a later epoch.

use super::traits::{CallbackAction, CallbackContext, TrainerCallback};
use crate::train::services::TrainerServices;
use log::info;

/// Suppresses epoch and step events of the wrapped callback until training
/// reaches `start_from`. Useful for callbacks that should not act on the
/// noisy first epochs, e.g. early stopping on a cold model.
///
/// `bind`, `on_train_begin` and `on_train_end` always pass through so the
/// wrapped callback can set itself up.
pub struct DelayedCallback {
    inner: Box<dyn TrainerCallback>,
    start_from: usize,
    announced: bool,
}

impl DelayedCallback {
    #[must_use]
    pub fn new(inner: Box<dyn TrainerCallback>, start_from: usize) -> Self {
        Self {
            inner,
            start_from,
            announced: false,
        }
    }

    fn active(&mut self, ctx: &CallbackContext) -> bool {
        if ctx.epoch < self.start_from {
            return false;
        }
        if !self.announced {
            info!("'{}' activated at epoch {}", self.inner.name(), ctx.epoch);
            self.announced = true;
        }
        true
    }
}

impl TrainerCallback for DelayedCallback {
    fn bind(&mut self, services: &TrainerServices) {
        self.inner.bind(services);
    }

    fn on_train_begin(&mut self, ctx: &CallbackContext) -> CallbackAction {
        self.inner.on_train_begin(ctx)
    }

    fn on_train_end(&mut self, ctx: &CallbackContext) {
        self.inner.on_train_end(ctx);
    }

    fn on_epoch_begin(&mut self, ctx: &CallbackContext) -> CallbackAction {
        if self.active(ctx) {
            self.inner.on_epoch_begin(ctx)
        } else {
            CallbackAction::Continue
        }
    }

    fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        if self.active(ctx) {
            self.inner.on_epoch_end(ctx)
        } else {
            CallbackAction::Continue
        }
    }

    fn on_step_begin(&mut self, ctx: &CallbackContext) -> CallbackAction {
        if self.active(ctx) {
            self.inner.on_step_begin(ctx)
        } else {
            CallbackAction::Continue
        }
    }

    fn on_step_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        if self.active(ctx) {
            self.inner.on_step_end(ctx)
        } else {
            CallbackAction::Continue
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Recorder {
        epoch_ends: Arc<AtomicUsize>,
        answer: CallbackAction,
    }

    impl TrainerCallback for Recorder {
        fn on_epoch_end(&mut self, _: &CallbackContext) -> CallbackAction {
            self.epoch_ends.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
        fn name(&self) -> &'static str {
            "Recorder"
        }
    }

    fn ctx(epoch: usize) -> CallbackContext {
        CallbackContext {
            epoch,
            ..Default::default()
        }
    }

    #[test]
    fn test_suppresses_until_activation_epoch() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut delayed = DelayedCallback::new(
            Box::new(Recorder {
                epoch_ends: Arc::clone(&count),
                answer: CallbackAction::Continue,
            }),
            3,
        );

        for epoch in 0..3 {
            assert_eq!(delayed.on_epoch_end(&ctx(epoch)), CallbackAction::Continue);
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        delayed.on_epoch_end(&ctx(3));
        delayed.on_epoch_end(&ctx(4));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_answer_passes_through_once_active() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut delayed = DelayedCallback::new(
            Box::new(Recorder {
                epoch_ends: Arc::clone(&count),
                answer: CallbackAction::Stop,
            }),
            1,
        );
        assert_eq!(delayed.on_epoch_end(&ctx(0)), CallbackAction::Continue);
        assert_eq!(delayed.on_epoch_end(&ctx(1)), CallbackAction::Stop);
    }

    #[test]
    fn test_name_delegates_to_inner() {
        let delayed = DelayedCallback::new(
            Box::new(Recorder {
                epoch_ends: Arc::new(AtomicUsize::new(0)),
                answer: CallbackAction::Continue,
            }),
            2,
        );
        assert_eq!(delayed.name(), "Recorder");
    }
}
