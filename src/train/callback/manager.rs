//! Callback manager dispatching events to a resolved callback list.

use super::traits::{CallbackAction, CallbackContext, TrainerCallback};
use crate::train::services::TrainerServices;

/// Holds resolved callbacks and fans training events out to them.
/// A `Stop` answer short-circuits the remaining callbacks.
#[derive(Default)]
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainerCallback>>,
}

impl CallbackManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// Add a callback
    pub fn add<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    /// Add an already boxed callback, as produced by a registry factory
    pub fn add_boxed(&mut self, callback: Box<dyn TrainerCallback>) {
        self.callbacks.push(callback);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Names of the held callbacks, in dispatch order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.callbacks.iter().map(|cb| cb.name()).collect()
    }

    /// Hand the trainer's service channels to every callback
    pub fn bind_all(&mut self, services: &TrainerServices) {
        for cb in &mut self.callbacks {
            cb.bind(services);
        }
    }

    pub fn on_train_begin(&mut self, ctx: &CallbackContext) -> CallbackAction {
        for cb in &mut self.callbacks {
            if cb.on_train_begin(ctx) == CallbackAction::Stop {
                return CallbackAction::Stop;
            }
        }
        CallbackAction::Continue
    }

    pub fn on_train_end(&mut self, ctx: &CallbackContext) {
        for cb in &mut self.callbacks {
            cb.on_train_end(ctx);
        }
    }

    pub fn on_epoch_begin(&mut self, ctx: &CallbackContext) -> CallbackAction {
        for cb in &mut self.callbacks {
            if cb.on_epoch_begin(ctx) == CallbackAction::Stop {
                return CallbackAction::Stop;
            }
        }
        CallbackAction::Continue
    }

    pub fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        for cb in &mut self.callbacks {
            if cb.on_epoch_end(ctx) == CallbackAction::Stop {
                return CallbackAction::Stop;
            }
        }
        CallbackAction::Continue
    }

    pub fn on_step_begin(&mut self, ctx: &CallbackContext) -> CallbackAction {
        for cb in &mut self.callbacks {
            if cb.on_step_begin(ctx) == CallbackAction::Stop {
                return CallbackAction::Stop;
            }
        }
        CallbackAction::Continue
    }

    pub fn on_step_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        for cb in &mut self.callbacks {
            if cb.on_step_end(ctx) == CallbackAction::Stop {
                return CallbackAction::Stop;
            }
        }
        CallbackAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::callback::{EarlyStopping, Monitor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingCallback {
        count: Arc<AtomicUsize>,
        answer: CallbackAction,
    }

    impl TrainerCallback for CountingCallback {
        fn on_epoch_end(&mut self, _: &CallbackContext) -> CallbackAction {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
        fn name(&self) -> &'static str {
            "CountingCallback"
        }
    }

    #[test]
    fn test_manager_dispatches_early_stopping() {
        let mut manager = CallbackManager::new();
        manager.add(EarlyStopping::new(1, 0.001, Monitor::TrainLoss));

        let mut ctx = CallbackContext {
            loss: 1.0,
            ..Default::default()
        };
        assert_eq!(manager.on_epoch_end(&ctx), CallbackAction::Continue);

        ctx.epoch = 1;
        assert_eq!(manager.on_epoch_end(&ctx), CallbackAction::Stop);
    }

    #[test]
    fn test_manager_len_and_names() {
        let mut manager = CallbackManager::new();
        assert!(manager.is_empty());
        manager.add(EarlyStopping::new(3, 0.0, Monitor::ValLoss));
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.names(), vec!["EarlyStopping"]);
    }

    #[test]
    fn test_stop_short_circuits_later_callbacks() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut manager = CallbackManager::new();
        manager.add(CountingCallback {
            count: Arc::clone(&count),
            answer: CallbackAction::Stop,
        });
        manager.add(CountingCallback {
            count: Arc::clone(&count),
            answer: CallbackAction::Continue,
        });

        assert_eq!(
            manager.on_epoch_end(&CallbackContext::default()),
            CallbackAction::Stop
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_train_end_reaches_every_callback() {
        let count = Arc::new(AtomicUsize::new(0));

        struct EndCallback {
            count: Arc<AtomicUsize>,
        }
        impl TrainerCallback for EndCallback {
            fn on_train_end(&mut self, _: &CallbackContext) {
                self.count.fetch_add(1, Ordering::SeqCst);
            }
            fn name(&self) -> &'static str {
                "EndCallback"
            }
        }

        let mut manager = CallbackManager::new();
        for _ in 0..3 {
            manager.add(EndCallback {
                count: Arc::clone(&count),
            });
        }
        manager.on_train_end(&CallbackContext::default());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_empty_manager_continues() {
        let mut manager = CallbackManager::default();
        let ctx = CallbackContext::default();
        assert_eq!(manager.on_train_begin(&ctx), CallbackAction::Continue);
        assert_eq!(manager.on_epoch_begin(&ctx), CallbackAction::Continue);
        assert_eq!(manager.on_epoch_end(&ctx), CallbackAction::Continue);
        assert_eq!(manager.on_step_begin(&ctx), CallbackAction::Continue);
        assert_eq!(manager.on_step_end(&ctx), CallbackAction::Continue);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn manager_propagates_stop_after_patience(patience in 1usize..5) {
                let mut manager = CallbackManager::new();
                manager.add(EarlyStopping::new(patience, 0.001, Monitor::TrainLoss));

                let mut ctx = CallbackContext { loss: 1.0, ..Default::default() };
                for epoch in 0..patience {
                    ctx.epoch = epoch;
                    let action = manager.on_epoch_end(&ctx);
                    if epoch < patience - 1 {
                        prop_assert_eq!(action, CallbackAction::Continue);
                    }
                }
                ctx.epoch = patience;
                prop_assert_eq!(manager.on_epoch_end(&ctx), CallbackAction::Stop);
            }

            #[test]
            fn every_callback_fires_when_all_continue(n in 1usize..5) {
                let count = Arc::new(AtomicUsize::new(0));
                let mut manager = CallbackManager::new();
                for _ in 0..n {
                    manager.add(CountingCallback {
                        count: Arc::clone(&count),
                        answer: CallbackAction::Continue,
                    });
                }
                manager.on_epoch_end(&CallbackContext::default());
                prop_assert_eq!(count.load(Ordering::SeqCst), n);
            }
        }
    }
}
