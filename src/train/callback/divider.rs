//! Visual separator between epoch logs.

use super::traits::{CallbackAction, CallbackContext, TrainerCallback};
use log::info;

/// Logs a dashed line after every epoch so runs with many per-epoch log
/// lines stay readable.
#[derive(Clone, Debug)]
pub struct DividerLine {
    length: usize,
}

impl DividerLine {
    #[must_use]
    pub fn new() -> Self {
        Self { length: 60 }
    }

    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }
}

impl Default for DividerLine {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainerCallback for DividerLine {
    fn on_epoch_end(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        info!("{}", "-".repeat(self.length));
        CallbackAction::Continue
    }

    fn name(&self) -> &'static str {
        "DividerLine"
    }
}
