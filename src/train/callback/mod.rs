//! Callback system for training events
//!
//! Provides extensible hooks for training loop events:
//! - `on_train_begin` / `on_train_end`
//! - `on_epoch_begin` / `on_epoch_end`
//! - `on_step_begin` / `on_step_end`
//!
//! Callbacks either come straight from code or are resolved from the
//! `fit.callbacks` hyperparameter list through [`CallbackRegistry`].
//!
//! # Example
//!
//! ```rust
//! use segmentar::train::callback::{TrainerCallback, CallbackContext, CallbackAction};
//!
//! struct PrintCallback;
//!
//! impl TrainerCallback for PrintCallback {
//!     fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
//!         println!("Epoch {} finished with loss {:.4}", ctx.epoch, ctx.loss);
//!         CallbackAction::Continue
//!     }
//! }
//! # let _ = PrintCallback;
//! ```

mod checkpoint;
mod csv_logger;
mod delayed;
mod divider;
mod early_stopping;
mod manager;
mod reduce_lr;
mod registry;
mod traits;

pub use checkpoint::ModelCheckpoint;
pub use csv_logger::CsvLogger;
pub use delayed::DelayedCallback;
pub use divider::DividerLine;
pub use early_stopping::EarlyStopping;
pub use manager::CallbackManager;
pub use reduce_lr::ReduceLROnPlateau;
pub use registry::{
    resolve_callbacks, resolve_spec, CallbackError, CallbackRegistry, CallbackSpec,
};
pub use traits::{CallbackAction, CallbackContext, Monitor, TrainerCallback};
