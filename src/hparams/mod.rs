//! Layout-preserving YAML hyperparameter store.
//!
//! Training runs are driven by a `train_hparams.yaml` file that humans edit,
//! comment, and diff. [`YamlHParams`] keeps the raw text and the parsed
//! top-level groups side by side so programmatic edits (for example the
//! batch-size write-back after an out-of-memory recovery) never reformat the
//! file or drop comments and anchors.

mod error;
mod schema;
mod store;

pub use error::{HParamsError, Result};
pub use schema::{BuildParams, DataParams, FitParams};
pub use store::{YamlHParams, ANCHOR_PREFIX};
