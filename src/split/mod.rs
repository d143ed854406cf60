//! Cross-validation dataset splitting.
//!
//! Partitions an image/label dataset into `k` cross-validation splits (or a
//! single fixed train/val/test split) and materializes them on disk under
//! `<data_dir>/<out_dir>/<k>_CV/split_<i>/{train,val,test}/{images,labels}`.
//! Members are placed as relative symlinks, copies or file-list entries, so
//! the splits reference the source data without duplicating it by default.
//! Backs the `segmentar cv-split` command.

mod counts;
mod error;
mod materialize;
mod plan;
mod runner;

pub use counts::SplitCounts;
pub use error::{Result, SplitError};
pub use materialize::LinkMode;
pub use plan::{chunk_evenly, plan_splits, SplitPlan};
pub use runner::{run, SplitOptions, SplitReport};
