//! Per-split sample counts.

use super::error::{Result, SplitError};

/// How many images land in each of train, validation and test for one split.
///
/// The test share is `n_total / n_splits` under cross-validation so the test
/// parts tile the dataset; with a single split it comes from `test_fraction`
/// instead. The validation share always comes from `val_fraction` of the
/// overall dataset size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitCounts {
    pub n_total: usize,
    pub n_train: usize,
    pub n_val: usize,
    pub n_test: usize,
}

impl SplitCounts {
    pub fn compute(
        n_total: usize,
        n_splits: usize,
        val_fraction: f64,
        test_fraction: f64,
    ) -> Result<Self> {
        if n_splits <= 1 && test_fraction <= 0.0 {
            return Err(SplitError::MissingTestFraction);
        }
        let n_test = if n_splits > 1 {
            n_total / n_splits
        } else {
            (n_total as f64 * test_fraction) as usize
        };
        let n_val = (n_total as f64 * val_fraction) as usize;
        if n_val + n_test >= n_total {
            return Err(SplitError::NoTrainingSamples {
                n_total,
                n_val,
                n_test,
            });
        }
        Ok(Self {
            n_total,
            n_train: n_total - n_val - n_test,
            n_val,
            n_test,
        })
    }
}
