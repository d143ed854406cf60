//! Error type for dataset splitting.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SplitError {
    /// Data, image or label directory that does not exist
    #[error("invalid data directory '{}': does not exist", .0.display())]
    MissingDir(PathBuf),

    /// Refusing to write into an existing output directory
    #[error("output directory '{}' already exists", .0.display())]
    OutDirExists(PathBuf),

    /// `--cv 1` without a test fraction leaves the test set undefined
    #[error("a test fraction is required when splitting without cross-validation")]
    MissingTestFraction,

    /// Requested fractions leave nothing to train on
    #[error(
        "too large validation/test fractions: {n_val} validation + {n_test} test \
         images leave no training samples out of {n_total}"
    )]
    NoTrainingSamples {
        n_total: usize,
        n_val: usize,
        n_test: usize,
    },

    /// No image file matched the file pattern
    #[error("no file under '{}' matches pattern '{pattern}'", dir.display())]
    NoImagesMatched { dir: PathBuf, pattern: String },

    /// A file pattern that does not translate to a valid matcher
    #[error("invalid file pattern '{pattern}': {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },

    /// An image without a counterpart in the label directory
    #[error(
        "no label found at '{}'; image and label files must share a file name \
         (images under '{}', labels under '{}')",
        expected.display(),
        image_dir.display(),
        label_dir.display()
    )]
    MissingLabel {
        expected: PathBuf,
        image_dir: PathBuf,
        label_dir: PathBuf,
    },

    /// An image path discovery produced that cannot be split into dir + name
    #[error("image path '{}' has no file name", .0.display())]
    BadImagePath(PathBuf),

    /// Augmented image and label directories of different size
    #[error("augmented data mismatch: {images} image(s) but {labels} label(s)")]
    AugCountMismatch { images: usize, labels: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SplitError>;
