//! Error types for image loading and pairing

use super::queue::QueueError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while discovering, pairing or loading image volumes
#[derive(Debug, Error)]
pub enum ImageError {
    /// No image files were found under the expected directory
    #[error("no image files found at '{0}'")]
    EmptyImageDir(PathBuf),

    /// A path listed in LIST_OF_FILES.txt does not exist
    #[error("file '{0}' from LIST_OF_FILES.txt does not exist")]
    MissingListedFile(PathBuf),

    /// The image sub-directory name does not occur in an image path, so the
    /// matching label path cannot be derived
    #[error("cannot derive label path: '{sub_dir}' does not occur in '{}'", path.display())]
    SubDirNotInPath { path: PathBuf, sub_dir: String },

    /// The label volume expected next to an image is missing
    #[error(
        "no label file found at '{}'; image and label files must carry the same name",
        expected.display()
    )]
    MissingLabel { expected: PathBuf },

    /// Image and label volumes disagree on their voxel grid
    #[error("image '{id}' has shape {image:?} but its labels have shape {labels:?}")]
    ShapeMismatch {
        id: String,
        image: Vec<usize>,
        labels: Vec<usize>,
    },

    /// Voxel data was requested from a pair that is not loaded
    #[error("image '{0}' is not loaded")]
    NotLoaded(String),

    /// An operation needed labels but the loader runs in predict mode
    #[error("operation requires labels, but the loader is in predict mode")]
    PredictMode,

    /// An operation needed labels for a pair that carries none
    #[error("image '{0}' has no labels")]
    UnlabeledImage(String),

    /// The loader holds no pairs at all
    #[error("the loader holds no image pairs")]
    NoPairs,

    /// A unique sample asked for more pairs than the loader holds
    #[error("cannot sample {requested} unique pairs from {available}")]
    SampleTooLarge { requested: usize, available: usize },

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Unknown intensity scaler name
    #[error("unknown scaler '{0}' (expected 'standard', 'minmax' or 'none')")]
    UnknownScaler(String),

    /// A NIfTI file could not be read or decoded
    #[error("failed to read NIfTI file '{}': {source}", path.display())]
    Nifti {
        path: PathBuf,
        #[source]
        source: nifti::NiftiError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ImageError>;
