//! Error type of the training loop

use crate::hparams::HParamsError;
use crate::sequences::SequenceError;
use crate::train::backend::BackendError;
use crate::train::callback::CallbackError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    /// Out-of-memory recovery halved the batch size down to nothing
    #[error("batch size reached zero during out-of-memory recovery")]
    BatchSizeExhausted,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error(transparent)]
    HParams(#[from] HParamsError),
}

pub type Result<T> = std::result::Result<T, TrainError>;
