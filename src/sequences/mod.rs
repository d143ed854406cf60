//! Random batch sampling over loaded image pairs.
//!
//! A [`BatchSequence`] turns an [`ImagePairLoader`] into an endless stream
//! of training batches. Two sampling styles exist: [`Slices2dSequence`]
//! draws random axis-aligned planes, [`Patches3dSequence`] draws random
//! fixed-size boxes. [`from_loader`] picks the style from the hyperparameter
//! `intrp_style` value and wires up the loader's queue when one is attached.

mod batch;
mod patches;
mod slices;

pub use batch::Batch;
pub use patches::Patches3dSequence;
pub use slices::Slices2dSequence;

use crate::image::{ImageError, ImagePairLoader, QueueError, ScalerKind};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Loader threads started for a queued dataset
const LOADER_THREADS: usize = 3;

#[derive(Debug, Error)]
pub enum SequenceError {
    /// `intrp_style` value that names no known sampling style
    #[error("invalid interpolator style '{0}' (expected 'slices_2d' or 'patches_3d')")]
    UnknownStyle(String),

    /// A drawn image does not carry the channel count the sequence was
    /// configured for
    #[error("image '{id}' has {got} channel(s), the sequence expects {expected}")]
    ChannelMismatch {
        id: String,
        expected: usize,
        got: usize,
    },

    /// A drawn image has fewer than three spatial dimensions
    #[error("image '{id}' is {ndim}-dimensional; sequences need 3-D volumes")]
    NotVolumetric { id: String, ndim: usize },

    /// Batch assembly needs labels but the drawn pair has none
    #[error("image '{0}' carries no labels")]
    MissingLabels(String),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, SequenceError>;

/// Batch sampling style, parsed from the `fit.intrp_style` hyperparameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    /// Random axis-aligned planes, `(N, dim, dim, C)` batches
    Slices2d,
    /// Random boxes, `(N, dim, dim, dim)` batches
    Patches3d,
}

impl FromStr for SequenceKind {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            // `iso_live` is the historical name for plane sampling
            "slices_2d" | "iso_live" => Ok(SequenceKind::Slices2d),
            "patches_3d" => Ok(SequenceKind::Patches3d),
            _ => Err(SequenceError::UnknownStyle(s.to_string())),
        }
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SequenceKind::Slices2d => "slices_2d",
            SequenceKind::Patches3d => "patches_3d",
        };
        write!(f, "{name}")
    }
}

/// Sampling configuration shared by both sequence styles
#[derive(Debug, Clone)]
pub struct SequenceParams {
    /// Samples per batch
    pub batch_size: usize,
    /// Side length of sampled planes or boxes
    pub dim: usize,
    /// Channels every drawn image must carry
    pub n_channels: usize,
    /// Images drawn per epoch; steps per epoch derive from this
    pub images_per_epoch: usize,
    /// Padding value for voxels outside the volume
    pub bg_value: f32,
    /// Scaler fitted on each image when the sequence is built
    pub scaler: ScalerKind,
    /// Seed for the sampling RNG; random when unset
    pub seed: Option<u64>,
}

impl SequenceParams {
    #[must_use]
    pub fn new(batch_size: usize, dim: usize, images_per_epoch: usize) -> Self {
        Self {
            batch_size,
            dim,
            n_channels: 1,
            images_per_epoch,
            bg_value: 0.0,
            scaler: ScalerKind::NoOp,
            seed: None,
        }
    }

    #[must_use]
    pub fn with_n_channels(mut self, n_channels: usize) -> Self {
        self.n_channels = n_channels;
        self
    }

    #[must_use]
    pub fn with_bg_value(mut self, bg_value: f32) -> Self {
        self.bg_value = bg_value;
        self
    }

    #[must_use]
    pub fn with_scaler(mut self, scaler: ScalerKind) -> Self {
        self.scaler = scaler;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// An endless source of randomly sampled batches
pub trait BatchSequence {
    /// Assemble the next batch
    fn next_batch(&mut self) -> Result<Batch>;

    fn batch_size(&self) -> usize;

    /// Adjust the batch size, e.g. after an out-of-memory recovery
    fn set_batch_size(&mut self, batch_size: usize);

    /// Images drawn per epoch; the trainer derives its step count from this
    fn images_per_epoch(&self) -> usize;

    /// Stop the underlying load queue, if any. Idempotent.
    fn stop_queue(&self);
}

/// Build a sequence over a loader: fit scalers (directly, or via the queue's
/// entry hook), start and fill the queue when one is attached, and return
/// the sampler for the requested style.
pub fn from_loader(
    loader: &ImagePairLoader,
    kind: SequenceKind,
    params: SequenceParams,
) -> Result<Box<dyn BatchSequence + '_>> {
    loader.prepare(params.scaler)?;
    if let Some(queue) = loader.queue() {
        queue.start(LOADER_THREADS)?;
        queue.await_full()?;
    }
    Ok(match kind {
        SequenceKind::Slices2d => Box::new(Slices2dSequence::new(loader, params)),
        SequenceKind::Patches3d => Box::new(Patches3dSequence::new(loader, params)),
    })
}

impl ImagePairLoader {
    /// Build a batch sequence over this loader. See [`from_loader`].
    pub fn sequence(
        &self,
        kind: SequenceKind,
        params: SequenceParams,
    ) -> Result<Box<dyn BatchSequence + '_>> {
        from_loader(self, kind, params)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_kind_parsing() {
        assert_eq!("slices_2d".parse::<SequenceKind>().unwrap(), SequenceKind::Slices2d);
        assert_eq!("iso_live".parse::<SequenceKind>().unwrap(), SequenceKind::Slices2d);
        assert_eq!("patches_3d".parse::<SequenceKind>().unwrap(), SequenceKind::Patches3d);
        let err = "trilinear".parse::<SequenceKind>().unwrap_err();
        assert!(err.to_string().contains("trilinear"));
    }

    #[test]
    fn test_sequence_kind_display_roundtrip() {
        for kind in [SequenceKind::Slices2d, SequenceKind::Patches3d] {
            assert_eq!(kind.to_string().parse::<SequenceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_from_loader_eager_path() {
        let loader = test_support::synthetic_loader(3, &[6, 6, 6]);
        let params = SequenceParams::new(2, 4, 10).with_seed(1);
        let mut seq = from_loader(&loader, SequenceKind::Slices2d, params).unwrap();
        let batch = seq.next_batch().unwrap();
        assert_eq!(batch.images.shape(), &[2, 4, 4, 1]);
        assert_eq!(seq.images_per_epoch(), 10);
        // no queue attached; stopping is a no-op
        seq.stop_queue();
    }

    #[test]
    fn test_loader_sequence_method() {
        let loader = test_support::synthetic_loader(2, &[5, 5, 5]);
        let params = SequenceParams::new(1, 3, 4).with_seed(2);
        let mut seq = loader.sequence(SequenceKind::Patches3d, params).unwrap();
        let batch = seq.next_batch().unwrap();
        assert_eq!(batch.images.shape(), &[1, 3, 3, 3]);
    }
}
