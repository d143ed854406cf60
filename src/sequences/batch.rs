//! One training batch of sampled image data

use ndarray::{Array4, ArrayD};

/// A batch of `N` samples ready for a model backend.
///
/// `images` is `(N, H, W, C)` for plane batches and `(N, D, H, W)` for box
/// batches; `labels` mirrors the spatial layout without the channel axis.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: ArrayD<u8>,
    pub weights: Vec<f32>,
}

impl Batch {
    #[must_use]
    pub fn new(images: Array4<f32>, labels: ArrayD<u8>, weights: Vec<f32>) -> Self {
        Self {
            images,
            labels,
            weights,
        }
    }

    /// Number of samples in the batch
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.shape()[0]
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
