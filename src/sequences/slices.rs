//! Random plane sampling over volumetric pairs.
//!
//! Each sample draws a pair, picks one of the three spatial axes and a
//! random index along it, and fits the resulting plane to `dim x dim` with a
//! centred crop or pad. Padding uses the configured background value for
//! images and class 0 for labels.

use super::batch::Batch;
use super::{BatchSequence, Result, SequenceError, SequenceParams};
use crate::image::ImagePairLoader;
use ndarray::{s, Array2, Array3, Array4, ArrayView2, ArrayView3, Axis, Ix2, Ix3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Plane sampler producing `(N, dim, dim, C)` batches
pub struct Slices2dSequence<'a> {
    loader: &'a ImagePairLoader,
    params: SequenceParams,
    rng: StdRng,
}

impl<'a> Slices2dSequence<'a> {
    #[must_use]
    pub fn new(loader: &'a ImagePairLoader, params: SequenceParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            loader,
            params,
            rng,
        }
    }

    fn sample_one(&mut self) -> Result<(Array3<f32>, Array2<u8>, f32)> {
        let handle = self.loader.get_random(&mut self.rng)?;
        let view = handle.view()?;
        let shape = view.shape();
        if shape.len() < 3 {
            return Err(SequenceError::NotVolumetric {
                id: handle.id().to_string(),
                ndim: shape.len(),
            });
        }
        let got = view.n_channels();
        if got != self.params.n_channels {
            return Err(SequenceError::ChannelMismatch {
                id: handle.id().to_string(),
                expected: self.params.n_channels,
                got,
            });
        }

        let axis = self.rng.random_range(0..3);
        let index = self.rng.random_range(0..shape[axis]);

        let plane = view.image().index_axis(Axis(axis), index);
        let plane = if plane.ndim() == 2 {
            plane.insert_axis(Axis(2))
        } else {
            plane
        };
        let plane = plane
            .into_dimensionality::<Ix3>()
            .map_err(|_| SequenceError::NotVolumetric {
                id: handle.id().to_string(),
                ndim: shape.len(),
            })?;
        let image = fit_plane(&plane, self.params.dim, self.params.bg_value);

        let labels = view
            .labels()
            .ok_or_else(|| SequenceError::MissingLabels(handle.id().to_string()))?;
        let label_plane = labels
            .index_axis(Axis(axis), index)
            .into_dimensionality::<Ix2>()
            .map_err(|_| SequenceError::NotVolumetric {
                id: handle.id().to_string(),
                ndim: labels.ndim(),
            })?;
        let labels = fit_label_plane(&label_plane, self.params.dim);

        Ok((image, labels, view.sample_weight()))
    }
}

impl BatchSequence for Slices2dSequence<'_> {
    fn next_batch(&mut self) -> Result<Batch> {
        let n = self.params.batch_size;
        let dim = self.params.dim;
        let mut images = Array4::from_elem(
            (n, dim, dim, self.params.n_channels),
            self.params.bg_value,
        );
        let mut labels = Array3::<u8>::zeros((n, dim, dim));
        let mut weights = Vec::with_capacity(n);
        for i in 0..n {
            let (image, label, weight) = self.sample_one()?;
            images.index_axis_mut(Axis(0), i).assign(&image);
            labels.index_axis_mut(Axis(0), i).assign(&label);
            weights.push(weight);
        }
        Ok(Batch::new(images, labels.into_dyn(), weights))
    }

    fn batch_size(&self) -> usize {
        self.params.batch_size
    }

    fn set_batch_size(&mut self, batch_size: usize) {
        self.params.batch_size = batch_size;
    }

    fn images_per_epoch(&self) -> usize {
        self.params.images_per_epoch
    }

    fn stop_queue(&self) {
        if let Some(queue) = self.loader.queue() {
            queue.stop();
        }
    }
}

/// Destination start, source start and copy length for a centred crop/pad
pub(super) fn copy_window(dst_len: usize, src_len: usize) -> (usize, usize, usize) {
    if src_len >= dst_len {
        (0, (src_len - dst_len) / 2, dst_len)
    } else {
        ((dst_len - src_len) / 2, 0, src_len)
    }
}

fn fit_plane(src: &ArrayView3<'_, f32>, dim: usize, bg: f32) -> Array3<f32> {
    let (h, w, c) = src.dim();
    let mut out = Array3::from_elem((dim, dim, c), bg);
    let (dy, sy, ly) = copy_window(dim, h);
    let (dx, sx, lx) = copy_window(dim, w);
    out.slice_mut(s![dy..dy + ly, dx..dx + lx, ..])
        .assign(&src.slice(s![sy..sy + ly, sx..sx + lx, ..]));
    out
}

fn fit_label_plane(src: &ArrayView2<'_, u8>, dim: usize) -> Array2<u8> {
    let (h, w) = src.dim();
    let mut out = Array2::zeros((dim, dim));
    let (dy, sy, ly) = copy_window(dim, h);
    let (dx, sx, lx) = copy_window(dim, w);
    out.slice_mut(s![dy..dy + ly, dx..dx + lx])
        .assign(&src.slice(s![sy..sy + ly, sx..sx + lx]));
    out
}
