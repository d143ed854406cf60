//! Random box sampling over volumetric pairs.
//!
//! Each sample draws a pair and cuts a `dim^3` box at a random position.
//! Volumes smaller than the box along an axis are centred and padded with
//! the background value. Box batches carry no channel axis, so this style
//! serves single-channel volumes only.

use super::batch::Batch;
use super::{BatchSequence, Result, SequenceError, SequenceParams};
use crate::image::ImagePairLoader;
use ndarray::{s, Array3, Array4, Axis, Ix3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Box sampler producing `(N, dim, dim, dim)` batches
pub struct Patches3dSequence<'a> {
    loader: &'a ImagePairLoader,
    params: SequenceParams,
    rng: StdRng,
}

impl<'a> Patches3dSequence<'a> {
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

    fn sample_one(&mut self) -> Result<(Array3<f32>, Array3<u8>, f32)> {
        let dim = self.params.dim;
        let handle = self.loader.get_random(&mut self.rng)?;
        let view = handle.view()?;
        if view.shape().len() < 3 {
            return Err(SequenceError::NotVolumetric {
                id: handle.id().to_string(),
                ndim: view.shape().len(),
            });
        }
        if view.n_channels() != 1 {
            return Err(SequenceError::ChannelMismatch {
                id: handle.id().to_string(),
                expected: 1,
                got: view.n_channels(),
            });
        }

        // squeeze a singleton channel axis so (H, W, D, 1) volumes box like 3D ones
        let image = view.image().view();
        let image = if image.ndim() == 4 {
            image.index_axis_move(Axis(3), 0)
        } else {
            image
        };
        let image = image
            .into_dimensionality::<Ix3>()
            .map_err(|_| SequenceError::NotVolumetric {
                id: handle.id().to_string(),
                ndim: view.shape().len(),
            })?;
        let shape = image.dim();
        let shape = [shape.0, shape.1, shape.2];

        // random box corner per axis; undersized axes are centred and padded
        let mut dst = [0usize; 3];
        let mut src = [0usize; 3];
        let mut len = [0usize; 3];
        for a in 0..3 {
            if shape[a] >= dim {
                dst[a] = 0;
                src[a] = self.rng.random_range(0..=shape[a] - dim);
                len[a] = dim;
            } else {
                dst[a] = (dim - shape[a]) / 2;
                src[a] = 0;
                len[a] = shape[a];
            }
        }

        let mut box_image = Array3::from_elem((dim, dim, dim), self.params.bg_value);
        box_image
            .slice_mut(s![
                dst[0]..dst[0] + len[0],
                dst[1]..dst[1] + len[1],
                dst[2]..dst[2] + len[2]
            ])
            .assign(&image.slice(s![
                src[0]..src[0] + len[0],
                src[1]..src[1] + len[1],
                src[2]..src[2] + len[2]
            ]));

        let labels = view
            .labels()
            .ok_or_else(|| SequenceError::MissingLabels(handle.id().to_string()))?
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|_| SequenceError::NotVolumetric {
                id: handle.id().to_string(),
                ndim: view.shape().len(),
            })?;
        let mut box_labels = Array3::<u8>::zeros((dim, dim, dim));
        box_labels
            .slice_mut(s![
                dst[0]..dst[0] + len[0],
                dst[1]..dst[1] + len[1],
                dst[2]..dst[2] + len[2]
            ])
            .assign(&labels.slice(s![
                src[0]..src[0] + len[0],
                src[1]..src[1] + len[1],
                src[2]..src[2] + len[2]
            ]));

        Ok((box_image, box_labels, view.sample_weight()))
    }
}

impl BatchSequence for Patches3dSequence<'_> {
    fn next_batch(&mut self) -> Result<Batch> {
        let n = self.params.batch_size;
        let dim = self.params.dim;
        let mut images = Array4::from_elem((n, dim, dim, dim), self.params.bg_value);
        let mut labels = Array4::<u8>::zeros((n, dim, dim, dim));
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

#[cfg(test)]
mod tests {
    use super::super::test_support::synthetic_loader;
    use super::*;
    use crate::image::{ImagePair, ImagePairLoader};
    use ndarray::ArrayD;

    fn params(batch_size: usize, dim: usize) -> SequenceParams {
        SequenceParams::new(batch_size, dim, 100).with_seed(13)
    }

    #[test]
    fn test_batch_shapes() {
        let loader = synthetic_loader(2, &[8, 8, 8]);
        let mut seq = Patches3dSequence::new(&loader, params(3, 4));
        let batch = seq.next_batch().unwrap();
        assert_eq!(batch.images.shape(), &[3, 4, 4, 4]);
        assert_eq!(batch.labels.shape(), &[3, 4, 4, 4]);
        assert_eq!(batch.weights.len(), 3);
    }

    #[test]
    fn test_boxes_within_volume_have_no_padding() {
        let loader = synthetic_loader(1, &[8, 8, 8]);
        let mut seq = Patches3dSequence::new(&loader, params(4, 4));
        let batch = seq.next_batch().unwrap();
        // ramp voxels are positive; a background value would show as 0
        assert!(batch.images.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_small_volume_is_centred_and_padded() {
        let loader = synthetic_loader(1, &[3, 3, 3]);
        let mut seq = Patches3dSequence::new(
            &loader,
            SequenceParams::new(1, 5, 100).with_seed(2).with_bg_value(-1.0),
        );
        let batch = seq.next_batch().unwrap();
        assert_eq!(batch.images[[0, 0, 0, 0]], -1.0);
        assert_eq!(batch.images[[0, 4, 4, 4]], -1.0);
        assert!(batch.images[[0, 2, 2, 2]] > 0.0);
        assert_eq!(batch.labels[[0, 0, 0, 0]], 0);
    }

    #[test]
    fn test_multi_channel_volume_is_rejected() {
        let mut loader = ImagePairLoader::empty(false);
        let pair = ImagePair::new("multi.nii.gz", None);
        pair.insert_volume(
            ArrayD::from_elem(vec![4, 4, 4, 3], 1.0),
            Some(ArrayD::from_elem(vec![4, 4, 4], 0u8)),
            [1.0; 3],
        )
        .unwrap();
        loader.add_image(pair);

        let mut seq = Patches3dSequence::new(&loader, params(1, 4));
        assert!(matches!(
            seq.next_batch().unwrap_err(),
            SequenceError::ChannelMismatch { expected: 1, got: 3, .. }
        ));
    }

    #[test]
    fn test_singleton_channel_axis_is_squeezed() {
        let mut loader = ImagePairLoader::empty(false);
        let pair = ImagePair::new("mono.nii.gz", None);
        pair.insert_volume(
            ArrayD::from_elem(vec![6, 6, 6, 1], 2.0),
            Some(ArrayD::from_elem(vec![6, 6, 6], 1u8)),
            [1.0; 3],
        )
        .unwrap();
        loader.add_image(pair);

        let mut seq = Patches3dSequence::new(&loader, params(1, 4));
        let batch = seq.next_batch().unwrap();
        assert_eq!(batch.images.shape(), &[1, 4, 4, 4]);
        assert!(batch.images.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_seeded_sampling_is_deterministic() {
        let loader = synthetic_loader(2, &[6, 6, 6]);
        let mut a = Patches3dSequence::new(&loader, params(2, 4));
        let mut b = Patches3dSequence::new(&loader, params(2, 4));
        assert_eq!(
            a.next_batch().unwrap().images,
            b.next_batch().unwrap().images
        );
    }
}
