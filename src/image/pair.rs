//! Lazily loaded image/label volume pairs

use super::error::{ImageError, Result};
use super::scaler::{FittedScaler, ScalerKind};
use ndarray::ArrayD;
use nifti::{DataElement, IntoNdArray, NiftiObject, ReaderOptions};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

/// Voxel data and grid metadata for one loaded pair
#[derive(Debug, Clone)]
struct LoadedVolume {
    image: ArrayD<f32>,
    labels: Option<ArrayD<u8>>,
    spacing: [f32; 3],
}

#[derive(Debug)]
struct PairState {
    volume: Option<LoadedVolume>,
    sample_weight: f32,
}

/// One image volume and its optional label volume.
///
/// Construction records only the paths; voxel data enters memory on
/// [`load`](Self::load) and leaves on [`unload`](Self::unload). Pairs are
/// shared as `Arc<ImagePair>` between the loader, the load queue and its
/// worker threads, so all loading state lives behind a lock.
#[derive(Debug)]
pub struct ImagePair {
    id: String,
    image_path: PathBuf,
    label_path: Option<PathBuf>,
    state: RwLock<PairState>,
}

impl ImagePair {
    /// Create an unloaded pair. The identifier is the image file name with
    /// its `.nii` / `.nii.gz` extension stripped.
    #[must_use]
    pub fn new(image_path: impl Into<PathBuf>, label_path: Option<PathBuf>) -> Self {
        let image_path = image_path.into();
        Self {
            id: image_id(&image_path),
            image_path,
            label_path,
            state: RwLock::new(PairState {
                volume: None,
                sample_weight: 1.0,
            }),
        }
    }

    /// Set the weight attached to samples drawn from this pair
    #[must_use]
    pub fn with_sample_weight(self, weight: f32) -> Self {
        self.set_sample_weight(weight);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    #[must_use]
    pub fn label_path(&self) -> Option<&Path> {
        self.label_path.as_deref()
    }

    #[must_use]
    pub fn has_labels(&self) -> bool {
        self.label_path.is_some()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.read_state().volume.is_some()
    }

    #[must_use]
    pub fn sample_weight(&self) -> f32 {
        self.read_state().sample_weight
    }

    pub fn set_sample_weight(&self, weight: f32) {
        self.write_state().sample_weight = weight;
    }

    /// Read the image (and labels, when present) from disk.
    ///
    /// A no-op when the pair is already loaded. Decoding happens outside the
    /// state lock; if two threads race to load the same pair, the first
    /// installed volume wins.
    pub fn load(&self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let (image, spacing) = read_volume::<f32>(&self.image_path)?;
        let labels = match &self.label_path {
            Some(path) => Some(read_volume::<u8>(path)?.0),
            None => None,
        };
        let volume = self.checked_volume(image, labels, spacing)?;
        let mut state = self.write_state();
        if state.volume.is_none() {
            state.volume = Some(volume);
        }
        Ok(())
    }

    /// Drop the voxel data, keeping paths and sample weight
    pub fn unload(&self) {
        self.write_state().volume = None;
    }

    /// Install an in-memory volume directly, bypassing the NIfTI reader.
    /// Replaces any volume already present.
    pub fn insert_volume(
        &self,
        image: ArrayD<f32>,
        labels: Option<ArrayD<u8>>,
        spacing: [f32; 3],
    ) -> Result<()> {
        let volume = self.checked_volume(image, labels, spacing)?;
        self.write_state().volume = Some(volume);
        Ok(())
    }

    /// Guarded read access to the loaded voxel data.
    ///
    /// The returned view holds a read lock; an unload cannot race with it.
    pub fn view(&self) -> Result<VolumeView<'_>> {
        let guard = self.read_state();
        if guard.volume.is_none() {
            return Err(ImageError::NotLoaded(self.id.clone()));
        }
        Ok(VolumeView { guard })
    }

    /// Physical extent of the volume along each spatial axis, in the unit of
    /// the voxel spacing (millimetres for well-formed files)
    pub fn real_extent(&self) -> Result<[f32; 3]> {
        let view = self.view()?;
        let shape = view.shape();
        let spacing = view.spacing();
        let mut extent = [0.0f32; 3];
        for (i, e) in extent.iter_mut().enumerate() {
            *e = shape.get(i).copied().unwrap_or(1) as f32 * spacing[i];
        }
        Ok(extent)
    }

    /// Fit an intensity scaler on the loaded image and apply it in place
    pub fn apply_scaler(&self, kind: ScalerKind) -> Result<FittedScaler> {
        let mut state = self.write_state();
        let volume = match state.volume.as_mut() {
            Some(v) => v,
            None => return Err(ImageError::NotLoaded(self.id.clone())),
        };
        let scaler = FittedScaler::fit(kind, &volume.image);
        scaler.apply(&mut volume.image);
        Ok(scaler)
    }

    fn checked_volume(
        &self,
        image: ArrayD<f32>,
        labels: Option<ArrayD<u8>>,
        spacing: [f32; 3],
    ) -> Result<LoadedVolume> {
        if let Some(labels) = &labels {
            let spatial = &image.shape()[..image.ndim().min(3)];
            if labels.shape() != spatial {
                return Err(ImageError::ShapeMismatch {
                    id: self.id.clone(),
                    image: image.shape().to_vec(),
                    labels: labels.shape().to_vec(),
                });
            }
        }
        Ok(LoadedVolume {
            image,
            labels,
            spacing,
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, PairState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, PairState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read guard over a loaded pair's voxel data
pub struct VolumeView<'a> {
    guard: RwLockReadGuard<'a, PairState>,
}

impl VolumeView<'_> {
    fn volume(&self) -> &LoadedVolume {
        // presence checked by ImagePair::view
        self.guard
            .volume
            .as_ref()
            .expect("VolumeView exists only for loaded pairs")
    }

    #[must_use]
    pub fn image(&self) -> &ArrayD<f32> {
        &self.volume().image
    }

    #[must_use]
    pub fn labels(&self) -> Option<&ArrayD<u8>> {
        self.volume().labels.as_ref()
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.volume().image.shape()
    }

    #[must_use]
    pub fn spacing(&self) -> [f32; 3] {
        self.volume().spacing
    }

    /// Channel count; the last axis of a 4-D image, otherwise 1
    #[must_use]
    pub fn n_channels(&self) -> usize {
        let shape = self.shape();
        if shape.len() >= 4 {
            shape[shape.len() - 1]
        } else {
            1
        }
    }

    #[must_use]
    pub fn sample_weight(&self) -> f32 {
        self.guard.sample_weight
    }
}

/// Strip the `.nii` / `.nii.gz` extension off an image file name
#[must_use]
pub fn image_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(&name)
        .to_string()
}

fn read_volume<T: DataElement>(path: &Path) -> Result<(ArrayD<T>, [f32; 3])> {
    let wrap = |source| ImageError::Nifti {
        path: path.to_path_buf(),
        source,
    };
    let object = ReaderOptions::new().read_file(path).map_err(wrap)?;
    let header = object.header();
    let mut spacing = [1.0f32; 3];
    for (i, s) in spacing.iter_mut().enumerate() {
        let dim = header.pixdim[i + 1];
        if dim > 0.0 {
            *s = dim;
        }
    }
    let data = object.into_volume().into_ndarray::<T>().map_err(wrap)?;
    Ok((data, spacing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array3, ArrayD};

    fn synthetic_pair(id: &str) -> ImagePair {
        ImagePair::new(format!("{id}.nii.gz"), None)
    }

    fn ramp(shape: (usize, usize, usize)) -> ArrayD<f32> {
        let (a, b, c) = shape;
        Array3::from_shape_fn(shape, |(i, j, k)| (i * b * c + j * c + k) as f32).into_dyn()
    }

    #[test]
    fn test_id_strips_nifti_extensions() {
        assert_eq!(image_id(Path::new("/data/images/sub-01.nii.gz")), "sub-01");
        assert_eq!(image_id(Path::new("scan.nii")), "scan");
        assert_eq!(image_id(Path::new("a.b.nii.gz")), "a.b");
        assert_eq!(image_id(Path::new("plain.txt")), "plain.txt");
    }

    #[test]
    fn test_new_pair_is_unloaded() {
        let pair = synthetic_pair("p0");
        assert!(!pair.is_loaded());
        assert_eq!(pair.id(), "p0");
        assert!(pair.view().is_err());
        assert!(pair.real_extent().is_err());
    }

    #[test]
    fn test_insert_volume_and_view() {
        let pair = synthetic_pair("p1");
        let labels = ArrayD::from_elem(vec![2, 3, 4], 1u8);
        pair.insert_volume(ramp((2, 3, 4)), Some(labels), [1.0, 2.0, 3.0])
            .unwrap();
        assert!(pair.is_loaded());
        let view = pair.view().unwrap();
        assert_eq!(view.shape(), &[2, 3, 4]);
        assert_eq!(view.spacing(), [1.0, 2.0, 3.0]);
        assert_eq!(view.n_channels(), 1);
        assert!(view.labels().is_some());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let pair = synthetic_pair("p2");
        let labels = ArrayD::from_elem(vec![2, 3, 5], 0u8);
        let err = pair
            .insert_volume(ramp((2, 3, 4)), Some(labels), [1.0; 3])
            .unwrap_err();
        assert!(matches!(err, ImageError::ShapeMismatch { .. }));
        assert!(!pair.is_loaded());
    }

    #[test]
    fn test_channel_axis_not_part_of_spatial_check() {
        let pair = synthetic_pair("p3");
        let image = ArrayD::from_elem(vec![2, 3, 4, 2], 0.5f32);
        let labels = ArrayD::from_elem(vec![2, 3, 4], 0u8);
        pair.insert_volume(image, Some(labels), [1.0; 3]).unwrap();
        assert_eq!(pair.view().unwrap().n_channels(), 2);
    }

    #[test]
    fn test_load_is_noop_when_volume_present() {
        let pair = synthetic_pair("p4");
        pair.insert_volume(ramp((2, 2, 2)), None, [1.0; 3]).unwrap();
        // the path does not exist, so a real read attempt would fail
        pair.load().unwrap();
        assert!(pair.is_loaded());
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let pair = ImagePair::new("/definitely/not/here.nii.gz", None);
        let err = pair.load().unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.nii.gz"));
    }

    #[test]
    fn test_unload_keeps_sample_weight() {
        let pair = synthetic_pair("p5").with_sample_weight(0.25);
        pair.insert_volume(ramp((2, 2, 2)), None, [1.0; 3]).unwrap();
        pair.unload();
        assert!(!pair.is_loaded());
        assert_relative_eq!(pair.sample_weight(), 0.25);
    }

    #[test]
    fn test_real_extent_uses_spacing() {
        let pair = synthetic_pair("p6");
        pair.insert_volume(ramp((10, 20, 30)), None, [0.5, 1.0, 2.0])
            .unwrap();
        let extent = pair.real_extent().unwrap();
        assert_relative_eq!(extent[0], 5.0);
        assert_relative_eq!(extent[1], 20.0);
        assert_relative_eq!(extent[2], 60.0);
    }

    #[test]
    fn test_apply_scaler_standardises_intensities() {
        let pair = synthetic_pair("p7");
        pair.insert_volume(ramp((4, 4, 4)), None, [1.0; 3]).unwrap();
        let fitted = pair.apply_scaler(ScalerKind::Standard).unwrap();
        assert_eq!(fitted.kind(), ScalerKind::Standard);
        let view = pair.view().unwrap();
        let mean: f32 = view.image().iter().sum::<f32>() / view.image().len() as f32;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_apply_scaler_requires_loaded_volume() {
        let pair = synthetic_pair("p8");
        assert!(matches!(
            pair.apply_scaler(ScalerKind::Minmax),
            Err(ImageError::NotLoaded(_))
        ));
    }

    #[test]
    fn test_roundtrip_through_nifti_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.nii.gz");
        let data = ramp((3, 4, 5));
        nifti::writer::WriterOptions::new(&path)
            .write_nifti(&data)
            .unwrap();

        let pair = ImagePair::new(&path, None);
        pair.load().unwrap();
        let view = pair.view().unwrap();
        assert_eq!(view.shape(), &[3, 4, 5]);
        assert_relative_eq!(view.image()[[2, 3, 4]], data[[2, 3, 4]]);
    }
}
