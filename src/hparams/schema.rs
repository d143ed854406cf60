//! Typed views over the standard hyperparameter groups.
//!
//! `YamlHParams` hands out raw `serde_yaml` values; these structs give the
//! rest of the pipeline a checked shape for the groups it actually consumes.
//! Parse them with [`YamlHParams::parse_group`](super::YamlHParams::parse_group).

use crate::image::ScalerKind;
use crate::train::CallbackSpec;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use std::path::PathBuf;

fn default_img_subdir() -> String {
    "images".to_string()
}

fn default_label_subdir() -> String {
    "labels".to_string()
}

fn default_n_channels() -> usize {
    1
}

/// The `train_data` / `val_data` groups: where a dataset lives on disk and
/// how its images are normalised before they reach a sequence.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DataParams {
    /// Dataset root holding the image and label sub-directories
    pub base_dir: PathBuf,
    /// Sub-directory with image volumes
    #[serde(default = "default_img_subdir")]
    pub img_subdir: String,
    /// Sub-directory with label volumes
    #[serde(default = "default_label_subdir")]
    pub label_subdir: String,
    /// Weight attached to every sample drawn from this dataset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_weight: Option<f32>,
    /// Intensity scaler fitted per image before batching
    #[serde(default)]
    pub scaler: ScalerKind,
    /// Padding value for out-of-volume voxels
    #[serde(default)]
    pub bg_value: f32,
    /// Upper bound on concurrently loaded images; enables the load queue
    /// when set below the dataset size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_load: Option<usize>,
}

/// The `build` group: the few architecture facts the data pipeline needs.
/// Everything else in the group belongs to the model backend.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BuildParams {
    /// Side length of sampled planes or boxes, in voxels
    pub dim: usize,
    /// Number of image channels
    #[serde(default = "default_n_channels")]
    pub n_channels: usize,
    /// Number of segmentation classes
    pub n_classes: usize,
}

/// The `fit` group: everything the trainer needs for one run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FitParams {
    /// Batch sampling style, e.g. `slices_2d` or `patches_3d`
    pub intrp_style: String,
    /// Samples per gradient step
    pub batch_size: usize,
    /// Total epochs to run
    pub n_epochs: usize,
    /// First epoch index, non-zero when resuming
    #[serde(default)]
    pub init_epoch: usize,
    /// Optimizer name handed to the backend
    pub optimizer: String,
    /// Optimizer keyword arguments handed to the backend untouched
    #[serde(default)]
    pub optimizer_kwargs: Mapping,
    /// Loss function name
    pub loss: String,
    /// Metric names evaluated on validation batches
    #[serde(default)]
    pub metrics: Vec<String>,
    /// Whether targets are integer class maps rather than one-hot
    #[serde(default)]
    pub sparse: bool,
    /// Images drawn per training epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_images_per_epoch: Option<usize>,
    /// Images drawn per validation pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_images_per_epoch: Option<usize>,
    /// Callback descriptors resolved against the registries at fit time
    #[serde(default)]
    pub callbacks: Vec<CallbackSpec>,
}
