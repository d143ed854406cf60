//! Init command implementation

use crate::cli::args::InitArgs;
use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::hparams::YamlHParams;
use serde_yaml::Value;
use std::path::Path;

/// Name of the hyperparameter file created in every new project
pub const HPARAMS_FILE: &str = "train_hparams.yaml";

/// Template written by `segmentar init`. `Null` values are placeholders the
/// user fills in before training; `__CB_data` defines the anchor shared by
/// the train and validation data groups.
const TEMPLATE: &str = "\
# Hyperparameters for a segmentation training run.
# Fill in every Null value before training. Groups prefixed __CB only define
# shared anchors and are not read as hyperparameter groups.

__CB_data: &DATA
  img_subdir: images
  label_subdir: labels
  scaler: standard
  bg_value: 0.0

train_data:
  <<: *DATA
  base_dir: Null

val_data:
  <<: *DATA
  base_dir: Null

build:
  dim: 128
  n_channels: 1
  n_classes: Null

fit:
  intrp_style: slices_2d
  batch_size: 16
  n_epochs: 500
  optimizer: Adam
  optimizer_kwargs: {lr: 5.0e-05}
  loss: sparse_categorical_crossentropy
  metrics: [categorical_accuracy]
  sparse: true
  train_images_per_epoch: 2500
  val_images_per_epoch: 3500
  callbacks:
    - class_name: EarlyStopping
      kwargs: {patience: 15, monitor: val_loss}
    - class_name: ReduceLROnPlateau
      kwargs: {factor: 0.90, patience: 2, min_lr: 1.0e-07, monitor: val_loss}
    - class_name: ModelCheckpoint
      kwargs: {dir: ./model, save_best_only: true, monitor: val_loss}
    - class_name: CSVLogger
      kwargs: {filename: ./logs/training.csv, append: true}
    - class_name: DividerLine
";

/// Point the train/val data groups at `<data_dir>/train` and `<data_dir>/val`
fn fill_data_dirs(target: &Path, data_dir: &Path) -> crate::hparams::Result<()> {
    let mut hparams = YamlHParams::load(target)?;
    for (group, sub) in [("train_data", "train"), ("val_data", "val")] {
        let dir = data_dir.join(sub);
        let value = Value::String(dir.to_string_lossy().into_owned());
        hparams.set_value(group, "base_dir", value, true)?;
    }
    hparams.save()
}

pub fn run_init(args: InitArgs, level: LogLevel) -> Result<(), String> {
    let project_dir = args.root.join(&args.name);
    let target = project_dir.join(HPARAMS_FILE);
    if target.exists() {
        return Err(format!(
            "project file '{}' already exists; refusing to overwrite",
            target.display()
        ));
    }

    std::fs::create_dir_all(&project_dir)
        .map_err(|e| format!("Failed to create project directory: {e}"))?;
    std::fs::write(&target, TEMPLATE).map_err(|e| format!("Failed to write template: {e}"))?;

    if let Some(data_dir) = &args.data_dir {
        fill_data_dirs(&target, data_dir)
            .map_err(|e| format!("Failed to set data directories: {e}"))?;
    }

    log(
        level,
        LogLevel::Normal,
        &format!("Project initialized at: {}", target.display()),
    );

    Ok(())
}
