//! End-to-end split runner: validate directories, discover images, plan the
//! partition and materialize every split.

use super::counts::SplitCounts;
use super::error::{Result, SplitError};
use super::materialize::{materialize_split, place_pairs, select_augmented, LinkMode};
use super::plan::plan_splits;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for one splitting run.
///
/// Sub-directory names are resolved against `data_dir`; the output lands in
/// `<data_dir>/<out_dir>/<n>_CV/` (or `fixed_split/` without cross-validation).
#[derive(Debug, Clone)]
pub struct SplitOptions {
    pub data_dir: PathBuf,
    pub n_splits: usize,
    pub out_dir: String,
    pub im_sub_dir: String,
    pub lab_sub_dir: String,
    /// Sub-directory holding augmented images/labels to link into the
    /// training sets they derive from
    pub aug_sub_dir: Option<String>,
    pub mode: LinkMode,
    /// Glob pattern selecting image files, e.g. `*.nii*`
    pub file_pattern: String,
    pub val_fraction: f64,
    pub test_fraction: f64,
    pub seed: Option<u64>,
}

impl SplitOptions {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            n_splits: 5,
            out_dir: "views".to_string(),
            im_sub_dir: "images".to_string(),
            lab_sub_dir: "labels".to_string(),
            aug_sub_dir: None,
            mode: LinkMode::default(),
            file_pattern: "*.nii*".to_string(),
            val_fraction: 0.20,
            test_fraction: 0.20,
            seed: None,
        }
    }
}

/// What a completed run produced
#[derive(Debug, Clone)]
pub struct SplitReport {
    pub counts: SplitCounts,
    pub n_splits: usize,
    pub out_dir: PathBuf,
}

/// Split the dataset under `options.data_dir` and place every split on disk
pub fn run(options: &SplitOptions) -> Result<SplitReport> {
    let data_dir = std::path::absolute(&options.data_dir)?;
    let src_images = data_dir.join(&options.im_sub_dir);
    let src_labels = data_dir.join(&options.lab_sub_dir);
    for dir in [&data_dir, &src_images, &src_labels] {
        if !dir.is_dir() {
            return Err(SplitError::MissingDir(dir.clone()));
        }
    }
    let cv_dir = if options.n_splits > 1 {
        format!("{}_CV", options.n_splits)
    } else {
        "fixed_split".to_string()
    };
    let out_dir = data_dir.join(&options.out_dir).join(cv_dir);
    if out_dir.exists() {
        return Err(SplitError::OutDirExists(out_dir));
    }

    let pattern = glob_to_regex(&options.file_pattern)?;
    let images = discover(&src_images, &pattern)?;
    if images.is_empty() {
        return Err(SplitError::NoImagesMatched {
            dir: src_images,
            pattern: options.file_pattern.clone(),
        });
    }
    let counts = SplitCounts::compute(
        images.len(),
        options.n_splits,
        options.val_fraction,
        options.test_fraction,
    )?;

    let aug = match &options.aug_sub_dir {
        Some(sub) => {
            let aug_images_dir = data_dir.join(sub).join(&options.im_sub_dir);
            let aug_labels_dir = data_dir.join(sub).join(&options.lab_sub_dir);
            let aug_images = discover(&aug_images_dir, &pattern)?;
            let aug_labels = discover(&aug_labels_dir, &pattern)?;
            if aug_images.len() != aug_labels.len() {
                return Err(SplitError::AugCountMismatch {
                    images: aug_images.len(),
                    labels: aug_labels.len(),
                });
            }
            Some((aug_images_dir, aug_labels_dir, aug_images))
        }
        None => None,
    };

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let plans = plan_splits(images, counts, options.n_splits, &mut rng);

    info!(
        "creating {} split(s) under '{}' ({} placement)",
        plans.len(),
        out_dir.display(),
        options.mode
    );
    fs::create_dir_all(&out_dir)?;

    for (i, plan) in plans.iter().enumerate() {
        let split_dir = if options.n_splits > 1 {
            out_dir.join(format!("split_{i}"))
        } else {
            out_dir.clone()
        };
        debug!("materialising split {}/{}", i + 1, plans.len());
        materialize_split(
            plan,
            &split_dir,
            &src_images,
            &src_labels,
            &options.im_sub_dir,
            &options.lab_sub_dir,
            options.mode,
        )?;
        if let Some((aug_images_dir, aug_labels_dir, aug_images)) = &aug {
            let picked = select_augmented(aug_images, &plan.train);
            let dest = split_dir.join("aug");
            place_pairs(
                &picked,
                &dest.join(&options.im_sub_dir),
                &dest.join(&options.lab_sub_dir),
                aug_images_dir,
                aug_labels_dir,
                options.mode,
            )?;
        }
    }

    Ok(SplitReport {
        counts,
        n_splits: options.n_splits,
        out_dir,
    })
}

/// Translate a shell glob into an anchored regex: `*` matches any run of
/// characters, `?` a single character, everything else literally
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            _ => expr.push_str(&regex::escape(ch.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|source| SplitError::BadPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Files in `dir` whose name matches `pattern`, sorted by name
fn discover(dir: &Path, pattern: &Regex) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name() {
            if pattern.is_match(&name.to_string_lossy()) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}
