//! Discovery and pairing of image/label volumes on disk.
//!
//! An [`ImagePairLoader`] scans an `images` sub-directory for NIfTI files,
//! derives the matching label path for each by swapping the sub-directory
//! component, and exposes the result as a list of shared [`ImagePair`]s.
//! Attaching a load queue (`set_queue`) switches random access from direct
//! indexing to queue checkouts so only a bounded number of volumes is in
//! memory at once.

use super::error::{ImageError, Result};
use super::pair::ImagePair;
use super::queue::{Checkout, ImageQueue, QueueError};
use super::scaler::ScalerKind;
use log::{info, warn};
use rand::Rng;
use std::ops::Deref;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

/// File-list fallback consumed when an images directory holds no volumes
pub const LIST_OF_FILES: &str = "LIST_OF_FILES.txt";

/// Configures an [`ImagePairLoader`] before discovery runs
#[derive(Debug, Clone)]
pub struct LoaderBuilder {
    base_dir: PathBuf,
    img_subdir: String,
    label_subdir: String,
    sample_weight: f32,
    predict_mode: bool,
}

impl LoaderBuilder {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            img_subdir: "images".to_string(),
            label_subdir: "labels".to_string(),
            sample_weight: 1.0,
            predict_mode: false,
        }
    }

    #[must_use]
    pub fn img_subdir(mut self, name: impl Into<String>) -> Self {
        self.img_subdir = name.into();
        self
    }

    #[must_use]
    pub fn label_subdir(mut self, name: impl Into<String>) -> Self {
        self.label_subdir = name.into();
        self
    }

    /// Weight attached to every sample drawn from this dataset
    #[must_use]
    pub fn sample_weight(mut self, weight: f32) -> Self {
        self.sample_weight = weight;
        self
    }

    /// Skip label pairing entirely; pairs carry images only
    #[must_use]
    pub fn predict_mode(mut self, predict: bool) -> Self {
        self.predict_mode = predict;
        self
    }

    /// Run discovery and pairing
    pub fn build(self) -> Result<ImagePairLoader> {
        let images_dir = self.base_dir.join(&self.img_subdir);
        let image_paths = discover_images(&images_dir)?;

        let mut pairs = Vec::with_capacity(image_paths.len());
        for image_path in image_paths {
            let label_path = if self.predict_mode {
                None
            } else {
                let label = swap_sub_dir(&image_path, &self.img_subdir, &self.label_subdir)?;
                if !label.exists() {
                    return Err(ImageError::MissingLabel { expected: label });
                }
                Some(label)
            };
            pairs.push(Arc::new(
                ImagePair::new(image_path, label_path).with_sample_weight(self.sample_weight),
            ));
        }

        info!(
            "found {} image pair(s) under '{}'{}",
            pairs.len(),
            images_dir.display(),
            if self.predict_mode { " (predict mode)" } else { "" }
        );
        Ok(ImagePairLoader {
            base_dir: self.base_dir,
            predict_mode: self.predict_mode,
            pairs,
            queue: None,
        })
    }
}

/// An ordered collection of shared image pairs, optionally served through a
/// bounded load queue
#[derive(Debug)]
pub struct ImagePairLoader {
    base_dir: PathBuf,
    predict_mode: bool,
    pairs: Vec<Arc<ImagePair>>,
    queue: Option<ImageQueue>,
}

impl ImagePairLoader {
    /// Discover pairs under `base_dir` with the default `images` / `labels`
    /// sub-directories
    pub fn from_dir(base_dir: impl Into<PathBuf>) -> Result<Self> {
        LoaderBuilder::new(base_dir).build()
    }

    /// An empty loader for manual assembly via [`add_image`](Self::add_image)
    #[must_use]
    pub fn empty(predict_mode: bool) -> Self {
        Self {
            base_dir: PathBuf::new(),
            predict_mode,
            pairs: Vec::new(),
            queue: None,
        }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[must_use]
    pub fn predict_mode(&self) -> bool {
        self.predict_mode
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[must_use]
    pub fn pairs(&self) -> &[Arc<ImagePair>] {
        &self.pairs
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<ImagePair>> {
        self.pairs.iter()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<ImagePair>> {
        self.pairs.get(index)
    }

    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<&Arc<ImagePair>> {
        self.pairs.iter().find(|p| p.id() == id)
    }

    /// Append a manually constructed pair.
    ///
    /// Pairs added after a queue was attached are not visible to the queue.
    pub fn add_image(&mut self, pair: ImagePair) {
        if self.queue.is_some() {
            warn!(
                "adding image '{}' after the queue was attached; it will not be queued",
                pair.id()
            );
        }
        self.pairs.push(Arc::new(pair));
    }

    /// Merge another loader's pairs into this one
    pub fn add_images(&mut self, other: ImagePairLoader) {
        if self.queue.is_some() {
            warn!("merging loaders after the queue was attached; new pairs will not be queued");
        }
        self.pairs.extend(other.pairs);
    }

    /// Attach a bounded load queue keeping at most `max_load` pairs in
    /// memory.
    ///
    /// A `max_load` of zero or one covering the whole dataset disables
    /// queueing; the loader then behaves as if every pair were loadable
    /// directly.
    pub fn set_queue(&mut self, max_load: usize) -> Result<()> {
        if max_load == 0 || max_load >= self.pairs.len() {
            info!(
                "max load {} covers all {} images; load queue disabled",
                max_load,
                self.pairs.len()
            );
            return Ok(());
        }
        info!("using max load {max_load} over {} images", self.pairs.len());
        self.queue = Some(ImageQueue::new(self.pairs.clone(), max_load)?);
        Ok(())
    }

    #[must_use]
    pub fn queue(&self) -> Option<&ImageQueue> {
        self.queue.as_ref()
    }

    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.queue.is_some()
    }

    /// Draw one random pair, loaded and pinned when a queue is attached
    pub fn get_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<PairHandle> {
        match &self.queue {
            Some(queue) => Ok(PairHandle::Queued(queue.checkout(rng)?)),
            None => {
                if self.pairs.is_empty() {
                    return Err(ImageError::NoPairs);
                }
                let index = rng.random_range(0..self.pairs.len());
                Ok(PairHandle::Direct(Arc::clone(&self.pairs[index])))
            }
        }
    }

    /// Draw `n` random pairs. With `unique`, every returned pair is
    /// distinct; through a queue this pins them all at once, so `n` must not
    /// exceed the queue capacity.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        n: usize,
        unique: bool,
    ) -> Result<Vec<PairHandle>> {
        if unique && n > self.pairs.len() {
            return Err(ImageError::SampleTooLarge {
                requested: n,
                available: self.pairs.len(),
            });
        }
        if let Some(queue) = &self.queue {
            if n > queue.capacity() {
                return Err(QueueError::TooManyPins {
                    requested: n,
                    capacity: queue.capacity(),
                }
                .into());
            }
            let mut handles: Vec<PairHandle> = Vec::with_capacity(n);
            while handles.len() < n {
                let out = queue.checkout(rng)?;
                if unique && handles.iter().any(|h| h.id() == out.id()) {
                    continue;
                }
                handles.push(PairHandle::Queued(out));
            }
            return Ok(handles);
        }
        if self.pairs.is_empty() {
            return Err(ImageError::NoPairs);
        }
        let handles = if unique {
            rand::seq::index::sample(rng, self.pairs.len(), n)
                .into_iter()
                .map(|i| PairHandle::Direct(Arc::clone(&self.pairs[i])))
                .collect()
        } else {
            (0..n)
                .map(|_| {
                    let i = rng.random_range(0..self.pairs.len());
                    PairHandle::Direct(Arc::clone(&self.pairs[i]))
                })
                .collect()
        };
        Ok(handles)
    }

    /// Load every pair (eagerly, or via the queue's entry hook) and fit the
    /// given intensity scaler on each image
    pub fn prepare(&self, scaler: ScalerKind) -> Result<()> {
        match &self.queue {
            Some(queue) => {
                queue.set_entry_hook(move |pair| {
                    pair.load()?;
                    pair.apply_scaler(scaler)?;
                    Ok(())
                });
                Ok(())
            }
            None => {
                for pair in &self.pairs {
                    if !pair.is_loaded() {
                        pair.load()?;
                        pair.apply_scaler(scaler)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Balanced per-class weights over every label volume: `total / (classes
    /// * count)`, zero for classes that never occur.
    ///
    /// Loads pairs as needed; with `unload_after` each pair is unloaded once
    /// counted.
    pub fn get_class_weights(&self, unload_after: bool) -> Result<Vec<f32>> {
        if self.predict_mode {
            return Err(ImageError::PredictMode);
        }
        if self.pairs.is_empty() {
            return Err(ImageError::NoPairs);
        }
        let mut counts: Vec<u64> = Vec::new();
        for pair in &self.pairs {
            pair.load()?;
            {
                let view = pair.view()?;
                let labels = view
                    .labels()
                    .ok_or_else(|| ImageError::UnlabeledImage(pair.id().to_string()))?;
                for &class in labels {
                    let class = class as usize;
                    if class >= counts.len() {
                        counts.resize(class + 1, 0);
                    }
                    counts[class] += 1;
                }
            }
            if unload_after {
                pair.unload();
            }
        }
        let total: u64 = counts.iter().sum();
        let n_classes = counts.len() as f64;
        let weights: Vec<f32> = counts
            .iter()
            .map(|&c| {
                if c == 0 {
                    0.0
                } else {
                    (total as f64 / (n_classes * c as f64)) as f32
                }
            })
            .collect();
        info!("class weights over {} pairs: {weights:?}", self.pairs.len());
        Ok(weights)
    }

    /// Largest physical axis extent across all pairs, loading them as needed
    pub fn max_real_extent(&self) -> Result<f32> {
        if self.pairs.is_empty() {
            return Err(ImageError::NoPairs);
        }
        let mut max = 0.0f32;
        for pair in &self.pairs {
            pair.load()?;
            for extent in pair.real_extent()? {
                max = max.max(extent);
            }
        }
        Ok(max)
    }
}

impl<'a> IntoIterator for &'a ImagePairLoader {
    type Item = &'a Arc<ImagePair>;
    type IntoIter = std::slice::Iter<'a, Arc<ImagePair>>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

/// A drawn pair: either a plain shared reference or a queue checkout that
/// pins its pair in memory while held
#[derive(Debug)]
pub enum PairHandle {
    Direct(Arc<ImagePair>),
    Queued(Checkout),
}

impl Deref for PairHandle {
    type Target = ImagePair;

    fn deref(&self) -> &ImagePair {
        match self {
            PairHandle::Direct(pair) => pair,
            PairHandle::Queued(out) => out,
        }
    }
}

fn discover_images(images_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if images_dir.is_dir() {
        for entry in std::fs::read_dir(images_dir)? {
            let path = entry?.path();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if path.is_file() && (name.ends_with(".nii") || name.ends_with(".nii.gz")) {
                found.push(path);
            }
        }
    }
    found.sort();
    if !found.is_empty() {
        return Ok(found);
    }

    // fall back to an explicit file list, as written by `cv-split --file-list`
    let list_path = images_dir.join(LIST_OF_FILES);
    if list_path.is_file() {
        let listed = std::fs::read_to_string(&list_path)?;
        for line in listed.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let path = PathBuf::from(line);
            if !path.exists() {
                return Err(ImageError::MissingListedFile(path));
            }
            found.push(path);
        }
        found.sort();
    }
    if found.is_empty() {
        return Err(ImageError::EmptyImageDir(images_dir.to_path_buf()));
    }
    Ok(found)
}

/// Derive a sibling path by swapping one path component, e.g. `images` for
/// `labels`
fn swap_sub_dir(path: &Path, from: &str, to: &str) -> Result<PathBuf> {
    let needle = format!("{MAIN_SEPARATOR}{from}{MAIN_SEPARATOR}");
    let replacement = format!("{MAIN_SEPARATOR}{to}{MAIN_SEPARATOR}");
    let text = path.to_string_lossy();
    if !text.contains(&needle) {
        return Err(ImageError::SubDirNotInPath {
            path: path.to_path_buf(),
            sub_dir: from.to_string(),
        });
    }
    Ok(PathBuf::from(text.replace(&needle, &replacement)))
}
