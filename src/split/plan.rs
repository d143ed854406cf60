//! Shuffling and partitioning of image paths into per-split sets.

use super::counts::SplitCounts;
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::PathBuf;

/// The image paths assigned to one split
#[derive(Debug, Clone)]
pub struct SplitPlan {
    pub test: Vec<PathBuf>,
    pub val: Vec<PathBuf>,
    pub train: Vec<PathBuf>,
}

/// Chunk a slice into `n_chunks` nearly equal parts, the first
/// `items.len() % n_chunks` parts one element larger
pub fn chunk_evenly<T>(items: &[T], n_chunks: usize) -> Vec<&[T]> {
    assert!(n_chunks > 0, "cannot chunk into zero parts");
    let base = items.len() / n_chunks;
    let remainder = items.len() % n_chunks;
    let mut chunks = Vec::with_capacity(n_chunks);
    let mut start = 0;
    for i in 0..n_chunks {
        let len = base + usize::from(i < remainder);
        chunks.push(&items[start..start + len]);
        start += len;
    }
    chunks
}

/// Partition shuffled images into `n_splits` plans.
///
/// Under cross-validation each part serves as the test set of one split and
/// the remaining parts are reshuffled before validation images are drawn, so
/// the test sets tile the dataset while validation draws vary per split.
/// `counts` must come from [`SplitCounts::compute`] over the same image count.
pub fn plan_splits(
    mut images: Vec<PathBuf>,
    counts: SplitCounts,
    n_splits: usize,
    rng: &mut impl Rng,
) -> Vec<SplitPlan> {
    images.shuffle(rng);

    if n_splits <= 1 {
        let mut remaining = images.split_off(counts.n_test);
        remaining.shuffle(rng);
        let train = remaining.split_off(counts.n_val);
        return vec![SplitPlan {
            test: images,
            val: remaining,
            train,
        }];
    }

    let parts = chunk_evenly(&images, n_splits);
    let mut plans = Vec::with_capacity(n_splits);
    for i in 0..n_splits {
        let test = parts[i].to_vec();
        let mut remaining: Vec<PathBuf> = parts
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .flat_map(|(_, part)| part.iter().cloned())
            .collect();
        remaining.shuffle(rng);
        let train = remaining.split_off(counts.n_val);
        plans.push(SplitPlan {
            test,
            val: remaining,
            train,
        });
    }
    plans
}
