//! Bounded concurrent load queue over a set of image pairs.
//!
//! Datasets that do not fit in memory are served through an [`ImageQueue`]:
//! worker threads keep at most `capacity` pairs loaded, training code checks
//! pairs out at random, and pairs that have been served [`max
//! access`](DEFAULT_MAX_ACCESS) times rotate back to disk so the whole
//! dataset is visited over time. A checked-out pair is pinned; it is never
//! unloaded while a [`Checkout`] guard for it is alive.

use super::error::ImageError;
use super::pair::ImagePair;
use log::{debug, info, warn};
use rand::Rng;
use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use thiserror::Error;

/// Checkouts served from one load of a pair before it rotates out
pub const DEFAULT_MAX_ACCESS: usize = 50;

/// Consecutive load failures before a pair is abandoned
const MAX_LOAD_FAILURES: u32 = 3;

/// Callback run by worker threads when a pair enters or leaves memory
type Hook = Arc<dyn Fn(&ImagePair) -> Result<(), ImageError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Capacity outside `1..pairs.len()`; a queue over everything is a
    /// no-op and callers should load eagerly instead
    #[error("queue capacity {capacity} must be at least 1 and below the number of pairs ({total})")]
    InvalidCapacity { capacity: usize, total: usize },

    /// The queue was stopped while waiting
    #[error("image queue is stopped")]
    Stopped,

    /// Every pair failed to load repeatedly; nothing can ever be served
    #[error("all {0} pairs were abandoned after repeated load failures")]
    AllAbandoned(usize),

    /// More distinct pins requested than the capacity can hold at once
    #[error("cannot hold {requested} distinct pairs pinned with a capacity of {capacity}")]
    TooManyPins { requested: usize, capacity: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Waiting for a worker
    Pending,
    /// A worker is running the entry hook
    Loading,
    /// In memory and eligible for checkout
    Resident,
    /// Hit max access; leaves memory once its last pin drops
    Retiring,
    /// The exit hook is running
    Unloading,
    /// Gave up after repeated load failures
    Abandoned,
}

struct QueueState {
    slots: Vec<Slot>,
    pending: VecDeque<usize>,
    /// Indices eligible for checkout
    resident: Vec<usize>,
    pins: Vec<usize>,
    access: Vec<usize>,
    failures: Vec<u32>,
    /// Pairs currently in memory (resident, retiring or unloading)
    loaded: usize,
    /// Pairs currently inside the entry hook
    loading: usize,
    abandoned: usize,
    max_access: usize,
}

impl QueueState {
    fn new(n: usize) -> Self {
        Self {
            slots: vec![Slot::Pending; n],
            pending: (0..n).collect(),
            resident: Vec::with_capacity(n),
            pins: vec![0; n],
            access: vec![0; n],
            failures: vec![0; n],
            loaded: 0,
            loading: 0,
            abandoned: 0,
            max_access: DEFAULT_MAX_ACCESS,
        }
    }

    /// Memory slots in use; never exceeds the queue capacity
    fn occupied(&self) -> usize {
        self.loaded + self.loading
    }

    fn live(&self, total: usize) -> usize {
        total - self.abandoned
    }
}

struct Hooks {
    entry: Hook,
    exit: Hook,
}

struct QueueInner {
    pairs: Vec<Arc<ImagePair>>,
    capacity: usize,
    hooks: Mutex<Hooks>,
    state: Mutex<QueueState>,
    /// Signalled when a pair becomes resident or is abandoned
    resident_cv: Condvar,
    /// Signalled when pending work or a free slot appears
    work_cv: Condvar,
    stopped: AtomicBool,
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_hook(&self) -> Hook {
        Arc::clone(&self.hooks.lock().unwrap_or_else(PoisonError::into_inner).entry)
    }

    fn exit_hook(&self) -> Hook {
        Arc::clone(&self.hooks.lock().unwrap_or_else(PoisonError::into_inner).exit)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Bounded pool of loaded image pairs fed by background worker threads
pub struct ImageQueue {
    inner: Arc<QueueInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ImageQueue {
    /// Create a queue over `pairs` keeping at most `capacity` of them loaded.
    ///
    /// The capacity must be at least 1 and strictly below `pairs.len()`;
    /// datasets that fit in memory should be loaded eagerly instead.
    pub fn new(pairs: Vec<Arc<ImagePair>>, capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 || capacity >= pairs.len() {
            return Err(QueueError::InvalidCapacity {
                capacity,
                total: pairs.len(),
            });
        }
        let n = pairs.len();
        Ok(Self {
            inner: Arc::new(QueueInner {
                pairs,
                capacity,
                hooks: Mutex::new(Hooks {
                    entry: Arc::new(|pair: &ImagePair| pair.load()),
                    exit: Arc::new(|pair: &ImagePair| {
                        pair.unload();
                        Ok(())
                    }),
                }),
                state: Mutex::new(QueueState::new(n)),
                resident_cv: Condvar::new(),
                work_cv: Condvar::new(),
                stopped: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Change how many checkouts one load of a pair serves before rotation
    #[must_use]
    pub fn with_max_access(self, max_access: usize) -> Self {
        self.set_max_access(max_access);
        self
    }

    pub fn set_max_access(&self, max_access: usize) {
        self.inner.lock_state().max_access = max_access.max(1);
    }

    /// Replace the hook run when a pair enters memory. The default hook is
    /// [`ImagePair::load`]. Failing hooks are retried, so they must be
    /// idempotent.
    pub fn set_entry_hook<F>(&self, hook: F)
    where
        F: Fn(&ImagePair) -> Result<(), ImageError> + Send + Sync + 'static,
    {
        self.inner
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry = Arc::new(hook);
    }

    /// Replace the hook run when a pair leaves memory. The default hook is
    /// [`ImagePair::unload`].
    pub fn set_exit_hook<F>(&self, hook: F)
    where
        F: Fn(&ImagePair) -> Result<(), ImageError> + Send + Sync + 'static,
    {
        self.inner
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .exit = Arc::new(hook);
    }

    /// Spawn `n_threads` loader threads. Calling this on a queue that is
    /// already running is a no-op.
    pub fn start(&self, n_threads: usize) -> Result<(), QueueError> {
        if self.inner.is_stopped() {
            return Err(QueueError::Stopped);
        }
        let mut workers = self.lock_workers();
        if !workers.is_empty() {
            debug!("image queue already running");
            return Ok(());
        }
        info!(
            "starting image queue: capacity {} over {} pairs, {} loader threads",
            self.inner.capacity,
            self.inner.pairs.len(),
            n_threads.max(1)
        );
        for _ in 0..n_threads.max(1) {
            let inner = Arc::clone(&self.inner);
            workers.push(std::thread::spawn(move || worker_loop(&inner)));
        }
        Ok(())
    }

    /// Block until the loaded pool is full, then return the resident count.
    ///
    /// "Full" accounts for abandoned pairs: with `a` pairs abandoned the
    /// target shrinks to `min(capacity, len - a)`.
    pub fn await_full(&self) -> Result<usize, QueueError> {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        loop {
            if inner.is_stopped() {
                return Err(QueueError::Stopped);
            }
            let live = state.live(inner.pairs.len());
            if live == 0 {
                return Err(QueueError::AllAbandoned(inner.pairs.len()));
            }
            let target = inner.capacity.min(live);
            if state.resident.len() >= target {
                info!("image queue full: {} pairs resident", state.resident.len());
                return Ok(state.resident.len());
            }
            state = inner
                .resident_cv
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Check out a random resident pair, blocking until one is available.
    ///
    /// The returned guard pins the pair in memory. Dropping the guard checks
    /// the pair back in; if the pair retired while pinned, its exit hook runs
    /// at that point and it rejoins the pending pool.
    pub fn checkout<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Checkout, QueueError> {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        let index = loop {
            if inner.is_stopped() {
                return Err(QueueError::Stopped);
            }
            if state.live(inner.pairs.len()) == 0 {
                return Err(QueueError::AllAbandoned(inner.pairs.len()));
            }
            if !state.resident.is_empty() {
                let pick = rng.random_range(0..state.resident.len());
                let index = state.resident[pick];
                state.pins[index] += 1;
                state.access[index] += 1;
                if state.access[index] >= state.max_access {
                    state.resident.swap_remove(pick);
                    state.slots[index] = Slot::Retiring;
                    debug!(
                        "retiring '{}' after {} accesses",
                        inner.pairs[index].id(),
                        state.access[index]
                    );
                }
                break index;
            }
            state = inner
                .resident_cv
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        };
        Ok(Checkout {
            inner: Arc::clone(inner),
            index,
        })
    }

    /// Stop the workers and join them. Wakes every blocked caller with
    /// [`QueueError::Stopped`]. Safe to call more than once.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            // take the state lock so no waiter can re-check the flag
            // between our store and the notify
            let state = self.inner.lock_state();
            self.inner.work_cv.notify_all();
            self.inner.resident_cv.notify_all();
            drop(state);
        }
        let handles: Vec<_> = self.lock_workers().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        debug!("image queue stopped");
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Total number of registered pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.pairs.is_empty()
    }

    /// Pairs currently eligible for checkout
    #[must_use]
    pub fn n_resident(&self) -> usize {
        self.inner.lock_state().resident.len()
    }

    /// Pairs given up on after repeated load failures
    #[must_use]
    pub fn n_abandoned(&self) -> usize {
        self.inner.lock_state().abandoned
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ImageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageQueue")
            .field("pairs", &self.inner.pairs.len())
            .field("capacity", &self.inner.capacity)
            .field("stopped", &self.inner.is_stopped())
            .finish()
    }
}

impl Drop for ImageQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

/// RAII pin on a checked-out pair. Deref target is the pair itself.
pub struct Checkout {
    inner: Arc<QueueInner>,
    index: usize,
}

impl Checkout {
    #[must_use]
    pub fn pair(&self) -> &Arc<ImagePair> {
        &self.inner.pairs[self.index]
    }
}

impl Deref for Checkout {
    type Target = ImagePair;

    fn deref(&self) -> &ImagePair {
        &self.inner.pairs[self.index]
    }
}

impl fmt::Debug for Checkout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkout").field("id", &self.id()).finish()
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        let mut state = self.inner.lock_state();
        state.pins[self.index] -= 1;
        if state.pins[self.index] > 0 || state.slots[self.index] != Slot::Retiring {
            return;
        }
        if self.inner.is_stopped() {
            // workers are gone; leave the volume to its owner
            return;
        }
        // last pin on a retiree: run the exit hook outside the lock, then
        // reopen the slot
        state.slots[self.index] = Slot::Unloading;
        drop(state);

        let exit = self.inner.exit_hook();
        let pair = &self.inner.pairs[self.index];
        if let Err(err) = exit(pair) {
            warn!("exit hook failed for '{}': {err}", pair.id());
        }

        let mut state = self.inner.lock_state();
        state.loaded -= 1;
        state.access[self.index] = 0;
        state.slots[self.index] = Slot::Pending;
        state.pending.push_back(self.index);
        self.inner.work_cv.notify_one();
    }
}

fn worker_loop(inner: &QueueInner) {
    loop {
        let index = {
            let mut state = inner.lock_state();
            loop {
                if inner.is_stopped() {
                    return;
                }
                if state.occupied() < inner.capacity {
                    if let Some(index) = state.pending.pop_front() {
                        state.slots[index] = Slot::Loading;
                        state.loading += 1;
                        break index;
                    }
                }
                state = inner
                    .work_cv
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let entry = inner.entry_hook();
        let pair = &inner.pairs[index];
        let outcome = entry(pair);

        let mut state = inner.lock_state();
        state.loading -= 1;
        match outcome {
            Ok(()) => {
                state.slots[index] = Slot::Resident;
                state.loaded += 1;
                state.access[index] = 0;
                state.failures[index] = 0;
                state.resident.push(index);
                debug!("loaded '{}' ({} resident)", pair.id(), state.resident.len());
                inner.resident_cv.notify_all();
            }
            Err(err) => {
                state.failures[index] += 1;
                if state.failures[index] >= MAX_LOAD_FAILURES {
                    warn!(
                        "giving up on '{}' after {} failed loads: {err}",
                        pair.id(),
                        state.failures[index]
                    );
                    state.slots[index] = Slot::Abandoned;
                    state.abandoned += 1;
                    // waiters must re-check the shrunken target
                    inner.resident_cv.notify_all();
                } else {
                    warn!(
                        "failed to load '{}' (attempt {}): {err}",
                        pair.id(),
                        state.failures[index]
                    );
                    state.slots[index] = Slot::Pending;
                    state.pending.push_back(index);
                }
                inner.work_cv.notify_one();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::AtomicUsize;

    fn synthetic_pairs(n: usize) -> Vec<Arc<ImagePair>> {
        (0..n)
            .map(|i| Arc::new(ImagePair::new(format!("pair_{i}.nii.gz"), None)))
            .collect()
    }

    fn install_volume(pair: &ImagePair) -> Result<(), ImageError> {
        pair.insert_volume(ArrayD::from_elem(vec![2, 2, 2], 1.0), None, [1.0; 3])
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_capacity_bounds_are_enforced() {
        let err = ImageQueue::new(synthetic_pairs(4), 0).unwrap_err();
        assert!(matches!(err, QueueError::InvalidCapacity { .. }));
        let err = ImageQueue::new(synthetic_pairs(4), 4).unwrap_err();
        assert!(matches!(err, QueueError::InvalidCapacity { capacity: 4, total: 4 }));
        assert!(ImageQueue::new(synthetic_pairs(4), 3).is_ok());
    }

    #[test]
    fn test_await_full_fills_to_capacity() {
        let pairs = synthetic_pairs(5);
        let queue = ImageQueue::new(pairs.clone(), 2).unwrap();
        queue.set_entry_hook(install_volume);
        queue.start(2).unwrap();
        let resident = queue.await_full().unwrap();
        assert_eq!(resident, 2);
        let loaded = pairs.iter().filter(|p| p.is_loaded()).count();
        assert_eq!(loaded, 2);
        queue.stop();
    }

    #[test]
    fn test_checkout_returns_pinned_loaded_pair() {
        let queue = ImageQueue::new(synthetic_pairs(3), 2).unwrap();
        queue.set_entry_hook(install_volume);
        queue.start(1).unwrap();
        queue.await_full().unwrap();
        let mut rng = rng();
        let out = queue.checkout(&mut rng).unwrap();
        assert!(out.is_loaded());
        assert_eq!(out.view().unwrap().shape(), &[2, 2, 2]);
        drop(out);
        queue.stop();
    }

    #[test]
    fn test_rotation_swaps_pairs_after_max_access() {
        let queue = ImageQueue::new(synthetic_pairs(2), 1)
            .unwrap()
            .with_max_access(1);
        queue.set_entry_hook(install_volume);
        queue.start(1).unwrap();
        queue.await_full().unwrap();

        let mut rng = rng();
        let first = queue.checkout(&mut rng).unwrap();
        let first_id = first.id().to_string();
        let retired = Arc::clone(first.pair());
        // retired on checkout, but pinned: stays loaded
        assert!(first.is_loaded());
        drop(first);
        // the exit hook runs in the guard's drop, on this thread
        assert!(!retired.is_loaded());

        let second = queue.checkout(&mut rng).unwrap();
        assert_ne!(second.id(), first_id);
        drop(second);
        queue.stop();
    }

    #[test]
    fn test_exit_hook_runs_on_rotation() {
        let unloads = Arc::new(AtomicUsize::new(0));
        let queue = ImageQueue::new(synthetic_pairs(3), 1)
            .unwrap()
            .with_max_access(1);
        queue.set_entry_hook(install_volume);
        let counter = Arc::clone(&unloads);
        queue.set_exit_hook(move |pair| {
            pair.unload();
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        queue.start(1).unwrap();
        queue.await_full().unwrap();

        let mut rng = rng();
        for _ in 0..3 {
            drop(queue.checkout(&mut rng).unwrap());
        }
        // with max_access 1, every drop retired its pair and ran the hook
        assert_eq!(unloads.load(Ordering::SeqCst), 3);
        queue.stop();
    }

    #[test]
    fn test_failing_pair_is_abandoned_and_skipped() {
        let queue = ImageQueue::new(synthetic_pairs(3), 2)
            .unwrap()
            .with_max_access(1);
        queue.set_entry_hook(|pair| {
            if pair.id() == "pair_0" {
                Err(ImageError::NotLoaded(pair.id().to_string()))
            } else {
                install_volume(pair)
            }
        });
        queue.start(1).unwrap();
        assert_eq!(queue.await_full().unwrap(), 2);

        // a full pool never retries a failed pair; every rotation reopens a
        // slot and gives the worker another attempt at pair_0
        let mut rng = rng();
        while queue.n_abandoned() == 0 {
            let out = queue.checkout(&mut rng).unwrap();
            assert_ne!(out.id(), "pair_0");
            drop(out);
        }

        // the pool refills from the two loadable pairs alone
        assert_eq!(queue.await_full().unwrap(), 2);
        queue.stop();
    }

    #[test]
    fn test_all_pairs_abandoned_is_an_error() {
        let queue = ImageQueue::new(synthetic_pairs(2), 1).unwrap();
        queue.set_entry_hook(|pair| Err(ImageError::NotLoaded(pair.id().to_string())));
        queue.start(1).unwrap();
        let err = queue.await_full().unwrap_err();
        assert!(matches!(err, QueueError::AllAbandoned(2)));
        let mut rng = rng();
        assert!(matches!(
            queue.checkout(&mut rng),
            Err(QueueError::AllAbandoned(2))
        ));
        queue.stop();
    }

    #[test]
    fn test_stopped_queue_rejects_callers() {
        let queue = ImageQueue::new(synthetic_pairs(3), 1).unwrap();
        queue.set_entry_hook(install_volume);
        queue.start(1).unwrap();
        queue.stop();
        assert!(matches!(queue.await_full(), Err(QueueError::Stopped)));
        let mut rng = rng();
        assert!(matches!(queue.checkout(&mut rng), Err(QueueError::Stopped)));
        assert!(matches!(queue.start(1), Err(QueueError::Stopped)));
        // stopping again is fine
        queue.stop();
    }

    #[test]
    fn test_start_twice_is_a_noop() {
        let queue = ImageQueue::new(synthetic_pairs(3), 2).unwrap();
        queue.set_entry_hook(install_volume);
        queue.start(2).unwrap();
        queue.start(2).unwrap();
        queue.await_full().unwrap();
        queue.stop();
    }

    #[test]
    fn test_loaded_count_never_exceeds_capacity() {
        let capacity = 3;
        let gauge = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let queue = Arc::new(
            ImageQueue::new(synthetic_pairs(6), capacity)
                .unwrap()
                .with_max_access(5),
        );
        let g = Arc::clone(&gauge);
        let p = Arc::clone(&peak);
        queue.set_entry_hook(move |pair| {
            let now = g.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            install_volume(pair)
        });
        let g = Arc::clone(&gauge);
        queue.set_exit_hook(move |pair| {
            pair.unload();
            g.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });
        queue.start(3).unwrap();
        queue.await_full().unwrap();

        let consumers: Vec<_> = (0..4)
            .map(|seed| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    for _ in 0..50 {
                        let out = queue.checkout(&mut rng).unwrap();
                        assert!(out.is_loaded());
                        let _ = out.view().unwrap().image()[[0, 0, 0]];
                    }
                })
            })
            .collect();
        for c in consumers {
            c.join().unwrap();
        }
        queue.stop();
        assert!(
            peak.load(Ordering::SeqCst) <= capacity,
            "peak loaded {} exceeded capacity {capacity}",
            peak.load(Ordering::SeqCst)
        );
    }
}
