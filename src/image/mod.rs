//! Volumetric image handling: lazy NIfTI pairs, discovery and the bounded
//! load queue.
//!
//! The types here form a chain: [`ImagePair`] owns one image/label volume
//! and loads it lazily, [`ImagePairLoader`] discovers and pairs the files of
//! one dataset, and [`ImageQueue`] bounds how many of a loader's pairs sit
//! in memory at once while worker threads rotate the rest through.

mod error;
mod loader;
mod pair;
mod queue;
mod scaler;

pub use error::{ImageError, Result};
pub use loader::{ImagePairLoader, LoaderBuilder, PairHandle, LIST_OF_FILES};
pub use pair::{image_id, ImagePair, VolumeView};
pub use queue::{Checkout, ImageQueue, QueueError, DEFAULT_MAX_ACCESS};
pub use scaler::{FittedScaler, ScalerKind};
