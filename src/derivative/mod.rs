//! On-demand image derivative cache.
//!
//! Maps (original file, requested width) to a resized copy on disk, resizing
//! at most once per key at a time and never queuing unbounded work.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            DerivativeCache              │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │DerivativeIdx │  │ in-flight jobs  │  │
//! │  │ (key -> file │  │ (one ResizeJob  │  │
//! │  │  + created)  │  │  per key)       │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │  bounded by a semaphore
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           Resizer (ImageResizer)        │
//! └────────────────────┬────────────────────┘
//!                      ▼
//!          {cache_dir}/{key}, cache.json
//! ```
//!
//! # Components
//!
//! - [`DerivativeCache`]: Entry point; lookup, resize scheduling, sweep, snapshots
//! - [`DerivativeKey`]: Stable key for an (original, width) pair
//! - [`DerivativeIndex`]: In-memory map of finished derivatives
//! - [`ResizeJob`]: Shared promise for a pending resize
//! - [`Resizer`] / [`ImageResizer`]: The resize engine

mod index;
mod job;
mod key;
mod resize;
mod service;

pub use index::{CacheEntry, DerivativeIndex, SNAPSHOT_FILE_NAME};
pub use job::{JobResult, ResizeJob};
pub use key::{derive_key, derive_path, extension_of, DerivativeKey};
pub use resize::{
    resize_image, target_dimensions, ImageResizer, ResizeOutcome, Resizer, RESIZE_FILTER,
};
pub use service::{
    CacheConfig, CacheStats, Derivative, DerivativeCache, DerivativeKind, SweepReport,
    DEFAULT_CACHE_TTL, DEFAULT_JOB_GRACE, DEFAULT_MAX_CONCURRENT_RESIZES,
    DEFAULT_SNAPSHOT_INTERVAL, DEFAULT_SWEEP_INTERVAL,
};
