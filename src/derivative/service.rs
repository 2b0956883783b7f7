//! Derivative cache service.
//!
//! [`DerivativeCache`] is the entry point for derivative lookups. It owns the
//! index, the in-flight job table, the resize limiter and the resizer, and
//! reconciles them with the cache directory on disk.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        DerivativeCache                           │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                    get_derivative()                        │  │
//! │  │  1. width 0 -> original    3. adopt fresh file on disk      │  │
//! │  │  2. check index           4. attach to / start a job       │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! │        │                  │                     │                │
//! │        ▼                  ▼                     ▼                │
//! │ ┌───────────────┐  ┌──────────────┐   ┌─────────────────────┐    │
//! │ │DerivativeIndex│  │ in-flight    │   │ Semaphore + Resizer │    │
//! │ └───────────────┘  │ ResizeJobs   │   └─────────────────────┘    │
//! │                    └──────────────┘                              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Backpressure
//!
//! Resizes are bounded by a semaphore. A request that cannot get a slot
//! immediately is answered with [`DerivativeError::Busy`] and the original
//! path; the resize keeps waiting for a slot in the background so a retry
//! shortly after is served from the cache. A request never waits on a resize
//! started by someone else.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::{watch, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{DerivativeError, DerivativeFailure};

use super::index::{CacheEntry, DerivativeIndex, SNAPSHOT_FILE_NAME};
use super::job::{JobResult, ResizeJob};
use super::key::DerivativeKey;
use super::resize::{ResizeOutcome, Resizer};

/// Default number of resizes allowed to run at once
pub const DEFAULT_MAX_CONCURRENT_RESIZES: usize = 10;

/// Default derivative lifetime: 7 days
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default interval between expiry sweeps: 10 minutes
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default interval between index snapshots: 10 minutes
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default time a finished job stays visible to late duplicates
pub const DEFAULT_JOB_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// Configuration
// =============================================================================

/// Settings for a [`DerivativeCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding derivatives and the index snapshot
    pub cache_dir: PathBuf,

    /// Maximum age of a derivative
    pub ttl: Duration,

    /// Maximum number of concurrent resizes
    pub max_concurrent: usize,

    /// How long a finished job stays in the in-flight table
    pub job_grace: Duration,

    /// Interval between expiry sweeps
    pub sweep_interval: Duration,

    /// Interval between index snapshots
    pub snapshot_interval: Duration,
}

impl CacheConfig {
    /// Create a config with default settings for `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ttl: DEFAULT_CACHE_TTL,
            max_concurrent: DEFAULT_MAX_CONCURRENT_RESIZES,
            job_grace: DEFAULT_JOB_GRACE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }

    /// Set the derivative lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the number of concurrent resizes (at least 1).
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Set the grace window for finished jobs.
    pub fn with_job_grace(mut self, grace: Duration) -> Self {
        self.job_grace = grace;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the snapshot interval.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Location of the index snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.cache_dir.join(SNAPSHOT_FILE_NAME)
    }
}

// =============================================================================
// Results
// =============================================================================

/// How a derivative lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativeKind {
    /// No width was requested
    Original,

    /// Found in the index
    Cached,

    /// Found on disk and added to the index
    Adopted,

    /// Produced by a resize
    Resized,

    /// The original is not wider than the requested width
    NotLarger,
}

impl DerivativeKind {
    /// Short name, used in the `X-Derivative` response header.
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivativeKind::Original => "original",
            DerivativeKind::Cached => "cached",
            DerivativeKind::Adopted => "adopted",
            DerivativeKind::Resized => "resized",
            DerivativeKind::NotLarger => "not-larger",
        }
    }
}

/// A ready file to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
    /// File to serve (the derivative, or the original)
    pub path: PathBuf,

    /// How it was obtained
    pub kind: DerivativeKind,
}

impl Derivative {
    fn new(path: impl Into<PathBuf>, kind: DerivativeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// What an expiry sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired index entries removed
    pub expired: usize,

    /// Unreferenced files removed from the cache directory
    pub orphans: usize,

    /// Files that could not be deleted
    pub errors: usize,
}

/// Point-in-time counters for the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries in the index
    pub entries: usize,

    /// Jobs in the in-flight table, including finished ones in their grace window
    pub in_flight: usize,

    /// Free resize slots
    pub available_slots: usize,

    /// Total resize slots
    pub max_concurrent: usize,
}

// =============================================================================
// Derivative Cache
// =============================================================================

struct Shared<R: Resizer> {
    config: CacheConfig,
    index: DerivativeIndex,
    jobs: RwLock<HashMap<String, Arc<ResizeJob>>>,
    limiter: Arc<Semaphore>,
    resizer: Arc<R>,
}

/// On-demand derivative cache.
///
/// Cheap to clone; clones share all state.
///
/// # Type Parameters
///
/// * `R` - The resize engine (normally [`ImageResizer`](super::ImageResizer))
///
/// # Example
///
/// ```ignore
/// use photopost::derivative::{CacheConfig, DerivativeCache, ImageResizer};
///
/// let cache = DerivativeCache::open(CacheConfig::new("/var/cache/photopost"), ImageResizer::new()).await?;
///
/// match cache.get_derivative(Path::new("/photos/trip/IMG_0042.jpg"), 800).await {
///     Ok(derivative) => serve(&derivative.path),
///     Err(failure) if failure.error.is_busy() => retry_later(&failure.original),
///     Err(failure) => return Err(failure.into()),
/// }
/// ```
pub struct DerivativeCache<R: Resizer> {
    shared: Arc<Shared<R>>,
}

impl<R: Resizer> Clone for DerivativeCache<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: Resizer> DerivativeCache<R> {
    /// Open a cache, creating the cache directory and restoring the index
    /// snapshot if one exists.
    ///
    /// An unreadable snapshot is logged and ignored; files on disk are still
    /// adopted as they are requested.
    pub async fn open(config: CacheConfig, resizer: R) -> Result<Self, DerivativeError> {
        tokio::fs::create_dir_all(&config.cache_dir)
            .await
            .map_err(|e| DerivativeError::io(&config.cache_dir, e))?;

        let snapshot = config.snapshot_path();
        let index = match DerivativeIndex::load(&snapshot).await {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cache snapshot");
                DerivativeIndex::new()
            }
        };

        let entries = index.len().await;
        info!(
            cache_dir = %config.cache_dir.display(),
            entries,
            max_concurrent = config.max_concurrent,
            "Derivative cache opened"
        );

        Ok(Self::with_index(config, resizer, index))
    }

    /// Create a cache around an existing index without touching the disk.
    pub fn with_index(config: CacheConfig, resizer: R, index: DerivativeIndex) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            shared: Arc::new(Shared {
                config,
                index,
                jobs: RwLock::new(HashMap::new()),
                limiter,
                resizer: Arc::new(resizer),
            }),
        }
    }

    /// The cache settings.
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Get the file to serve for `original` at `width`.
    ///
    /// `Ok` means the returned path is ready to serve. `Err` carries the
    /// original path and why no derivative is available: [`DerivativeError::Busy`]
    /// when the resize is pending, or the resize error.
    pub async fn get_derivative(
        &self,
        original: &Path,
        width: u32,
    ) -> Result<Derivative, DerivativeFailure> {
        let fail = |error: DerivativeError| DerivativeFailure {
            original: original.to_path_buf(),
            error,
        };

        if width == 0 {
            return Ok(Derivative::new(original, DerivativeKind::Original));
        }

        let key = DerivativeKey::derive(original, width).map_err(fail)?;
        let destination = key.path_in(&self.shared.config.cache_dir);
        let original_mtime = modified(original).await;

        if let Some(derivative) = self.shared.lookup(&key, original_mtime).await {
            return Ok(derivative);
        }

        if let Some(derivative) = self
            .shared
            .adopt(&key, original, &destination, original_mtime)
            .await
        {
            return Ok(derivative);
        }

        let job = {
            let mut jobs = self.shared.jobs.write().await;

            if let Some(existing) = jobs.get(key.as_str()).cloned() {
                match existing.outcome() {
                    None => {
                        debug!(key = %key, "Resize already pending");
                        return Err(fail(DerivativeError::Busy));
                    }
                    Some(Err(e)) => return Err(fail(e)),
                    Some(Ok(derivative)) if derivative.kind == DerivativeKind::NotLarger => {
                        return Ok(derivative);
                    }
                    // A finished resize is observed through the index below
                    Some(Ok(_)) => {
                        jobs.remove(key.as_str());
                    }
                }
            }

            // The job for this key may have finished and left the table since
            // the first lookup
            if let Some(derivative) = self.shared.lookup(&key, original_mtime).await {
                return Ok(derivative);
            }

            let job = Arc::new(ResizeJob::new());
            jobs.insert(key.to_string(), Arc::clone(&job));
            job
        };

        let permit = Arc::clone(&self.shared.limiter).try_acquire_owned().ok();
        let immediate = permit.is_some();

        tokio::spawn(Arc::clone(&self.shared).run_job(
            key.clone(),
            Arc::clone(&job),
            original.to_path_buf(),
            destination,
            width,
            permit,
        ));

        if !immediate {
            debug!(key = %key, "No resize slot free, resizing in background");
            return Err(fail(DerivativeError::Busy));
        }

        job.wait().await.map_err(fail)
    }

    /// Remove expired derivatives and unreferenced files older than the TTL.
    ///
    /// Deletion failures are logged and counted; the sweep always runs to the
    /// end.
    pub async fn sweep(&self) -> SweepReport {
        let config = &self.shared.config;
        let mut report = SweepReport::default();

        let expired = self.shared.index.drain_expired(config.ttl).await;
        for entry in expired {
            match remove_if_present(&entry.path).await {
                Ok(()) => report.expired += 1,
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Failed to delete expired derivative");
                    report.errors += 1;
                }
            }
        }

        let referenced = self.shared.index.referenced_paths().await;
        let mut dir = match tokio::fs::read_dir(&config.cache_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(cache_dir = %config.cache_dir.display(), error = %e, "Failed to scan cache directory");
                report.errors += 1;
                return report;
            }
        };

        let now = SystemTime::now();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read cache directory entry");
                    report.errors += 1;
                    break;
                }
            };

            let path = entry.path();
            if is_reserved(&entry.file_name().to_string_lossy()) || referenced.contains(&path) {
                continue;
            }

            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age <= config.ttl {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => report.orphans += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to delete orphaned derivative");
                    report.errors += 1;
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                expired = report.expired,
                orphans = report.orphans,
                errors = report.errors,
                "Cache sweep finished"
            );
        }

        report
    }

    /// Write the index snapshot. Returns the number of entries written.
    pub async fn save_snapshot(&self) -> Result<usize, DerivativeError> {
        self.shared
            .index
            .save(&self.shared.config.snapshot_path())
            .await
    }

    /// Current counters.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.shared.index.len().await,
            in_flight: self.shared.jobs.read().await.len(),
            available_slots: self.shared.limiter.available_permits(),
            max_concurrent: self.shared.config.max_concurrent,
        }
    }

    /// Start the background task that sweeps and snapshots on their
    /// intervals.
    ///
    /// The task stops when `shutdown` turns `true` (or its sender is dropped)
    /// and writes a final snapshot before exiting.
    pub fn spawn_maintenance(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let cache = self.clone();

        tokio::spawn(async move {
            let config = cache.config();
            let mut sweep = ticker(config.sweep_interval);
            let mut snapshot = ticker(config.snapshot_interval);

            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        cache.sweep().await;
                    }
                    _ = snapshot.tick() => {
                        cache.write_snapshot().await;
                    }
                    _ = stop_requested(&mut shutdown) => break,
                }
            }

            cache.write_snapshot().await;
            debug!("Cache maintenance stopped");
        })
    }

    async fn write_snapshot(&self) {
        match self.save_snapshot().await {
            Ok(count) => debug!(entries = count, "Cache snapshot written"),
            Err(e) => warn!(error = %e, "Failed to write cache snapshot"),
        }
    }
}

impl<R: Resizer> Shared<R> {
    /// Index lookup with lazy eviction of expired, missing or stale entries.
    async fn lookup(
        &self,
        key: &DerivativeKey,
        original_mtime: Option<SystemTime>,
    ) -> Option<Derivative> {
        let entry = self.index.get(key).await?;

        let expired = entry.is_expired(self.config.ttl, SystemTime::now());
        let stale = original_mtime.is_some_and(|m| entry.created_at < m);
        let present = tokio::fs::try_exists(&entry.path).await.unwrap_or(false);

        if !expired && !stale && present {
            return Some(Derivative::new(entry.path, DerivativeKind::Cached));
        }

        debug!(key = %key, expired, stale, present, "Evicting derivative entry");
        self.index.remove(key).await;
        None
    }

    /// Adopt a derivative file left on disk (e.g. from before a restart).
    async fn adopt(
        &self,
        key: &DerivativeKey,
        original: &Path,
        destination: &Path,
        original_mtime: Option<SystemTime>,
    ) -> Option<Derivative> {
        let file_mtime = modified(destination).await?;

        let age = SystemTime::now()
            .duration_since(file_mtime)
            .unwrap_or_default();
        if age > self.config.ttl || original_mtime.is_some_and(|m| file_mtime < m) {
            return None;
        }

        self.index
            .insert(key, CacheEntry::new(original, destination))
            .await;
        debug!(key = %key, "Adopted derivative from disk");
        Some(Derivative::new(destination, DerivativeKind::Adopted))
    }

    /// Body of a resize job. Runs detached so a dropped request cannot cancel
    /// it.
    async fn run_job(
        self: Arc<Self>,
        key: DerivativeKey,
        job: Arc<ResizeJob>,
        original: PathBuf,
        destination: PathBuf,
        width: u32,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let permit = match permit {
            Some(permit) => Some(permit),
            None => Arc::clone(&self.limiter).acquire_owned().await.ok(),
        };

        let result = match permit {
            Some(_) => self.resize(&key, &original, &destination, width).await,
            None => Err(DerivativeError::Busy),
        };
        drop(permit);

        match &result {
            Ok(derivative) => {
                debug!(key = %key, kind = derivative.kind.as_str(), "Resize job finished")
            }
            Err(e) => warn!(key = %key, error = %e, "Resize job failed"),
        }
        job.complete(result);

        if !self.config.job_grace.is_zero() {
            tokio::time::sleep(self.config.job_grace).await;
        }

        let mut jobs = self.jobs.write().await;
        if jobs
            .get(key.as_str())
            .is_some_and(|current| Arc::ptr_eq(current, &job))
        {
            jobs.remove(key.as_str());
        }
    }

    /// Resize into a partial file, rename it into place and index it.
    async fn resize(
        &self,
        key: &DerivativeKey,
        original: &Path,
        destination: &Path,
        width: u32,
    ) -> JobResult {
        let partial = key.partial_path_in(&self.config.cache_dir);

        let resizer = Arc::clone(&self.resizer);
        let source = original.to_path_buf();
        let target = partial.clone();
        let outcome = tokio::task::spawn_blocking(move || resizer.resize(&source, &target, width))
            .await
            .map_err(|e| DerivativeError::io(original, format!("resize task failed: {}", e)))
            .and_then(|result| result);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        match outcome {
            ResizeOutcome::NotLarger { source_width } => {
                debug!(key = %key, source_width, "Original not wider than requested width");
                Ok(Derivative::new(original, DerivativeKind::NotLarger))
            }
            ResizeOutcome::Resized { width, height } => {
                if let Err(e) = tokio::fs::rename(&partial, destination).await {
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(DerivativeError::io(destination, e));
                }

                self.index
                    .insert(key, CacheEntry::new(original, destination))
                    .await;
                info!(key = %key, width, height, "Derivative created");
                Ok(Derivative::new(destination, DerivativeKind::Resized))
            }
        }
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Interval whose first tick is one period away. Zero periods are clamped.
fn ticker(period: Duration) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Resolves once `shutdown` is `true` or its sender is gone. The borrowed
/// value is dropped here so the caller's future stays `Send`.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Files in the cache directory that are never derivatives: the snapshot,
/// its temporary file and hidden partial files.
fn is_reserved(name: &str) -> bool {
    name.starts_with('.') || name.starts_with(SNAPSHOT_FILE_NAME)
}

// =============================================================================
// Tests
// =============================================================================
