//! Test utilities for integration tests.
//!
//! Builds a watch directory of real PNG files in a temp dir, registers its
//! folders in an in-memory metadata store and wires everything into a router.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::{Rgb, RgbImage};
use tempfile::TempDir;

use photopost::derivative::{ImageResizer, ResizeOutcome, Resizer};
use photopost::error::{DerivativeError, RebuildError};
use photopost::site::{FolderRecord, JsonMetadataStore, MetadataStore, SiteBuilder};
use photopost::{create_router, AppState, CacheConfig, DerivativeCache, RouterConfig};

/// Width of the generated test photo.
pub const PHOTO_WIDTH: u32 = 64;

/// Height of the generated test photo.
pub const PHOTO_HEIGHT: u32 = 32;

// =============================================================================
// Image Helpers
// =============================================================================

/// Write a gradient PNG of `width` x `height` to `path`.
pub fn write_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 4 % 256) as u8, (y * 8 % 256) as u8, 128])
    });
    img.save(path).unwrap();
}

/// Decode a response body and return its dimensions.
pub fn image_dimensions(bytes: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(bytes).expect("body should be an image");
    (img.width(), img.height())
}

// =============================================================================
// Library Fixture
// =============================================================================

/// A photo library on disk: `watch/trip/photo.png`, a corrupt
/// `watch/trip/broken.jpg`, and an empty cache directory.
pub struct Library {
    pub dir: TempDir,
    pub watch: PathBuf,
    pub cache_dir: PathBuf,
    pub folder: PathBuf,
    pub folder_id: String,
    pub store: Arc<JsonMetadataStore>,
}

impl Library {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let watch = dir.path().join("watch");
        let cache_dir = dir.path().join("cache");
        let folder = watch.join("trip");

        write_png(&folder.join("photo.png"), PHOTO_WIDTH, PHOTO_HEIGHT);
        std::fs::write(folder.join("broken.jpg"), b"definitely not a jpeg").unwrap();

        let store = Arc::new(JsonMetadataStore::in_memory(&watch));
        let record = FolderRecord::new(&watch, &folder, 2).unwrap();
        let folder_id = record.id.clone();
        store.record_folder(record).await.unwrap();

        Self {
            dir,
            watch,
            cache_dir,
            folder,
            folder_id,
            store,
        }
    }

    /// Path of a file in the test folder.
    pub fn original(&self, name: &str) -> PathBuf {
        self.folder.join(name)
    }

    /// Image endpoint URI for a file in the test folder.
    pub fn uri(&self, name: &str, query: &str) -> String {
        if query.is_empty() {
            format!("/images/{}/{}", self.folder_id, name)
        } else {
            format!("/images/{}/{}?{}", self.folder_id, name, query)
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(&self.cache_dir).with_job_grace(Duration::from_millis(50))
    }

    /// Open a cache over this library's cache directory.
    pub async fn cache<R: Resizer>(&self, config: CacheConfig, resizer: R) -> DerivativeCache<R> {
        DerivativeCache::open(config, resizer).await.unwrap()
    }

    /// State with the real resizer and default settings.
    pub async fn state(&self) -> AppState<ImageResizer> {
        let cache = self.cache(self.cache_config(), ImageResizer::new()).await;
        self.state_with(cache)
    }

    pub fn state_with<R: Resizer>(&self, cache: DerivativeCache<R>) -> AppState<R> {
        let store: Arc<dyn MetadataStore> = self.store.clone();
        AppState::new(cache, store)
    }

    /// Router with the real resizer and tracing disabled.
    pub async fn router(&self) -> Router {
        create_router(self.state().await, RouterConfig::new().with_tracing(false))
    }
}

// =============================================================================
// Request Helpers
// =============================================================================

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// =============================================================================
// Slow Resizer
// =============================================================================

/// A [`Resizer`] that copies the source after a delay and records activity.
#[derive(Clone)]
pub struct SlowResizer {
    delay: Duration,
    calls: Arc<AtomicUsize>,
    started: Arc<AtomicBool>,
}

impl SlowResizer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl Resizer for SlowResizer {
    fn resize(
        &self,
        source: &Path,
        destination: &Path,
        width: u32,
    ) -> Result<ResizeOutcome, DerivativeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        std::thread::sleep(self.delay);

        std::fs::copy(source, destination)
            .map_err(|e| DerivativeError::Io {
                path: destination.to_path_buf(),
                message: e.to_string(),
            })?;

        Ok(ResizeOutcome::Resized { width, height: 1 })
    }
}

// =============================================================================
// Counting Site Builder
// =============================================================================

/// A [`SiteBuilder`] that only counts how often it ran.
#[derive(Clone, Default)]
pub struct CountingBuilder {
    runs: Arc<AtomicUsize>,
}

impl CountingBuilder {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SiteBuilder for CountingBuilder {
    async fn build(&self) -> Result<(), RebuildError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
