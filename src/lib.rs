//! # photopost
//!
//! Turns folders of photos and videos into static-site posts and serves
//! resized copies of the images on demand.
//!
//! ## Features
//!
//! - **On-demand derivatives**: `?w=N` yields a cached, width-bounded copy,
//!   resized at most once per key at a time
//! - **Backpressure**: a fixed number of resize slots; overflow gets a
//!   non-blocking "busy" answer instead of a queue
//! - **Self-healing cache**: expired, deleted or outdated derivatives are
//!   rebuilt transparently, and the index survives restarts
//! - **Coalesced rebuilds**: bursts of change triggers collapse into one
//!   site build plus at most one follow-up
//!
//! ## Architecture
//!
//! - [`derivative`] - Derivative cache, keys, index and the resize engine
//! - [`site`] - Folder metadata store, folder scan and rebuild coalescer
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//! - [`error`] - Error types for each layer
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use photopost::{
//!     create_router, AppState, CacheConfig, DerivativeCache, ImageResizer, JsonMetadataStore,
//!     RouterConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(JsonMetadataStore::open("/srv/photos", "photopost.json").await?);
//!     let cache = DerivativeCache::open(CacheConfig::new("cache"), ImageResizer::new()).await?;
//!
//!     let router = create_router(AppState::new(cache, store), RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod derivative;
pub mod error;
pub mod server;
pub mod site;

// Re-export commonly used types
pub use config::{Cli, Command, ServeConfig, SweepConfig};
pub use derivative::{
    derive_key, derive_path, CacheConfig, CacheStats, Derivative, DerivativeCache,
    DerivativeIndex, DerivativeKey, DerivativeKind, ImageResizer, ResizeJob, ResizeOutcome,
    Resizer, SweepReport,
};
pub use error::{DerivativeError, DerivativeFailure, MetadataError, RebuildError, ServeError};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use site::{
    folder_id, scan_folders, CommandBuilder, FolderRecord, FolderScanner, JsonMetadataStore,
    MetadataStore, RebuildCoalescer, RebuildOutcome, ScanReport, SiteBuilder,
};
