//! Router configuration for photopost.
//!
//! # Route Structure
//!
//! ```text
//! /health                               - Health check
//! /images/{folder_id}/{filename}?w=N    - Image endpoint
//! /rebuild                              - Queue a site rebuild (POST)
//! /*                                    - Built site (when a site dir is configured)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use photopost::derivative::{CacheConfig, DerivativeCache, ImageResizer};
//! use photopost::server::{create_router, AppState, RouterConfig};
//!
//! let cache = DerivativeCache::open(CacheConfig::new("/var/cache/photopost"), ImageResizer::new()).await?;
//! let state = AppState::new(cache, store);
//!
//! let config = RouterConfig::new()
//!     .with_site_dir("/srv/site/public")
//!     .with_retry_after(10);
//!
//! let router = create_router(state, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::handlers::{
    health_handler, image_handler, rebuild_handler, AppState, DEFAULT_CACHE_MAX_AGE,
    DEFAULT_RETRY_AFTER,
};
use crate::derivative::Resizer;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Retry-After for busy responses, in seconds
    pub retry_after: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Built site served for every other path
    pub site_dir: Option<PathBuf>,
}

impl RouterConfig {
    /// Create a new router configuration.
    ///
    /// By default:
    /// - CORS allows any origin
    /// - Cache max-age is 1 hour (3600 seconds)
    /// - Retry-After is 5 seconds
    /// - Tracing is enabled
    /// - No static site is served
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            retry_after: DEFAULT_RETRY_AFTER,
            enable_tracing: true,
            site_dir: None,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Set the Cache-Control max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    /// Set the Retry-After for busy responses.
    pub fn with_retry_after(mut self, seconds: u32) -> Self {
        self.retry_after = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Serve the built site from `dir` for all other paths.
    pub fn with_site_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.site_dir = Some(dir.into());
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router.
///
/// Router-level settings in `config` (max-age, Retry-After) override the ones
/// on `state`.
pub fn create_router<R: Resizer>(state: AppState<R>, config: RouterConfig) -> Router {
    let state = state
        .with_cache_max_age(config.cache_max_age)
        .with_retry_after(config.retry_after);

    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler::<R>))
        .route("/images/{folder_id}/{filename}", get(image_handler::<R>))
        .route("/rebuild", post(rebuild_handler::<R>))
        .with_state(state);

    let router = match &config.site_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    let router = router.layer(cors);

    // Add tracing if enabled
    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
