//! HTTP request handlers for the photopost image API.
//!
//! # Endpoints
//!
//! - `GET /images/{folder_id}/{filename}?w={width}` - Serve an image, resized on demand
//! - `GET /health` - Health check with cache counters
//! - `POST /rebuild` - Rescan the watch directory and queue a site rebuild

use std::path::{Component, Path as FsPath};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, error, info, warn};

use crate::derivative::{CacheStats, DerivativeCache, DerivativeKind, Resizer};
use crate::error::{DerivativeError, ServeError};
use crate::site::{FolderScanner, MetadataStore, RebuildCoalescer, ScanReport};

/// Response header naming how the served file was obtained.
pub const X_DERIVATIVE: HeaderName = HeaderName::from_static("x-derivative");

/// Default Cache-Control max-age: 1 hour
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Default Retry-After for busy responses, in seconds
pub const DEFAULT_RETRY_AFTER: u32 = 5;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<R: Resizer> {
    /// The derivative cache
    pub cache: DerivativeCache<R>,

    /// Folder id lookup
    pub store: Arc<dyn MetadataStore>,

    /// Rebuild trigger, if a site builder is configured
    pub rebuild: Option<RebuildCoalescer>,

    /// Rescans the watch directory before each requested rebuild
    pub scanner: Option<FolderScanner>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Retry-After for busy responses, in seconds
    pub retry_after: u32,
}

impl<R: Resizer> AppState<R> {
    /// Create a new application state.
    pub fn new(cache: DerivativeCache<R>, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            cache,
            store,
            rebuild: None,
            scanner: None,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    /// Enable `POST /rebuild`.
    pub fn with_rebuild(mut self, rebuild: RebuildCoalescer) -> Self {
        self.rebuild = Some(rebuild);
        self
    }

    /// Rescan folders into the store before every `POST /rebuild`.
    pub fn with_scanner(mut self, scanner: FolderScanner) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Set the Cache-Control max-age.
    pub fn with_cache_max_age(mut self, cache_max_age: u32) -> Self {
        self.cache_max_age = cache_max_age;
        self
    }

    /// Set the Retry-After for busy responses.
    pub fn with_retry_after(mut self, retry_after: u32) -> Self {
        self.retry_after = retry_after;
        self
    }
}

impl<R: Resizer> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            store: Arc::clone(&self.store),
            rebuild: self.rebuild.clone(),
            scanner: self.scanner.clone(),
            cache_max_age: self.cache_max_age,
            retry_after: self.retry_after,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for image requests.
///
/// Extracted from: `/images/{folder_id}/{filename}`
#[derive(Debug, Deserialize)]
pub struct ImagePathParams {
    /// Folder id as recorded in the metadata store
    pub folder_id: String,

    /// File name inside the folder
    pub filename: String,
}

/// Query parameters for image requests.
///
/// `w` is kept as a string so malformed values produce a JSON 400 rather than
/// the extractor's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ImageQueryParams {
    /// Requested width in pixels; absent, empty or 0 means the original
    #[serde(default)]
    pub w: Option<String>,
}

impl ImageQueryParams {
    /// Parse the requested width.
    pub fn width(&self) -> Result<u32, ServeError> {
        match self.w.as_deref().map(str::trim) {
            None | Some("") => Ok(0),
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| ServeError::InvalidWidth(raw.to_string())),
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Standard error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "busy")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Create a new error response with status code.
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Derivative cache counters
    pub cache: CacheStats,

    /// Whether a site rebuild is running
    pub rebuilding: bool,
}

/// Response from the rebuild endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct RebuildResponse {
    /// Always "accepted"
    pub status: String,

    /// What the rescan changed, when a scanner is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanReport>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert ServeError to HTTP response.
///
/// This implementation logs errors appropriately based on their severity:
/// - 404s at DEBUG level (common and expected)
/// - other 4xx errors at WARN level
/// - 5xx errors at ERROR level
impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ServeError::InvalidWidth(_) => (StatusCode::BAD_REQUEST, "invalid_width"),
            ServeError::FolderNotFound(_) | ServeError::FileNotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            ServeError::RebuildDisabled => (StatusCode::NOT_FOUND, "rebuild_disabled"),
            ServeError::Busy { .. } => (StatusCode::TOO_MANY_REQUESTS, "busy"),
            ServeError::Derivative(failure) => match &failure.error {
                DerivativeError::InvalidArgument(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_argument")
                }
                DerivativeError::Busy => (StatusCode::TOO_MANY_REQUESTS, "busy"),
                DerivativeError::Decode { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "decode_error")
                }
                DerivativeError::Io { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            },
            ServeError::Read { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            ServeError::Scan(_) => (StatusCode::INTERNAL_SERVER_ERROR, "scan_error"),
        };
        let message = self.to_string();

        // Log errors based on severity
        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::TOO_MANY_REQUESTS {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "{}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let body = Json(ErrorResponse::with_status(error_type, message, status));

        if let ServeError::Busy { retry_after, .. } = self {
            return (
                status,
                [(header::RETRY_AFTER, retry_after.to_string())],
                body,
            )
                .into_response();
        }

        (status, body).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle image requests.
///
/// # Endpoint
///
/// `GET /images/{folder_id}/{filename}?w={width}`
///
/// # Response
///
/// - `200 OK`: the derivative, or the original when no width is requested,
///   the original is not wider, or it cannot be decoded
/// - `206 Partial Content` / `304 Not Modified`: conditional and range
///   requests on the chosen file
/// - `400 Bad Request`: `w` is not a non-negative integer
/// - `404 Not Found`: unknown folder or file
/// - `429 Too Many Requests`: resize pending, with `Retry-After`
/// - `500 Internal Server Error`: the derivative could not be written or read
///
/// # Headers
///
/// - `Content-Type` from the file extension
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Derivative: original|cached|adopted|resized|not-larger`
pub async fn image_handler<R: Resizer>(
    State(state): State<AppState<R>>,
    Path(params): Path<ImagePathParams>,
    Query(query): Query<ImageQueryParams>,
    headers: HeaderMap,
) -> Result<Response, ServeError> {
    let width = query.width()?;

    if !is_plain_file_name(&params.filename) {
        return Err(ServeError::FileNotFound(params.filename));
    }

    let folder = state
        .store
        .resolve_folder(&params.folder_id)
        .await
        .ok_or_else(|| ServeError::FolderNotFound(params.folder_id.clone()))?;

    let original = folder.join(&params.filename);
    let is_file = tokio::fs::metadata(&original)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ServeError::FileNotFound(params.filename));
    }

    let (path, kind) = match state.cache.get_derivative(&original, width).await {
        Ok(derivative) => (derivative.path, derivative.kind),
        Err(failure) => match failure.error {
            DerivativeError::Busy => {
                return Err(ServeError::Busy {
                    original: failure.original,
                    retry_after: state.retry_after,
                })
            }
            DerivativeError::Decode { .. } => {
                warn!(
                    original = %failure.original.display(),
                    error = %failure.error,
                    "Cannot resize, serving original"
                );
                (failure.original, DerivativeKind::Original)
            }
            _ => return Err(failure.into()),
        },
    };

    serve_file(&path, kind, state.cache_max_age, headers).await
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "cache": { "entries": 12, "in_flight": 0, "available_slots": 10, "max_concurrent": 10 },
///   "rebuilding": false
/// }
/// ```
pub async fn health_handler<R: Resizer>(State(state): State<AppState<R>>) -> Json<HealthResponse> {
    let rebuilding = match &state.rebuild {
        Some(rebuild) => rebuild.is_running().await,
        None => false,
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache: state.cache.stats().await,
        rebuilding,
    })
}

/// Handle rebuild requests.
///
/// # Endpoint
///
/// `POST /rebuild`
///
/// # Response
///
/// - `202 Accepted`: folders were rescanned and a rebuild is queued (or
///   folded into the running one)
/// - `404 Not Found`: no site builder is configured
/// - `500 Internal Server Error`: the rescan could not update the store
pub async fn rebuild_handler<R: Resizer>(
    State(state): State<AppState<R>>,
) -> Result<(StatusCode, Json<RebuildResponse>), ServeError> {
    let rebuild = state.rebuild.clone().ok_or(ServeError::RebuildDisabled)?;

    let scan = match &state.scanner {
        Some(scanner) => {
            let report = scanner.scan(state.store.as_ref()).await?;
            if report.changed() {
                info!(
                    added = report.added,
                    updated = report.updated,
                    removed = report.removed,
                    "Rescan before rebuild changed folders"
                );
            }
            Some(report)
        }
        None => None,
    };

    tokio::spawn(async move {
        let outcome = rebuild.trigger().await;
        debug!(?outcome, "Rebuild trigger finished");
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(RebuildResponse {
            status: "accepted".to_string(),
            scan,
        }),
    ))
}

// =============================================================================
// Helpers
// =============================================================================

/// URL of `filename` in folder `folder_id`, optionally at `width`.
pub fn image_url(folder_id: &str, filename: &str, width: Option<u32>) -> String {
    let base = format!(
        "/images/{}/{}",
        urlencoding::encode(folder_id),
        urlencoding::encode(filename)
    );
    match width {
        Some(w) => format!("{}?w={}", base, w),
        None => base,
    }
}

/// Whether `name` is a single, normal path component.
pub fn is_plain_file_name(name: &str) -> bool {
    if name.is_empty() || name.contains(['/', '\\']) {
        return false;
    }
    let mut components = FsPath::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Content type for a file, from its extension.
pub fn content_type_for(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

/// Stream `path` through [`ServeFile`], passing the request headers along so
/// range and conditional requests work, then stamp the photopost headers.
async fn serve_file(
    path: &FsPath,
    kind: DerivativeKind,
    cache_max_age: u32,
    headers: HeaderMap,
) -> Result<Response, ServeError> {
    let mut request = Request::new(Body::empty());
    *request.headers_mut() = headers;

    let mut response = match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };

    // The file went away between the lookup and the open
    if response.status() == StatusCode::NOT_FOUND {
        return Err(ServeError::Read {
            path: path.to_path_buf(),
            message: "file disappeared before it could be opened".to_string(),
        });
    }

    let out = response.headers_mut();
    out.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(path)),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", cache_max_age)) {
        out.insert(header::CACHE_CONTROL, value);
    }
    out.insert(X_DERIVATIVE, HeaderValue::from_static(kind.as_str()));

    Ok(response)
}

// =============================================================================
// Tests
// =============================================================================
