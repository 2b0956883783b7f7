//! HTTP server layer for photopost.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        GET /images/{folder_id}/{filename}?w={width}             │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │           routes            │  │
//! │  │ (image, health, rebuild) │  │ (router config, site files) │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    content_type_for, health_handler, image_handler, image_url, is_plain_file_name,
    rebuild_handler, AppState, ErrorResponse, HealthResponse, ImagePathParams, ImageQueryParams,
    RebuildResponse, DEFAULT_CACHE_MAX_AGE, DEFAULT_RETRY_AFTER, X_DERIVATIVE,
};
pub use routes::{create_router, RouterConfig};
