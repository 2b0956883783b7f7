//! Configuration management for photopost.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `PHOTOPOST_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use photopost::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Serve(config) => println!("Listening on {}", config.bind_address()),
//!     Command::Sweep(config) => println!("Sweeping {}", config.cache_dir.display()),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `PHOTOPOST_HOST` - Server bind address (default: 0.0.0.0)
//! - `PHOTOPOST_PORT` - Server port (default: 8080)
//! - `PHOTOPOST_WATCH_DIR` - Directory of photo folders (required)
//! - `PHOTOPOST_CACHE_DIR` - Derivative cache directory (default: cache)
//! - `PHOTOPOST_METADATA` - Folder metadata file (default: photopost.json)
//! - `PHOTOPOST_SITE_DIR` - Built site to serve and build into
//! - `PHOTOPOST_BUILDER` - Site generator binary
//! - `PHOTOPOST_SITE_SOURCE` - Generator source directory (default: watch dir)
//! - `PHOTOPOST_CACHE_TTL` - Derivative lifetime in seconds (default: 7 days)
//! - `PHOTOPOST_MAX_RESIZES` - Concurrent resize limit (default: 10)
//! - `PHOTOPOST_JOB_GRACE_MS` - Finished-job visibility in ms (default: 2000)
//! - `PHOTOPOST_SWEEP_INTERVAL` - Expiry sweep period in seconds (default: 600)
//! - `PHOTOPOST_SNAPSHOT_INTERVAL` - Index snapshot period in seconds (default: 600)
//! - `PHOTOPOST_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `PHOTOPOST_RETRY_AFTER` - Retry-After on busy responses (default: 5)
//! - `PHOTOPOST_SETTLE_DELAY` - Rebuild settle delay in seconds (default: 5)
//! - `PHOTOPOST_BUILD_TIMEOUT` - Site build time limit in seconds (default: 600)
//! - `PHOTOPOST_CORS_ORIGINS` - Allowed CORS origins, comma-separated
//! - `PHOTOPOST_PHOTO_EXTENSIONS` / `PHOTOPOST_VIDEO_EXTENSIONS` - Media extensions

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::derivative::{
    CacheConfig, DEFAULT_CACHE_TTL, DEFAULT_JOB_GRACE, DEFAULT_MAX_CONCURRENT_RESIZES,
    DEFAULT_SNAPSHOT_INTERVAL, DEFAULT_SWEEP_INTERVAL,
};
use crate::server::{DEFAULT_CACHE_MAX_AGE, DEFAULT_RETRY_AFTER};
use crate::site::{DEFAULT_BUILD_TIMEOUT, DEFAULT_SETTLE_DELAY};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default derivative cache directory.
pub const DEFAULT_CACHE_DIR: &str = "cache";

/// Default folder metadata file.
pub const DEFAULT_METADATA_PATH: &str = "photopost.json";

/// Default photo extensions.
pub const DEFAULT_PHOTO_EXTENSIONS: &str = "jpg,jpeg,png,gif,webp,tif,tiff";

/// Default video extensions.
pub const DEFAULT_VIDEO_EXTENSIONS: &str = "mp4,mov,webm";

// =============================================================================
// CLI Arguments
// =============================================================================

/// photopost - folders of photos in, static photo posts out.
///
/// Serves resized image derivatives on demand and keeps a static site in
/// step with a watched directory.
#[derive(Parser, Debug, Clone)]
#[command(name = "photopost")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Consume the parsed arguments and return the selected command.
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scan the watch directory, serve images and the built site.
    Serve(ServeConfig),

    /// Run one expiry sweep over the derivative cache and exit.
    Sweep(SweepConfig),
}

/// Options for `photopost serve`.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "PHOTOPOST_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PHOTOPOST_PORT")]
    pub port: u16,

    // =========================================================================
    // Directories
    // =========================================================================
    /// Directory whose sub-folders become posts.
    #[arg(long, env = "PHOTOPOST_WATCH_DIR")]
    pub watch_dir: PathBuf,

    /// Directory for resized derivatives and the index snapshot.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "PHOTOPOST_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// File the folder metadata store is persisted to.
    #[arg(long, default_value = DEFAULT_METADATA_PATH, env = "PHOTOPOST_METADATA")]
    pub metadata: PathBuf,

    /// Built site directory. Served for all non-API paths and used as the
    /// builder's destination.
    #[arg(long, env = "PHOTOPOST_SITE_DIR")]
    pub site_dir: Option<PathBuf>,

    // =========================================================================
    // Site Builder
    // =========================================================================
    /// Site generator binary, run as `{builder} --source S --destination D`.
    ///
    /// Rebuilds are disabled when not set.
    #[arg(long, env = "PHOTOPOST_BUILDER")]
    pub builder: Option<PathBuf>,

    /// Source directory handed to the builder (defaults to the watch dir).
    #[arg(long, env = "PHOTOPOST_SITE_SOURCE")]
    pub site_source: Option<PathBuf>,

    /// Quiet period before a rebuild starts, in seconds.
    #[arg(long, default_value_t = DEFAULT_SETTLE_DELAY.as_secs(), env = "PHOTOPOST_SETTLE_DELAY")]
    pub settle_delay: u64,

    /// Time limit for one site build, in seconds.
    #[arg(long, default_value_t = DEFAULT_BUILD_TIMEOUT.as_secs(), env = "PHOTOPOST_BUILD_TIMEOUT")]
    pub build_timeout: u64,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// How long a derivative stays valid, in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_TTL.as_secs(), env = "PHOTOPOST_CACHE_TTL")]
    pub cache_ttl: u64,

    /// Maximum number of resizes running at once.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_RESIZES, env = "PHOTOPOST_MAX_RESIZES")]
    pub max_resizes: usize,

    /// How long a finished resize job stays visible, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_JOB_GRACE.as_millis() as u64, env = "PHOTOPOST_JOB_GRACE_MS")]
    pub job_grace_ms: u64,

    /// Expiry sweep period, in seconds.
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs(), env = "PHOTOPOST_SWEEP_INTERVAL")]
    pub sweep_interval: u64,

    /// Index snapshot period, in seconds.
    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_INTERVAL.as_secs(), env = "PHOTOPOST_SNAPSHOT_INTERVAL")]
    pub snapshot_interval: u64,

    // =========================================================================
    // HTTP Behaviour
    // =========================================================================
    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "PHOTOPOST_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Retry-After sent with busy responses, in seconds.
    #[arg(long, default_value_t = DEFAULT_RETRY_AFTER, env = "PHOTOPOST_RETRY_AFTER")]
    pub retry_after: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "PHOTOPOST_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Media Types
    // =========================================================================
    /// Photo file extensions (comma-separated).
    #[arg(
        long,
        default_value = DEFAULT_PHOTO_EXTENSIONS,
        env = "PHOTOPOST_PHOTO_EXTENSIONS",
        value_delimiter = ','
    )]
    pub photo_extensions: Vec<String>,

    /// Video file extensions (comma-separated).
    #[arg(
        long,
        default_value = DEFAULT_VIDEO_EXTENSIONS,
        env = "PHOTOPOST_VIDEO_EXTENSIONS",
        value_delimiter = ','
    )]
    pub video_extensions: Vec<String>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.watch_dir.as_os_str().is_empty() {
            return Err(
                "Watch directory is required. Set --watch-dir or PHOTOPOST_WATCH_DIR".to_string(),
            );
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err("cache_dir must not be empty".to_string());
        }

        if self.builder.is_some() && self.site_dir.is_none() {
            return Err(
                "A site builder needs a destination. Set --site-dir or PHOTOPOST_SITE_DIR"
                    .to_string(),
            );
        }

        if self.max_resizes == 0 {
            return Err("max_resizes must be greater than 0".to_string());
        }
        if self.cache_ttl == 0 {
            return Err("cache_ttl must be greater than 0".to_string());
        }
        if self.sweep_interval == 0 {
            return Err("sweep_interval must be greater than 0".to_string());
        }
        if self.snapshot_interval == 0 {
            return Err("snapshot_interval must be greater than 0".to_string());
        }
        if self.build_timeout == 0 {
            return Err("build_timeout must be greater than 0".to_string());
        }

        if self.media_extensions().is_empty() {
            return Err("At least one photo or video extension is required".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Photo and video extensions together, blanks removed.
    pub fn media_extensions(&self) -> Vec<String> {
        self.photo_extensions
            .iter()
            .chain(&self.video_extensions)
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect()
    }

    /// Source directory for the site builder.
    pub fn site_source(&self) -> PathBuf {
        self.site_source
            .clone()
            .unwrap_or_else(|| self.watch_dir.clone())
    }

    /// Derivative cache settings.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(&self.cache_dir)
            .with_ttl(Duration::from_secs(self.cache_ttl))
            .with_max_concurrent(self.max_resizes)
            .with_job_grace(Duration::from_millis(self.job_grace_ms))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval))
            .with_snapshot_interval(Duration::from_secs(self.snapshot_interval))
    }
}

/// Options for `photopost sweep`.
#[derive(Args, Debug, Clone)]
pub struct SweepConfig {
    /// Directory holding the derivatives and the index snapshot.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "PHOTOPOST_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// How long a derivative stays valid, in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_TTL.as_secs(), env = "PHOTOPOST_CACHE_TTL")]
    pub cache_ttl: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl SweepConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err("cache_dir must not be empty".to_string());
        }
        if self.cache_ttl == 0 {
            return Err("cache_ttl must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Derivative cache settings.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(&self.cache_dir).with_ttl(Duration::from_secs(self.cache_ttl))
    }
}

// =============================================================================
// Tests
// =============================================================================
