use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while looking up or generating an image derivative.
///
/// Derivative results are shared between every requester attached to the
/// same in-flight job, so the error is `Clone` and carries messages rather
/// than source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DerivativeError {
    /// Bad key inputs (empty path, no file name, zero width)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The source image is corrupt or in an unsupported format
    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// Reading the source or writing the derivative failed
    #[error("I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// No resize slot was free; the work continues in the background
    #[error("Too many concurrent resizes, derivative is being processed")]
    Busy,
}

impl DerivativeError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        DerivativeError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        DerivativeError::Decode {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Whether this is the backpressure signal rather than a real failure.
    pub fn is_busy(&self) -> bool {
        matches!(self, DerivativeError::Busy)
    }
}

/// A derivative lookup that did not produce a ready derivative.
///
/// Carries the original path so the caller can decide whether to serve the
/// original or surface the error.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct DerivativeFailure {
    /// The original, unresized file
    pub original: PathBuf,

    /// What went wrong
    pub error: DerivativeError,
}

/// Errors from the folder metadata store
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Reading or writing the store file failed
    #[error("Metadata store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store file could not be (de)serialized
    #[error("Metadata store is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from a site builder run
#[derive(Debug, Clone, Error)]
pub enum RebuildError {
    /// The builder process could not be started
    #[error("Failed to start builder {program}: {message}")]
    Spawn { program: String, message: String },

    /// The builder exited unsuccessfully
    #[error("Builder exited with {status}")]
    Failed { status: String },

    /// The builder ran past its time limit and was killed
    #[error("Builder timed out after {seconds}s")]
    TimedOut { seconds: u64 },

    /// The builder task panicked
    #[error("Builder task panicked: {0}")]
    Panicked(String),
}

/// Errors returned by the image endpoint
#[derive(Debug, Error)]
pub enum ServeError {
    /// The `w` query parameter is not a non-negative integer
    #[error("Invalid width parameter: {0}")]
    InvalidWidth(String),

    /// The folder id is not known to the metadata store
    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    /// The folder exists but the requested file does not
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// No resize slot was free; the client should retry
    #[error("Derivative of {original} is being processed, retry in {retry_after}s")]
    Busy { original: PathBuf, retry_after: u32 },

    /// The cache could not produce a derivative
    #[error(transparent)]
    Derivative(#[from] DerivativeFailure),

    /// Reading the file to serve failed
    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// No site builder is configured
    #[error("Rebuilds are not enabled")]
    RebuildDisabled,

    /// The rescan before a rebuild failed
    #[error("Folder scan failed: {0}")]
    Scan(#[from] MetadataError),
}
