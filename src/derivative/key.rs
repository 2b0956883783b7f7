//! Cache key and path scheme for derivatives.
//!
//! A derivative is identified by the original file's path and the requested
//! width. The key is built from:
//! - the first 64 bits of SHA-256 over the containing directory (keeps keys
//!   short and stops same-named files in different folders from colliding)
//! - the file name without its extension
//! - the width
//! - the original's extension, lowercased
//!
//! The key doubles as the derivative's file name, so `IMG_1.jpg` and
//! `IMG_1.png` in one folder never share an index entry or a resize job.
//!
//! ```text
//! /photos/2024/trip/IMG_0042.JPG @ 800  ->  3f5c0a9e71b2d4c8_IMG_0042_800.jpg
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::DerivativeError;

/// Number of hash bytes kept for the directory component (64 bits).
const DIR_HASH_BYTES: usize = 8;

/// Stable identifier for an (original, width) pair.
///
/// The key is both the index map key and the file name in the cache
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivativeKey {
    name: String,
    stem_len: usize,
}

impl DerivativeKey {
    /// Derive the key for `original` at `width`.
    ///
    /// # Errors
    ///
    /// Returns [`DerivativeError::InvalidArgument`] for an empty path, a path
    /// without a file name, or a zero width.
    pub fn derive(original: &Path, width: u32) -> Result<Self, DerivativeError> {
        if original.as_os_str().is_empty() {
            return Err(DerivativeError::InvalidArgument(
                "original path is empty".to_string(),
            ));
        }
        if width == 0 {
            return Err(DerivativeError::InvalidArgument(
                "width must be greater than 0".to_string(),
            ));
        }

        let stem = original
            .file_stem()
            .map(|s| s.to_string_lossy())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                DerivativeError::InvalidArgument(format!(
                    "path has no file name: {}",
                    original.display()
                ))
            })?;

        let dir = original.parent().unwrap_or_else(|| Path::new(""));
        let digest = Sha256::digest(dir.to_string_lossy().as_bytes());
        let dir_hash = hex::encode(&digest[..DIR_HASH_BYTES]);

        let stem = format!("{}_{}_{}", dir_hash, stem, width);
        Ok(Self {
            stem_len: stem.len(),
            name: format!("{}{}", stem, extension_of(original)),
        })
    }

    /// The key as a string: the derivative's file name.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// The key without the extension.
    pub fn stem(&self) -> &str {
        &self.name[..self.stem_len]
    }

    /// The lowercased extension, with its dot, or empty.
    pub fn extension(&self) -> &str {
        &self.name[self.stem_len..]
    }

    /// Final location of this derivative inside `cache_dir`.
    pub fn path_in(&self, cache_dir: &Path) -> PathBuf {
        cache_dir.join(&self.name)
    }

    /// Temporary location a resize writes to before renaming into place.
    ///
    /// The leading dot keeps partial files out of adoption and sweeps; the
    /// extension is kept so the encoder can pick the output format.
    pub fn partial_path_in(&self, cache_dir: &Path) -> PathBuf {
        cache_dir.join(format!(".{}.partial{}", self.stem(), self.extension()))
    }
}

impl fmt::Display for DerivativeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<DerivativeKey> for String {
    fn from(key: DerivativeKey) -> Self {
        key.name
    }
}

/// Derive the key for `original` at `width`.
///
/// Shorthand for [`DerivativeKey::derive`].
pub fn derive_key(original: &Path, width: u32) -> Result<DerivativeKey, DerivativeError> {
    DerivativeKey::derive(original, width)
}

/// Location of the derivative for `key` in `cache_dir` with the given
/// original extension (lowercased, with its dot).
///
/// For the original the key was derived from this is `key.path_in(cache_dir)`.
pub fn derive_path(cache_dir: &Path, key: &DerivativeKey, original_ext: &str) -> PathBuf {
    cache_dir.join(format!("{}{}", key.stem(), normalize_extension(original_ext)))
}

/// Lowercase extension of `path` including the leading dot, or an empty
/// string when there is none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| normalize_extension(&e.to_string_lossy()))
        .unwrap_or_default()
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim_start_matches('.');
    if ext.is_empty() {
        String::new()
    } else {
        format!(".{}", ext.to_ascii_lowercase())
    }
}

// =============================================================================
// Tests
// =============================================================================
