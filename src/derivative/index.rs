//! In-memory index of finished derivatives.
//!
//! Maps a [`DerivativeKey`] to the file it was written to and when. The index
//! is the fast path for lookups; the cache directory is the source of truth
//! and the index is reconciled against it lazily (missing files are dropped on
//! lookup, fresh files on disk are adopted).
//!
//! # Persistence
//!
//! The index can be snapshotted to [`SNAPSHOT_FILE_NAME`] inside the cache
//! directory. Snapshots are written to a temporary file and renamed into place
//! so a crash never leaves a truncated snapshot. On load, entries whose file
//! has disappeared are discarded.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::DerivativeError;

use super::key::DerivativeKey;

/// Reserved file name of the index snapshot inside the cache directory.
pub const SNAPSHOT_FILE_NAME: &str = "cache.json";

// =============================================================================
// Cache Entry
// =============================================================================

/// A finished derivative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The original the derivative was made from
    pub original: PathBuf,

    /// Location of the derivative in the cache directory
    pub path: PathBuf,

    /// When the derivative was created or last adopted
    pub created_at: SystemTime,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(original: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self {
            original: original.into(),
            path: path.into(),
            created_at: SystemTime::now(),
        }
    }

    /// Age of the entry at `now`. Entries stamped in the future are age zero.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or_default()
    }

    /// Whether the entry is older than `ttl` at `now`.
    pub fn is_expired(&self, ttl: Duration, now: SystemTime) -> bool {
        self.age(now) > ttl
    }
}

// =============================================================================
// Derivative Index
// =============================================================================

/// Concurrent map from derivative key to [`CacheEntry`].
#[derive(Debug, Default)]
pub struct DerivativeIndex {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl DerivativeIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry.
    pub async fn get(&self, key: &DerivativeKey) -> Option<CacheEntry> {
        let entries = self.entries.read().await;
        entries.get(key.as_str()).cloned()
    }

    /// Insert or replace an entry.
    pub async fn insert(&self, key: &DerivativeKey, entry: CacheEntry) {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), entry);
    }

    /// Remove an entry, returning it if it existed.
    pub async fn remove(&self, key: &DerivativeKey) -> Option<CacheEntry> {
        let mut entries = self.entries.write().await;
        entries.remove(key.as_str())
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the index is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove and return every entry older than `ttl`.
    ///
    /// The write lock is held only while draining; deleting the files is left
    /// to the caller.
    pub async fn drain_expired(&self, ttl: Duration) -> Vec<CacheEntry> {
        let now = SystemTime::now();
        let mut entries = self.entries.write().await;

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(ttl, now))
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| entries.remove(&key))
            .collect()
    }

    /// Derivative paths currently referenced by the index.
    pub async fn referenced_paths(&self) -> HashSet<PathBuf> {
        let entries = self.entries.read().await;
        entries.values().map(|entry| entry.path.clone()).collect()
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Write the index to `path` atomically. Returns the number of entries
    /// written.
    pub async fn save(&self, path: &Path) -> Result<usize, DerivativeError> {
        let (json, count) = {
            let entries = self.entries.read().await;
            let json = serde_json::to_vec_pretty(&*entries)
                .map_err(|e| DerivativeError::io(path, e))?;
            (json, entries.len())
        };

        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| DerivativeError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| DerivativeError::io(path, e))?;

        Ok(count)
    }

    /// Load an index from a snapshot at `path`.
    ///
    /// A missing snapshot yields an empty index. Entries whose derivative file
    /// no longer exists are dropped.
    pub async fn load(path: &Path) -> Result<Self, DerivativeError> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(DerivativeError::io(path, e)),
        };

        let loaded: HashMap<String, CacheEntry> =
            serde_json::from_slice(&data).map_err(|e| DerivativeError::io(path, e))?;

        let mut entries = HashMap::with_capacity(loaded.len());
        for (key, entry) in loaded {
            if tokio::fs::try_exists(&entry.path).await.unwrap_or(false) {
                entries.insert(key, entry);
            }
        }

        Ok(Self {
            entries: RwLock::new(entries),
        })
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// =============================================================================
// Tests
// =============================================================================
