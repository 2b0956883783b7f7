//! Folder metadata store.
//!
//! Records which photo folders have been turned into posts. The image
//! endpoint uses it to resolve the opaque folder id in a URL back to a real
//! directory; the folder scan uses it to detect new, changed and deleted
//! folders.
//!
//! # Persistence
//!
//! [`JsonMetadataStore`] keeps every record in memory. When opened with a
//! file path it rewrites the whole file after each mutation, writing to a
//! temporary file first and renaming it into place.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::MetadataError;

// =============================================================================
// Folder Record
// =============================================================================

/// A folder that has been published as a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    /// Stable id, see [`folder_id`]
    pub id: String,

    /// Folder path relative to the watch directory
    pub rel_path: PathBuf,

    /// Number of media files found in the folder
    pub file_count: usize,

    /// Category tags taken from the folder's parents
    pub tags: Vec<String>,

    /// When the record was written
    pub recorded_at: SystemTime,
}

impl FolderRecord {
    /// Build a record for the folder at `folder`, relative to `watch_dir`.
    ///
    /// Returns `None` if `folder` is not inside `watch_dir`.
    pub fn new(watch_dir: &Path, folder: &Path, file_count: usize) -> Option<Self> {
        let rel_path = folder.strip_prefix(watch_dir).ok()?.to_path_buf();
        Some(Self {
            id: folder_id(folder),
            tags: category_tags(&rel_path),
            rel_path,
            file_count,
            recorded_at: SystemTime::now(),
        })
    }
}

/// Stable id for a folder: hex SHA-256 of its path.
pub fn folder_id(folder: &Path) -> String {
    hex::encode(Sha256::digest(folder.to_string_lossy().as_bytes()))
}

/// Category tags for a folder: the names of its parent directories below the
/// watch directory.
///
/// `2024/Japan/Kyoto` is tagged `["2024", "Japan"]`.
pub fn category_tags(rel_path: &Path) -> Vec<String> {
    rel_path
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|c| match c {
                    Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Metadata Store
// =============================================================================

/// Storage for folder records.
#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    /// Real path of the folder with `id`, if known.
    async fn resolve_folder(&self, id: &str) -> Option<PathBuf>;

    /// Insert or replace a record.
    async fn record_folder(&self, record: FolderRecord) -> Result<(), MetadataError>;

    /// Remove a record. Returns whether it existed.
    async fn remove_folder(&self, id: &str) -> Result<bool, MetadataError>;

    /// Media file count recorded for `id`; 0 when unknown.
    async fn file_count(&self, id: &str) -> usize;

    /// Ids of every recorded folder.
    async fn folder_ids(&self) -> Vec<String>;
}

/// JSON-file-backed [`MetadataStore`].
#[derive(Debug)]
pub struct JsonMetadataStore {
    watch_dir: PathBuf,
    path: Option<PathBuf>,
    records: RwLock<HashMap<String, FolderRecord>>,
}

impl JsonMetadataStore {
    /// Create a store that is never written to disk.
    pub fn in_memory(watch_dir: impl Into<PathBuf>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            path: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Open a store persisted at `path`, loading existing records.
    pub async fn open(
        watch_dir: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, MetadataError> {
        let path = path.into();

        let records = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(MetadataError::Io { path, source }),
        };

        Ok(Self {
            watch_dir: watch_dir.into(),
            path: Some(path),
            records: RwLock::new(records),
        })
    }

    /// The directory folder paths are relative to.
    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Full record for `id`.
    pub async fn get(&self, id: &str) -> Option<FolderRecord> {
        self.records.read().await.get(id).cloned()
    }

    async fn persist(&self, records: &HashMap<String, FolderRecord>) -> Result<(), MetadataError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(records)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|source| MetadataError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|source| MetadataError::Io {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), records = records.len(), "Metadata store saved");
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for JsonMetadataStore {
    async fn resolve_folder(&self, id: &str) -> Option<PathBuf> {
        let records = self.records.read().await;
        records
            .get(id)
            .map(|record| self.watch_dir.join(&record.rel_path))
    }

    // Writers persist a copy first; memory only changes once the file does.

    async fn record_folder(&self, record: FolderRecord) -> Result<(), MetadataError> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        next.insert(record.id.clone(), record);
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn remove_folder(&self, id: &str) -> Result<bool, MetadataError> {
        let mut records = self.records.write().await;
        if !records.contains_key(id) {
            return Ok(false);
        }
        let mut next = records.clone();
        next.remove(id);
        self.persist(&next).await?;
        *records = next;
        Ok(true)
    }

    async fn file_count(&self, id: &str) -> usize {
        let records = self.records.read().await;
        records.get(id).map(|r| r.file_count).unwrap_or(0)
    }

    async fn folder_ids(&self) -> Vec<String> {
        let records = self.records.read().await;
        records.keys().cloned().collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
