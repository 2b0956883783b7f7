//! Scan of the watch directory, run at startup and before every requested
//! rebuild.
//!
//! Walks every folder below the watch directory, counts its media files and
//! brings the metadata store in line:
//!
//! - folder with media and no record: recorded
//! - folder whose media count changed: re-recorded
//! - recorded folder with no media left, or gone from disk: removed

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::MetadataError;

use super::metadata::{folder_id, FolderRecord, MetadataStore};

/// What a scan changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Folders visited
    pub scanned: usize,

    /// Folders recorded for the first time
    pub added: usize,

    /// Folders whose media count changed
    pub updated: usize,

    /// Records removed
    pub removed: usize,

    /// Directory entries that could not be read
    pub errors: usize,
}

impl ScanReport {
    /// Whether the scan changed the store (and the site needs a rebuild).
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

/// A watch directory and its media extensions, rescanned on demand.
///
/// Clones share a lock, so two rescans never interleave their store updates.
#[derive(Debug, Clone)]
pub struct FolderScanner {
    watch_dir: PathBuf,
    extensions: Vec<String>,
    running: Arc<Mutex<()>>,
}

impl FolderScanner {
    /// Create a scanner for `watch_dir` counting files with `extensions`.
    pub fn new<S: AsRef<str>>(watch_dir: impl Into<PathBuf>, extensions: &[S]) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            extensions: normalize_extensions(extensions),
            running: Arc::new(Mutex::new(())),
        }
    }

    /// The scanned directory.
    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Run [`scan_folders`] against `store`.
    pub async fn scan<M>(&self, store: &M) -> Result<ScanReport, MetadataError>
    where
        M: MetadataStore + ?Sized,
    {
        let _guard = self.running.lock().await;
        scan_folders(&self.watch_dir, &self.extensions, store).await
    }
}

/// Normalize extensions to lowercase with a leading dot.
pub fn normalize_extensions<S: AsRef<str>>(extensions: &[S]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{}", e))
        .collect()
}

/// Whether `path` has one of `extensions` (as returned by
/// [`normalize_extensions`]), ignoring case.
pub fn is_media_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .is_some_and(|ext| extensions.contains(&ext))
}

/// Scan `watch_dir` and update `store`.
///
/// The watch directory itself is not a post; only folders below it are.
pub async fn scan_folders<M>(
    watch_dir: &Path,
    extensions: &[String],
    store: &M,
) -> Result<ScanReport, MetadataError>
where
    M: MetadataStore + ?Sized,
{
    let root = watch_dir.to_path_buf();
    let exts = normalize_extensions(extensions);
    let (counts, errors) = tokio::task::spawn_blocking(move || count_media(&root, &exts))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Folder scan task failed");
            (HashMap::new(), 1)
        });

    let mut report = ScanReport {
        scanned: counts.len(),
        errors,
        ..Default::default()
    };
    let mut seen = HashSet::with_capacity(counts.len());

    for (folder, count) in counts {
        let id = folder_id(&folder);
        seen.insert(id.clone());
        let known = store.resolve_folder(&id).await.is_some();

        if count == 0 {
            if known && store.remove_folder(&id).await? {
                debug!(folder = %folder.display(), "Folder has no media left");
                report.removed += 1;
            }
            continue;
        }

        if known && store.file_count(&id).await == count {
            continue;
        }

        let Some(record) = FolderRecord::new(watch_dir, &folder, count) else {
            continue;
        };
        store.record_folder(record).await?;

        if known {
            debug!(folder = %folder.display(), files = count, "Folder updated");
            report.updated += 1;
        } else {
            debug!(folder = %folder.display(), files = count, "Folder added");
            report.added += 1;
        }
    }

    for id in store.folder_ids().await {
        if seen.contains(&id) {
            continue;
        }
        let exists = match store.resolve_folder(&id).await {
            Some(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            None => false,
        };
        if !exists && store.remove_folder(&id).await? {
            debug!(id = %id, "Folder no longer exists");
            report.removed += 1;
        }
    }

    info!(
        scanned = report.scanned,
        added = report.added,
        updated = report.updated,
        removed = report.removed,
        errors = report.errors,
        "Folder scan finished"
    );

    Ok(report)
}

/// Media file count for every directory below `root`, and the number of
/// unreadable entries.
fn count_media(root: &Path, extensions: &[String]) -> (HashMap<PathBuf, usize>, usize) {
    let mut counts: HashMap<PathBuf, usize> = HashMap::new();
    let mut errors = 0;

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                errors += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            counts.entry(entry.into_path()).or_insert(0);
        } else if is_media_file(entry.path(), extensions) {
            if let Some(parent) = entry.path().parent() {
                if parent != root {
                    *counts.entry(parent.to_path_buf()).or_insert(0) += 1;
                }
            }
        }
    }

    (counts, errors)
}

// =============================================================================
// Tests
// =============================================================================
