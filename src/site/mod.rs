//! Site side of the pipeline.
//!
//! ```text
//!   watch dir ──▶ scan_folders ──▶ MetadataStore ──▶ RebuildCoalescer ──▶ site generator
//!                                       │
//!                                       └──▶ image endpoint (folder id -> folder)
//! ```
//!
//! - [`MetadataStore`] / [`JsonMetadataStore`]: folder records keyed by [`folder_id`]
//! - [`scan_folders`] / [`FolderScanner`]: bring the store in line with the watch directory
//! - [`RebuildCoalescer`] / [`SiteBuilder`]: coalesced site rebuilds

mod metadata;
mod rebuild;
mod scan;

pub use metadata::{category_tags, folder_id, FolderRecord, JsonMetadataStore, MetadataStore};
pub use rebuild::{
    CommandBuilder, RebuildCoalescer, RebuildOutcome, SiteBuilder, DEFAULT_BUILD_TIMEOUT,
    DEFAULT_SETTLE_DELAY,
};
pub use scan::{is_media_file, normalize_extensions, scan_folders, FolderScanner, ScanReport};
