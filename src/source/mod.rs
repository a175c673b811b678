//! File discovery with change detection.
//!
//! A [`FileSource`] walks a storage tree and yields [`SourceFile`]s for files
//! whose content changed since their last successful ingest. Two variants
//! implement the same interface:
//!
//! - [`LocalFileSource`] — a directory on the local filesystem.
//! - [`StorageFileSource`] — any [`StorageProvider`](crate::storage::StorageProvider)
//!   (e.g. Data Lake Storage Gen2), with per-file ACL extraction.
//!
//! # Change detection
//!
//! ```text
//!   path ──▶ read/download ──▶ md5 ──▶ == path.md5 ? ──yes──▶ skip
//!                                            │ no
//!                                            ▼
//!                              ACLs ──▶ yield SourceFile ──▶ index ──▶ commit (write path.md5)
//! ```
//!
//! Listing never writes hash records. The caller invokes
//! [`FileSource::commit`] once a file has reached every index, so a file
//! whose upload fails is picked up again on the next run. Failures for one
//! path are reported to the observer and the path is skipped; they never end
//! the listing.

mod local;
mod remote;

pub use local::LocalFileSource;
pub use remote::StorageFileSource;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::Result;
use crate::models::{FolderEntry, PathEntry, SourceFile};

/// A storage tree that can be enumerated for ingestion.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Lazily list content file paths (directories and hash sidecars
    /// excluded). An `Err` item means the listing itself failed and no
    /// further items follow.
    fn list_paths(&self) -> BoxStream<'_, Result<String>>;

    /// Lazily yield changed files. Unchanged and failing files are skipped.
    fn list(&self) -> BoxStream<'_, Result<SourceFile>>;

    /// Lazily yield every file regardless of its hash record. Used to
    /// re-propagate permissions on unchanged content.
    fn list_all(&self) -> BoxStream<'_, Result<SourceFile>>;

    /// Record the file's content hash so later listings skip it. Call only
    /// after the file was processed successfully.
    async fn commit(&self, file: &SourceFile) -> Result<()>;

    /// Top-level folder names ordered by ascending effective creation time.
    async fn list_folders(&self) -> Result<Vec<String>> {
        Ok(self
            .folder_entries()
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect())
    }

    /// Top-level folders with their effective creation times, in ascending
    /// order of that time.
    async fn folder_entries(&self) -> Result<Vec<FolderEntry>>;
}

/// Aggregate listing entries (names relative to the listing root) into
/// top-level folders. A folder's effective creation time is the maximum over
/// the folder itself and everything below it. Ties are ordered by name.
pub fn aggregate_folders<I>(entries: I) -> Vec<FolderEntry>
where
    I: IntoIterator<Item = PathEntry>,
{
    let mut folders: HashMap<String, DateTime<Utc>> = HashMap::new();
    for entry in entries {
        let name = entry.name.trim_matches('/');
        let (top, nested) = match name.split_once('/') {
            Some((top, _)) => (top, true),
            None => (name, false),
        };
        if top.is_empty() || (!nested && !entry.is_directory) {
            continue;
        }
        folders
            .entry(top.to_string())
            .and_modify(|t| {
                if entry.creation_time > *t {
                    *t = entry.creation_time;
                }
            })
            .or_insert(entry.creation_time);
    }

    let mut out: Vec<FolderEntry> = folders
        .into_iter()
        .map(|(name, effective_creation_time)| FolderEntry {
            name,
            effective_creation_time,
        })
        .collect();
    out.sort_by(|a, b| {
        a.effective_creation_time
            .cmp(&b.effective_creation_time)
            .then_with(|| a.name.cmp(&b.name))
    });
    out
}
