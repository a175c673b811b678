//! Hierarchical storage abstraction.
//!
//! The [`StorageProvider`] trait is the narrow surface a file source needs
//! from a storage tree: recursive paged listing, download, permission
//! record retrieval, upload, and delete. Backends:
//!
//! - [`adls::AdlsStorage`] — Azure Data Lake Storage Gen2 REST API.
//! - [`memory::InMemoryStorage`] — in-process tree for tests and dry runs.

pub mod adls;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::PathEntry;

/// One page of a recursive listing.
#[derive(Debug, Clone, Default)]
pub struct PathPage {
    pub entries: Vec<PathEntry>,
    /// Token for the next page, `None` on the last page.
    pub continuation: Option<String>,
}

/// Abstract hierarchical storage backend.
///
/// Paths are relative to the provider's filesystem root and use `/` as the
/// separator.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// List one page of all paths below `directory` (recursive).
    async fn list_page(&self, directory: &str, continuation: Option<String>) -> Result<PathPage>;

    /// Download a file's content. Missing files yield `NotFound`.
    async fn download(&self, path: &str) -> Result<Vec<u8>>;

    /// Raw permission record: comma-separated
    /// `principal_type:principal_id:permission_bits` tuples.
    async fn access_control(&self, path: &str) -> Result<String>;

    /// Create or overwrite a file.
    async fn upload(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Delete a file. Missing files yield `NotFound`.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Public URL of a path, recorded as the document's origin.
    fn url_for(&self, path: &str) -> String;
}

/// Join a directory prefix and a relative path with a single `/`.
pub fn join_path(directory: &str, name: &str) -> String {
    let dir = directory.trim_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}
