//! In-memory [`StorageProvider`] for tests and dry runs.
//!
//! Files and directories live in a `BTreeMap` behind `std::sync::RwLock`.
//! Parent directories are created implicitly. Individual paths can be marked
//! as failing to simulate provider errors on download or permission fetch.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, SyncError};
use crate::models::PathEntry;

use super::{PathPage, StorageProvider};

#[derive(Clone)]
struct StoredEntry {
    is_directory: bool,
    creation_time: DateTime<Utc>,
    data: Vec<u8>,
    acl: String,
}

/// In-process hierarchical store.
pub struct InMemoryStorage {
    entries: RwLock<BTreeMap<String, StoredEntry>>,
    failing_downloads: RwLock<HashSet<String>>,
    failing_acls: RwLock<HashSet<String>>,
    page_size: usize,
    downloads: RwLock<usize>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            failing_downloads: RwLock::new(HashSet::new()),
            failing_acls: RwLock::new(HashSet::new()),
            page_size: 1000,
            downloads: RwLock::new(0),
        }
    }

    /// Limit listing pages to `page_size` entries to exercise paging.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Add a file with an ACL record and creation time; parents are created
    /// with the same creation time if missing.
    pub fn put_file(&self, path: &str, data: &[u8], acl: &str, created: DateTime<Utc>) {
        let path = path.trim_matches('/').to_string();
        let mut entries = self.entries.write().unwrap();
        let mut parent = String::new();
        let segments: Vec<&str> = path.split('/').collect();
        for seg in &segments[..segments.len().saturating_sub(1)] {
            if !parent.is_empty() {
                parent.push('/');
            }
            parent.push_str(seg);
            entries.entry(parent.clone()).or_insert(StoredEntry {
                is_directory: true,
                creation_time: created,
                data: Vec::new(),
                acl: String::new(),
            });
        }
        entries.insert(
            path,
            StoredEntry {
                is_directory: false,
                creation_time: created,
                data: data.to_vec(),
                acl: acl.to_string(),
            },
        );
    }

    /// Add an empty directory.
    pub fn put_dir(&self, path: &str, created: DateTime<Utc>) {
        self.entries.write().unwrap().insert(
            path.trim_matches('/').to_string(),
            StoredEntry {
                is_directory: true,
                creation_time: created,
                data: Vec::new(),
                acl: String::new(),
            },
        );
    }

    pub fn set_acl(&self, path: &str, acl: &str) {
        if let Some(e) = self.entries.write().unwrap().get_mut(path) {
            e.acl = acl.to_string();
        }
    }

    pub fn fail_download(&self, path: &str) {
        self.failing_downloads.write().unwrap().insert(path.to_string());
    }

    pub fn fail_access_control(&self, path: &str) {
        self.failing_acls.write().unwrap().insert(path.to_string());
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.entries
            .read()
            .unwrap()
            .get(path)
            .filter(|e| !e.is_directory)
            .map(|e| e.data.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.read().unwrap().contains_key(path)
    }

    /// Number of successful downloads served so far.
    pub fn download_count(&self) -> usize {
        *self.downloads.read().unwrap()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorage {
    async fn list_page(&self, directory: &str, continuation: Option<String>) -> Result<PathPage> {
        let directory = directory.trim_matches('/');
        let prefix = if directory.is_empty() {
            String::new()
        } else {
            format!("{}/", directory)
        };
        let entries = self.entries.read().unwrap();
        if !directory.is_empty() && !entries.contains_key(directory) {
            return Err(SyncError::NotFound(directory.to_string()));
        }

        let start: usize = match continuation {
            Some(token) => token
                .parse()
                .map_err(|_| SyncError::InvalidInput(format!("bad continuation '{}'", token)))?,
            None => 0,
        };
        let all: Vec<PathEntry> = entries
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(name, e)| PathEntry {
                name: name.clone(),
                is_directory: e.is_directory,
                creation_time: e.creation_time,
            })
            .collect();

        let end = (start + self.page_size).min(all.len());
        let page: Vec<PathEntry> = all.get(start..end).map(|s| s.to_vec()).unwrap_or_default();
        let continuation = if end < all.len() {
            Some(end.to_string())
        } else {
            None
        };
        Ok(PathPage {
            entries: page,
            continuation,
        })
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        if self.failing_downloads.read().unwrap().contains(path) {
            return Err(SyncError::provider("download", format!("simulated failure for {}", path)));
        }
        let data = self
            .read(path)
            .ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        *self.downloads.write().unwrap() += 1;
        Ok(data)
    }

    async fn access_control(&self, path: &str) -> Result<String> {
        if self.failing_acls.read().unwrap().contains(path) {
            return Err(SyncError::provider(
                "get access control",
                format!("simulated failure for {}", path),
            ));
        }
        self.entries
            .read()
            .unwrap()
            .get(path)
            .map(|e| e.acl.clone())
            .ok_or_else(|| SyncError::NotFound(path.to_string()))
    }

    async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        let existing_acl = self
            .entries
            .read()
            .unwrap()
            .get(path)
            .map(|e| e.acl.clone())
            .unwrap_or_default();
        self.put_file(path, data, &existing_acl, Utc::now());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .remove(path.trim_matches('/'))
            .map(|_| ())
            .ok_or_else(|| SyncError::NotFound(path.to_string()))
    }

    fn url_for(&self, path: &str) -> String {
        format!("memory://content/{}", path.trim_matches('/'))
    }
}
