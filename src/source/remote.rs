use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::ready;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::acl::parse_acl_record;
use crate::error::{Result, SyncError};
use crate::hashing::{content_hash, hash_matches, hash_record_path, is_hash_record};
use crate::models::{FileContent, FolderEntry, PathEntry, SourceFile};
use crate::progress::{SyncEvent, SyncObserver};
use crate::storage::StorageProvider;

use super::{aggregate_folders, FileSource};

/// File source backed by a hierarchical [`StorageProvider`].
///
/// Each changed file is downloaded into a temporary file that lives exactly
/// as long as the yielded [`SourceFile`]; its ACL is read from the
/// provider's permission record and its origin URL is recorded. Hash
/// sidecars are stored next to the content in the same provider.
pub struct StorageFileSource {
    storage: Arc<dyn StorageProvider>,
    directory: String,
    observer: Arc<dyn SyncObserver>,
}

impl StorageFileSource {
    /// `directory` restricts discovery to a subtree (empty for the whole
    /// filesystem).
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        directory: impl Into<String>,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        Self {
            storage,
            directory: directory.into().trim_matches('/').to_string(),
            observer,
        }
    }

    /// Every listing entry below the configured directory, across pages.
    fn entries(&self) -> BoxStream<'_, Result<PathEntry>> {
        let first: Option<Option<String>> = Some(None);
        stream::try_unfold(first, move |state| async move {
            let Some(token) = state else {
                return Ok::<_, SyncError>(None);
            };
            let page = self.storage.list_page(&self.directory, token).await?;
            let next = page.continuation.map(Some);
            let items = stream::iter(page.entries.into_iter().map(Ok::<PathEntry, SyncError>));
            Ok(Some((items, next)))
        })
        .try_flatten()
        .boxed()
    }

    /// Download, hash-check, and ACL-annotate one path. `Ok(None)` means the
    /// content is unchanged. Without `check_hash` the hash record is not
    /// consulted. The record is only written by `commit`.
    async fn load(&self, path: &str, check_hash: bool) -> Result<Option<SourceFile>> {
        let data = self.storage.download(path).await?;

        let mut temp = tempfile::Builder::new()
            .prefix("csync-")
            .suffix(&format!("-{}", crate::models::basename(path)))
            .tempfile()?;
        temp.write_all(&data)?;
        temp.flush()?;

        let hash = content_hash(&data);
        drop(data);

        if check_hash {
            let record_path = hash_record_path(path);
            let stored = match self.storage.download(&record_path).await {
                Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                Err(SyncError::NotFound(_)) => None,
                Err(e) => {
                    tracing::debug!(path = %record_path, error = %e, "could not read hash record");
                    None
                }
            };
            if hash_matches(stored.as_deref(), &hash) {
                return Ok(None);
            }
        }

        let record = self.storage.access_control(path).await?;
        let acls = parse_acl_record(&record);

        Ok(Some(
            SourceFile::new(path, FileContent::Transient(temp))
                .with_acls(acls)
                .with_url(self.storage.url_for(path))
                .with_content_hash(hash),
        ))
    }

    fn files(&self, check_hash: bool) -> BoxStream<'_, Result<SourceFile>> {
        self.list_paths()
            .filter_map(move |item| async move {
                let path = match item {
                    Ok(path) => path,
                    Err(e) => return Some(Err(e)),
                };
                self.observer.report(SyncEvent::Discovered { path: path.clone() });
                match self.load(&path, check_hash).await {
                    Ok(Some(file)) => Some(Ok(file)),
                    Ok(None) => {
                        self.observer.report(SyncEvent::Unchanged { path });
                        None
                    }
                    Err(e) => {
                        self.observer.report(SyncEvent::FileFailed {
                            path,
                            error: e.to_string(),
                        });
                        None
                    }
                }
            })
            .boxed()
    }

    fn relative<'a>(&self, name: &'a str) -> &'a str {
        if self.directory.is_empty() {
            return name;
        }
        name.strip_prefix(self.directory.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(name)
    }
}

#[async_trait]
impl FileSource for StorageFileSource {
    fn list_paths(&self) -> BoxStream<'_, Result<String>> {
        self.entries()
            .try_filter(|e| ready(!e.is_directory && !is_hash_record(&e.name)))
            .map_ok(|e| e.name)
            .boxed()
    }

    fn list(&self) -> BoxStream<'_, Result<SourceFile>> {
        self.files(true)
    }

    fn list_all(&self) -> BoxStream<'_, Result<SourceFile>> {
        self.files(false)
    }

    async fn commit(&self, file: &SourceFile) -> Result<()> {
        let hash = match file.content_hash() {
            Some(hash) => hash.to_string(),
            None => content_hash(&file.read_content().await?),
        };
        self.storage
            .upload(&hash_record_path(file.path()), hash.as_bytes())
            .await
    }

    async fn folder_entries(&self) -> Result<Vec<FolderEntry>> {
        let entries: Vec<PathEntry> = self.entries().try_collect().await?;
        let relative = entries.into_iter().filter_map(|e| {
            let name = self.relative(&e.name).to_string();
            if name.is_empty() {
                None
            } else {
                Some(PathEntry { name, ..e })
            }
        });
        let folders = aggregate_folders(relative);
        tracing::debug!(count = folders.len(), "listed folders by creation time");
        Ok(folders)
    }
}
