//! Ingestion pipeline orchestration.
//!
//! Coordinates the full sync flow: file source → splitting → search manager,
//! fanned out over every configured index. Per-file problems before the
//! upload (unreadable content, unsupported format) are counted and skipped;
//! an upload failure aborts the run so no batch is lost silently. A file's
//! hash record is committed only after it reached every index, so a file
//! that failed is retried by the next run.

use std::sync::Arc;

use futures::StreamExt;

use crate::error::{Result, SyncError};
use crate::hashing::{content_hash, hash_record_path};
use crate::manager::SearchManager;
use crate::models::{FileContent, SourceFile};
use crate::progress::{SyncEvent, SyncObserver};
use crate::schema::IndexSchemaManager;
use crate::source::FileSource;
use crate::splitter::{sections_for, PageSplitter};
use crate::storage::StorageProvider;

/// Totals for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files_ingested: usize,
    pub files_failed: usize,
    /// Documents written, summed over every index.
    pub sections_uploaded: usize,
    /// Set when the run stopped early because the default index has content.
    pub skipped_populated: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Full,
    AclOnly,
}

pub struct Ingester {
    source: Arc<dyn FileSource>,
    storage: Option<Arc<dyn StorageProvider>>,
    schema: IndexSchemaManager,
    manager: SearchManager,
    splitter: Arc<dyn PageSplitter>,
    index_names: Vec<String>,
    category: Option<String>,
    skip_if_populated: bool,
    observer: Arc<dyn SyncObserver>,
}

impl Ingester {
    /// `index_names` must be non-empty; the manager's default index is the
    /// one probed by `skip_if_populated`.
    pub fn new(
        source: Arc<dyn FileSource>,
        schema: IndexSchemaManager,
        manager: SearchManager,
        splitter: Arc<dyn PageSplitter>,
        index_names: Vec<String>,
        observer: Arc<dyn SyncObserver>,
    ) -> Result<Self> {
        if index_names.is_empty() {
            return Err(SyncError::Config(
                "at least one index name is required".to_string(),
            ));
        }
        Ok(Self {
            source,
            storage: None,
            schema,
            manager,
            splitter,
            index_names,
            category: None,
            skip_if_populated: false,
            observer,
        })
    }

    /// Storage that receives uploads from [`add_file`](Self::add_file) and
    /// deletions from [`remove_file`](Self::remove_file).
    pub fn with_storage(mut self, storage: Arc<dyn StorageProvider>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn skip_if_populated(mut self, skip: bool) -> Self {
        self.skip_if_populated = skip;
        self
    }

    pub fn manager(&self) -> &SearchManager {
        &self.manager
    }

    /// Ensure indexes, then ingest every changed file into every index.
    pub async fn run(&self) -> Result<IngestReport> {
        if self.skip_if_populated && self.default_index_populated().await? {
            tracing::info!(
                index = self.manager.default_index(),
                "index already has documents, skipping ingestion"
            );
            return Ok(IngestReport {
                skipped_populated: true,
                ..IngestReport::default()
            });
        }
        self.schema.ensure_indexes(&self.index_names).await?;
        self.traverse(self.source.list(), Mode::Full).await
    }

    /// Re-propagate permissions of every file without re-embedding.
    pub async fn run_acl_only(&self) -> Result<IngestReport> {
        self.schema.ensure_indexes(&self.index_names).await?;
        self.traverse(self.source.list_all(), Mode::AclOnly).await
    }

    /// Ingest one user-supplied file. With storage configured, the content is
    /// uploaded first and the stored URL is indexed; its hash record is
    /// written once every index holds the file.
    pub async fn add_file(&self, file: SourceFile) -> Result<usize> {
        let bytes = file.read_content().await?;
        let file = match &self.storage {
            Some(storage) => {
                storage.upload(file.path(), &bytes).await?;
                let url = storage.url_for(file.path());
                file.with_url(url)
            }
            None => file,
        };
        let written = self.index_file(&file, &bytes, Mode::Full).await?;
        if let Some(storage) = &self.storage {
            let hash = content_hash(&bytes);
            if let Err(e) = storage
                .upload(&hash_record_path(file.path()), hash.as_bytes())
                .await
            {
                tracing::warn!(path = file.path(), error = %e, "failed to store hash record");
            }
        }
        Ok(written)
    }

    /// Delete a file from storage (if configured) and its documents from
    /// every index. With `only_oid`, only documents owned solely by that user
    /// are removed from the indexes and storage is left alone.
    pub async fn remove_file(&self, path: &str, only_oid: Option<&str>) -> Result<usize> {
        if let (Some(storage), None) = (&self.storage, only_oid) {
            for target in [path.to_string(), hash_record_path(path)] {
                match storage.delete(&target).await {
                    Ok(()) | Err(SyncError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        let mut removed = 0;
        for index in &self.index_names {
            removed += self
                .manager
                .remove_content_from(index, Some(path), only_oid)
                .await?;
        }
        Ok(removed)
    }

    async fn default_index_populated(&self) -> Result<bool> {
        match self
            .manager
            .index_has_documents(self.manager.default_index())
            .await
        {
            Ok(populated) => Ok(populated),
            Err(SyncError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn traverse(
        &self,
        mut files: futures::stream::BoxStream<'_, Result<SourceFile>>,
        mode: Mode,
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        while let Some(item) = files.next().await {
            let file = item?;
            let bytes = match file.read_content().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.file_failed(&file, &e, &mut report);
                    continue;
                }
            };
            match self.index_file(&file, &bytes, mode).await {
                Ok(uploaded) => {
                    report.files_ingested += 1;
                    report.sections_uploaded += uploaded;
                    if mode == Mode::Full {
                        if let Err(e) = self.source.commit(&file).await {
                            // next run re-uploads under the same ids
                            tracing::warn!(path = file.path(), error = %e, "failed to store hash record");
                        }
                    }
                }
                Err(e) if matches!(e, SyncError::Extract(_) | SyncError::Io(_)) => {
                    self.file_failed(&file, &e, &mut report);
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(
            ingested = report.files_ingested,
            failed = report.files_failed,
            sections = report.sections_uploaded,
            "ingestion finished"
        );
        Ok(report)
    }

    async fn index_file(&self, file: &SourceFile, bytes: &[u8], mode: Mode) -> Result<usize> {
        let pages = self.splitter.split(file, bytes)?;
        let sections = sections_for(file, pages, self.category.as_deref());
        let mut uploaded = 0;
        for index in &self.index_names {
            let n = match mode {
                Mode::Full => {
                    self.manager
                        .update_content(index, &sections, None, file.url())
                        .await?
                }
                Mode::AclOnly => {
                    self.manager
                        .update_partial_content(index, &sections, None)
                        .await?
                }
            };
            self.observer.report(SyncEvent::FileIngested {
                path: file.path().to_string(),
                index: index.clone(),
                sections: n,
            });
            uploaded += n;
        }
        Ok(uploaded)
    }

    fn file_failed(&self, file: &SourceFile, error: &SyncError, report: &mut IngestReport) {
        report.files_failed += 1;
        self.observer.report(SyncEvent::FileFailed {
            path: file.path().to_string(),
            error: error.to_string(),
        });
    }
}

/// Wrap caller-supplied bytes (e.g. an upload) as a [`SourceFile`].
pub fn uploaded_file(path: impl Into<String>, bytes: Vec<u8>) -> SourceFile {
    SourceFile::new(path, FileContent::InMemory(bytes))
}
