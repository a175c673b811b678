use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::hashing::{content_hash, hash_matches, hash_record_path, is_hash_record};
use crate::models::{FileContent, FolderEntry, PathEntry, SourceFile};
use crate::progress::{SyncEvent, SyncObserver};

use super::{aggregate_folders, FileSource};

/// File source over a local directory tree.
///
/// Files are read in place (no transient copy), carry an empty ACL and no
/// origin URL. Hash sidecars are written next to each file.
pub struct LocalFileSource {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
    observer: Arc<dyn SyncObserver>,
}

impl LocalFileSource {
    /// Glob patterns are matched against paths relative to `root`.
    pub fn new(
        root: impl Into<PathBuf>,
        include_globs: &[String],
        exclude_globs: &[String],
        follow_symlinks: bool,
        observer: Arc<dyn SyncObserver>,
    ) -> Result<Self> {
        let mut default_excludes = vec!["**/.git/**".to_string()];
        default_excludes.extend(exclude_globs.iter().cloned());
        Ok(Self {
            root: root.into(),
            include: build_globset(include_globs)?,
            exclude: build_globset(&default_excludes)?,
            follow_symlinks,
            observer,
        })
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn is_selected(&self, rel: &str) -> bool {
        !is_hash_record(rel) && !self.exclude.is_match(rel) && self.include.is_match(rel)
    }

    /// Read one path. With `check_hash`, content matching its sidecar
    /// yields `Ok(None)`. The sidecar is only written by `commit`.
    async fn load(&self, path: &str, check_hash: bool) -> Result<Option<SourceFile>> {
        let data = tokio::fs::read(path).await?;
        let hash = content_hash(&data);
        if check_hash {
            let stored = match tokio::fs::read_to_string(hash_record_path(path)).await {
                Ok(s) => Some(s),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };
            if hash_matches(stored.as_deref(), &hash) {
                return Ok(None);
            }
        }
        Ok(Some(
            SourceFile::new(path, FileContent::Local(PathBuf::from(path))).with_content_hash(hash),
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
}

#[async_trait]
impl FileSource for LocalFileSource {
    fn list_paths(&self) -> BoxStream<'_, Result<String>> {
        if !self.root.exists() {
            let err = SyncError::NotFound(format!(
                "local source root does not exist: {}",
                self.root.display()
            ));
            return stream::once(async move { Err(err) }).boxed();
        }

        let walker = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();
        stream::iter(walker)
            .filter_map(move |entry| {
                let item = match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        let rel = self.relative(entry.path());
                        if self.is_selected(&rel) {
                            Some(Ok(entry.path().to_string_lossy().into_owned()))
                        } else {
                            None
                        }
                    }
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unreadable directory entry");
                        None
                    }
                };
                futures::future::ready(item)
            })
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
        tokio::fs::write(hash_record_path(file.path()), hash).await?;
        Ok(())
    }

    async fn folder_entries(&self) -> Result<Vec<FolderEntry>> {
        if !self.root.exists() {
            return Err(SyncError::NotFound(self.root.display().to_string()));
        }
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(self.follow_symlinks)
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let rel = self.relative(entry.path());
            if is_hash_record(&rel) {
                continue;
            }
            let metadata = entry.metadata().map_err(std::io::Error::from)?;
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            entries.push(PathEntry {
                name: rel,
                is_directory: metadata.is_dir(),
                creation_time: DateTime::<Utc>::from(created),
            });
        }
        Ok(aggregate_folders(entries))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| SyncError::Config(format!("invalid glob '{}': {}", pattern, e)))?,
        );
    }
    builder
        .build()
        .map_err(|e| SyncError::Config(format!("invalid glob set: {}", e)))
}
