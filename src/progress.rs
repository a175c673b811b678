//! Sync progress reporting.
//!
//! Every component that does observable work receives an
//! `Arc<dyn SyncObserver>` at construction and reports [`SyncEvent`]s to it.
//! [`TracingObserver`] forwards events to `tracing`; tests install their own
//! observer to assert on what happened.

use std::sync::Arc;

/// A single observable step of discovery, schema management, or sync.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// A content path was found in the storage tree.
    Discovered { path: String },
    /// Content hash equals the stored hash record; nothing to do.
    Unchanged { path: String },
    /// Processing a single file failed; siblings continue.
    FileFailed { path: String, error: String },
    /// A file's sections were written to an index.
    FileIngested {
        path: String,
        index: String,
        sections: usize,
    },
    IndexCreated { index: String },
    IndexExists { index: String },
    FieldAdded { index: String, field: String },
    BatchUploaded {
        index: String,
        batch: usize,
        documents: usize,
    },
    /// ACL fields were merged into an existing document.
    AclPatched { index: String, id: String },
    /// One pass of the removal loop.
    RemovalPass {
        index: String,
        pass: usize,
        matched: usize,
        deleted: usize,
    },
    RemovalFinished { index: String, removed: usize },
}

/// Receives progress events from the pipeline.
pub trait SyncObserver: Send + Sync {
    fn report(&self, event: SyncEvent);
}

/// Logs every event through `tracing`.
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn report(&self, event: SyncEvent) {
        match event {
            SyncEvent::Discovered { path } => tracing::debug!(%path, "found file"),
            SyncEvent::Unchanged { path } => {
                tracing::info!(%path, "skipping file, no changes detected")
            }
            SyncEvent::FileFailed { path, error } => {
                tracing::warn!(%path, %error, "error while processing file, skipping")
            }
            SyncEvent::FileIngested {
                path,
                index,
                sections,
            } => tracing::info!(%path, %index, sections, "file ingested"),
            SyncEvent::IndexCreated { index } => tracing::info!(%index, "created search index"),
            SyncEvent::IndexExists { index } => {
                tracing::info!(%index, "search index already exists")
            }
            SyncEvent::FieldAdded { index, field } => {
                tracing::info!(%index, %field, "added field to search index")
            }
            SyncEvent::BatchUploaded {
                index,
                batch,
                documents,
            } => tracing::debug!(%index, batch, documents, "uploaded batch"),
            SyncEvent::AclPatched { index, id } => {
                tracing::debug!(%index, %id, "patched access control fields")
            }
            SyncEvent::RemovalPass {
                index,
                pass,
                matched,
                deleted,
            } => tracing::debug!(%index, pass, matched, deleted, "removal pass"),
            SyncEvent::RemovalFinished { index, removed } => {
                tracing::info!(%index, removed, "removed sections from index")
            }
        }
    }
}

/// Discards every event.
pub struct NullObserver;

impl SyncObserver for NullObserver {
    fn report(&self, _event: SyncEvent) {}
}

/// The default observer for components built without one.
pub fn default_observer() -> Arc<dyn SyncObserver> {
    Arc::new(TracingObserver)
}
