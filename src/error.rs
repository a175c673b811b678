//! Error types for corpus synchronization.
//!
//! Discovery errors are isolated per file by the callers that produce them;
//! batch upload and removal errors always propagate.

use thiserror::Error;

use crate::extract::ExtractError;

/// Result type alias using [`SyncError`].
pub type Result<T> = std::result::Result<T, SyncError>;

/// Core error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing file, directory, or index. The caller decides whether to
    /// create or skip.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or 5xx failure talking to a provider (download, permission
    /// fetch, upload, index query).
    #[error("Provider error during {operation}: {message}")]
    TransientProvider { operation: String, message: String },

    /// An existing index has a required field with an incompatible definition.
    #[error("Index '{index}' has incompatible field '{field}': {reason}")]
    SchemaConflict {
        index: String,
        field: String,
        reason: String,
    },

    /// Uploading a batch of documents failed.
    #[error("Failed to upload batch {batch} to index '{index}': {message}")]
    BatchUpload {
        index: String,
        batch: usize,
        message: String,
    },

    /// The removal loop exceeded its pass ceiling or deadline.
    #[error("Removal from index '{index}' did not converge after {passes} passes")]
    ConsistencyTimeout { index: String, passes: usize },

    /// Embedding generation failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Text extraction from a file failed.
    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    /// Invalid input from the caller.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    pub fn provider(operation: impl Into<String>, message: impl ToString) -> Self {
        SyncError::TransientProvider {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Whether this failure concerns a single item and may be skipped by a
    /// surrounding listing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::TransientProvider { .. }
                | SyncError::NotFound(_)
                | SyncError::Io(_)
                | SyncError::Extract(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        let operation = e
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| "request".to_string());
        SyncError::TransientProvider {
            operation,
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SyncError::provider("download", "503").is_transient());
        assert!(SyncError::NotFound("a.pdf".into()).is_transient());
        assert!(!SyncError::BatchUpload {
            index: "idx".into(),
            batch: 0,
            message: "boom".into()
        }
        .is_transient());
        assert!(!SyncError::ConsistencyTimeout {
            index: "idx".into(),
            passes: 3
        }
        .is_transient());
    }

    #[test]
    fn display_mentions_context() {
        let err = SyncError::SchemaConflict {
            index: "docs".into(),
            field: "embedding".into(),
            reason: "dimensions 1536 != 768".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("docs"));
        assert!(msg.contains("embedding"));
    }
}
