//! Writes sections into search indexes and removes them again.
//!
//! [`SearchManager`] bundles the four index-side operations of a sync:
//!
//! | Operation | Module |
//! |-----------|--------|
//! | [`update_content`](SearchManager::update_content) | `content` — batched upsert with embeddings |
//! | [`update_partial_content`](SearchManager::update_partial_content) | `partial` — ACL-only merge |
//! | [`remove_content`](SearchManager::remove_content) | `remove` — filtered delete loop |
//! | [`index_has_documents`](SearchManager::index_has_documents) | existence probe |
//!
//! All writes are keyed by deterministic document ids, so repeating any of
//! them is harmless.

mod content;
mod partial;
mod remove;

use std::sync::Arc;
use std::time::Duration;

use crate::config::RemovalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::models::{image_name_from_file_page, sourcepage_from_file_page, Section};
use crate::progress::SyncObserver;
use crate::search::SearchIndexService;

/// Largest number of documents sent in one indexing request.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Bounds on the removal loop.
#[derive(Debug, Clone)]
pub struct RemovalPolicy {
    pub max_passes: usize,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for RemovalPolicy {
    fn default() -> Self {
        Self {
            max_passes: 50,
            retry_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

impl From<&RemovalConfig> for RemovalPolicy {
    fn from(config: &RemovalConfig) -> Self {
        Self {
            max_passes: config.max_passes,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

pub struct SearchManager {
    service: Arc<dyn SearchIndexService>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    use_acls: bool,
    default_index: String,
    removal: RemovalPolicy,
    observer: Arc<dyn SyncObserver>,
}

impl SearchManager {
    pub fn new(
        service: Arc<dyn SearchIndexService>,
        default_index: impl Into<String>,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        Self {
            service,
            embeddings: None,
            use_acls: false,
            default_index: default_index.into(),
            removal: RemovalPolicy::default(),
            observer,
        }
    }

    /// Compute text embeddings with `provider`; `None` indexes text only.
    pub fn with_embeddings(mut self, provider: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        self.embeddings = provider;
        self
    }

    /// Write `oids`/`groups` on every uploaded document.
    pub fn with_acls(mut self, use_acls: bool) -> Self {
        self.use_acls = use_acls;
        self
    }

    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal = policy;
        self
    }

    pub fn default_index(&self) -> &str {
        &self.default_index
    }

    /// Whether `index` holds at least one document.
    pub async fn index_has_documents(&self, index: &str) -> Result<bool> {
        Ok(self.service.document_count(index).await? > 0)
    }
}

/// `sourcepage` of a section: the page image name when image embeddings
/// accompany the sections, the text page reference otherwise.
fn sourcepage_for(section: &Section<'_>, with_images: bool) -> String {
    let filename = section.file.filename();
    if with_images {
        image_name_from_file_page(filename, section.page.page_num)
    } else {
        sourcepage_from_file_page(filename, section.page.page_num)
    }
}
