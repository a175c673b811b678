use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::models::basename;
use crate::progress::SyncEvent;
use crate::search::{odata_eq, string_list, IndexAction, SearchRequest, KEY_FIELD};

use super::{SearchManager, MAX_BATCH_SIZE};

impl SearchManager {
    /// Delete documents of `path` (all documents when `None`) from the
    /// default index. See [`remove_content_from`](Self::remove_content_from).
    pub async fn remove_content(&self, path: Option<&str>, only_oid: Option<&str>) -> Result<usize> {
        let index = self.default_index.clone();
        self.remove_content_from(&index, path, only_oid).await
    }

    /// Delete documents whose `sourcefile` is the basename of `path`.
    ///
    /// With `only_oid`, a document is deleted only when its `oids` are
    /// exactly `[only_oid]`; shared documents survive. Each pass pages
    /// through every match. Passes repeat until one finds nothing left to
    /// delete, pausing in between because deletes show up in queries with a
    /// delay. Deletes that keep reappearing past the pass ceiling or the
    /// overall timeout fail with [`SyncError::ConsistencyTimeout`].
    ///
    /// Returns the number of distinct documents deleted.
    pub async fn remove_content_from(
        &self,
        index: &str,
        path: Option<&str>,
        only_oid: Option<&str>,
    ) -> Result<usize> {
        let filter = path.map(|p| odata_eq("sourcefile", basename(p)));
        tracing::info!(index, filter = ?filter, only_oid, "removing documents");

        let mut passes = 0;
        let outcome = tokio::time::timeout(
            self.removal.timeout,
            self.removal_passes(index, filter, only_oid, &mut passes),
        )
        .await;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(SyncError::ConsistencyTimeout {
                index: index.to_string(),
                passes,
            }),
        }
    }

    async fn removal_passes(
        &self,
        index: &str,
        filter: Option<String>,
        only_oid: Option<&str>,
        passes: &mut usize,
    ) -> Result<usize> {
        let mut removed: BTreeSet<String> = BTreeSet::new();
        loop {
            if *passes >= self.removal.max_passes {
                return Err(SyncError::ConsistencyTimeout {
                    index: index.to_string(),
                    passes: *passes,
                });
            }
            *passes += 1;

            let mut skip = 0;
            let mut deleted_this_pass = 0;
            loop {
                let request = SearchRequest::filtered(filter.clone())
                    .top(MAX_BATCH_SIZE)
                    .skip(skip);
                let page = self.service.search(index, &request).await?;

                let ids: Vec<String> = page
                    .documents
                    .iter()
                    .filter(|doc| selected(doc, only_oid))
                    .filter_map(|doc| doc.get(KEY_FIELD).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();

                self.observer.report(SyncEvent::RemovalPass {
                    index: index.to_string(),
                    pass: *passes,
                    matched: page.documents.len(),
                    deleted: ids.len(),
                });

                if !ids.is_empty() {
                    deleted_this_pass += ids.len();
                    let actions = ids.iter().cloned().map(IndexAction::Delete).collect();
                    self.service.index_documents(index, actions).await?;
                    removed.extend(ids);
                }
                if page.documents.len() < MAX_BATCH_SIZE {
                    break;
                }
                // deletes may not be visible yet; later passes catch any shifted rows
                skip += page.documents.len();
            }

            // whatever still matches belongs to someone else
            if deleted_this_pass == 0 {
                break;
            }
            tokio::time::sleep(self.removal.retry_delay).await;
        }

        self.observer.report(SyncEvent::RemovalFinished {
            index: index.to_string(),
            removed: removed.len(),
        });
        Ok(removed.len())
    }
}

fn selected(doc: &Map<String, Value>, only_oid: Option<&str>) -> bool {
    match only_oid {
        None => true,
        Some(oid) => string_list(doc, "oids") == [oid],
    }
}
