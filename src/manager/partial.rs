use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::models::Section;
use crate::progress::SyncEvent;
use crate::search::{odata_eq, IndexAction, SearchRequest, KEY_FIELD};

use super::{sourcepage_for, SearchManager, MAX_BATCH_SIZE};

impl SearchManager {
    /// Re-propagate ACLs without touching content or vectors.
    ///
    /// Every document whose `sourcepage` matches one of the sections gets a
    /// merge carrying only its id and the non-empty `oids`/`groups` of the
    /// section's file. A file with an empty ACL produces no merge at all, so
    /// its documents keep their previous `oids`/`groups`: clearing a file's
    /// ACL never revokes access through this path.
    /// Returns the number of documents patched.
    pub async fn update_partial_content(
        &self,
        index: &str,
        sections: &[Section<'_>],
        image_embeddings: Option<&[Vec<f32>]>,
    ) -> Result<usize> {
        let mut seen_pages = BTreeSet::new();
        let mut seen_ids = BTreeSet::new();
        let mut actions = Vec::new();

        for section in sections {
            let acls = section.file.acls();
            if acls.is_empty() {
                continue;
            }
            let sourcepage = sourcepage_for(section, image_embeddings.is_some());
            if !seen_pages.insert(sourcepage.clone()) {
                continue;
            }

            // merges are queued until every page is read, so offsets stay valid
            let filter = odata_eq("sourcepage", &sourcepage);
            let mut skip = 0;
            loop {
                let request = SearchRequest::filtered(Some(filter.clone()))
                    .top(MAX_BATCH_SIZE)
                    .skip(skip);
                let page = self.service.search(index, &request).await?;
                let fetched = page.documents.len();
                for doc in page.documents {
                    let Some(id) = doc.get(KEY_FIELD).and_then(Value::as_str) else {
                        continue;
                    };
                    if !seen_ids.insert(id.to_string()) {
                        continue;
                    }
                    let mut patch = Map::new();
                    patch.insert(KEY_FIELD.to_string(), Value::String(id.to_string()));
                    if !acls.oids.is_empty() {
                        patch.insert("oids".to_string(), Value::from(acls.oid_list()));
                    }
                    if !acls.groups.is_empty() {
                        patch.insert("groups".to_string(), Value::from(acls.group_list()));
                    }
                    actions.push(IndexAction::Merge(patch));
                }
                if fetched < MAX_BATCH_SIZE {
                    break;
                }
                skip += fetched;
            }
        }

        let total = actions.len();
        let mut remaining = actions.into_iter().peekable();
        let mut batch_index = 0;
        while remaining.peek().is_some() {
            let batch: Vec<IndexAction> = remaining.by_ref().take(MAX_BATCH_SIZE).collect();
            let ids: Vec<String> = batch
                .iter()
                .filter_map(|a| a.key().map(str::to_string))
                .collect();
            self.service
                .index_documents(index, batch)
                .await
                .map_err(|e| SyncError::BatchUpload {
                    index: index.to_string(),
                    batch: batch_index,
                    message: e.to_string(),
                })?;
            for id in ids {
                self.observer.report(SyncEvent::AclPatched {
                    index: index.to_string(),
                    id,
                });
            }
            batch_index += 1;
        }
        Ok(total)
    }
}
