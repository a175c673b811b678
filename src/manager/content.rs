use crate::error::{Result, SyncError};
use crate::models::{IndexDocument, Section};
use crate::progress::SyncEvent;
use crate::search::IndexAction;

use super::{sourcepage_for, SearchManager, MAX_BATCH_SIZE};

impl SearchManager {
    /// Upsert `sections` into `index` in batches of at most
    /// [`MAX_BATCH_SIZE`], with one embedding call per batch.
    ///
    /// Document ids are `<file id>-page-<position in sections>`, so
    /// re-sending the same sections overwrites rather than duplicates. Any
    /// failed batch is returned as [`SyncError::BatchUpload`]; earlier
    /// batches stay written.
    ///
    /// `image_embeddings` is indexed by page number. Returns the number of
    /// documents written.
    pub async fn update_content(
        &self,
        index: &str,
        sections: &[Section<'_>],
        image_embeddings: Option<&[Vec<f32>]>,
        storage_url: Option<&str>,
    ) -> Result<usize> {
        let mut written = 0;
        for (batch_index, batch) in sections.chunks(MAX_BATCH_SIZE).enumerate() {
            let mut documents = Vec::with_capacity(batch.len());
            for (i, section) in batch.iter().enumerate() {
                let position = batch_index * MAX_BATCH_SIZE + i;
                documents.push(self.document_for(section, position, image_embeddings, storage_url)?);
            }

            if let Some(provider) = &self.embeddings {
                let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
                let vectors = provider.embed_texts(&texts).await?;
                if vectors.len() != documents.len() {
                    return Err(SyncError::Embedding(format!(
                        "provider returned {} vectors for {} sections",
                        vectors.len(),
                        documents.len()
                    )));
                }
                for (doc, vector) in documents.iter_mut().zip(vectors) {
                    doc.embedding = Some(vector);
                }
            }

            let actions = documents
                .iter()
                .map(|doc| match serde_json::to_value(doc)? {
                    serde_json::Value::Object(map) => Ok(IndexAction::Upload(map)),
                    _ => Err(SyncError::InvalidInput(
                        "index document did not serialize to an object".to_string(),
                    )),
                })
                .collect::<Result<Vec<_>>>()?;

            let count = actions.len();
            self.service
                .index_documents(index, actions)
                .await
                .map_err(|e| SyncError::BatchUpload {
                    index: index.to_string(),
                    batch: batch_index,
                    message: e.to_string(),
                })?;
            self.observer.report(SyncEvent::BatchUploaded {
                index: index.to_string(),
                batch: batch_index,
                documents: count,
            });
            written += count;
        }
        Ok(written)
    }

    fn document_for(
        &self,
        section: &Section<'_>,
        position: usize,
        image_embeddings: Option<&[Vec<f32>]>,
        storage_url: Option<&str>,
    ) -> Result<IndexDocument> {
        let file = section.file;
        let image_embedding = match image_embeddings {
            Some(images) => Some(
                images
                    .get(section.page.page_num)
                    .cloned()
                    .ok_or_else(|| {
                        SyncError::InvalidInput(format!(
                            "no image embedding for page {} of {}",
                            section.page.page_num,
                            file.filename()
                        ))
                    })?,
            ),
            None => None,
        };
        let (oids, groups) = if self.use_acls {
            (
                Some(file.acls().oid_list()),
                Some(file.acls().group_list()),
            )
        } else {
            (None, None)
        };
        Ok(IndexDocument {
            id: format!("{}-page-{}", file.id(), position),
            content: section.page.text.clone(),
            embedding: None,
            image_embedding,
            category: section.category.clone(),
            sourcepage: sourcepage_for(section, image_embeddings.is_some()),
            sourcefile: file.filename().to_string(),
            storage_url: storage_url.map(str::to_string),
            oids,
            groups,
            parent_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::test_support::{file, page, service_with, CountingEmbedder};
    use super::*;
    use crate::models::AccessControl;
    use crate::progress::NullObserver;

    #[tokio::test]
    async fn batches_split_at_the_limit_with_one_embedding_call_each() {
        let service = service_with("idx", false).await;
        let embedder = Arc::new(CountingEmbedder::default());
        let manager = SearchManager::new(service.clone(), "idx", Arc::new(NullObserver))
            .with_embeddings(Some(embedder.clone()));

        let f = file("big.txt", AccessControl::default());
        let sections: Vec<Section> = (0..2500)
            .map(|i| Section::new(page(0, &format!("s{}", i)), &f, None))
            .collect();

        let written = manager.update_content("idx", &sections, None, None).await.unwrap();
        assert_eq!(written, 2500);
        let sizes: Vec<usize> = service.batches().into_iter().map(|(_, n)| n).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert_eq!(embedder.calls(), 3);

        let last = service
            .document("idx", &format!("{}-page-2499", f.id()))
            .unwrap();
        assert_eq!(last["content"], serde_json::json!("s2499"));
    }

    #[tokio::test]
    async fn documents_carry_acls_url_and_pdf_sourcepage() {
        let service = service_with("idx", true).await;
        let manager = SearchManager::new(service.clone(), "idx", Arc::new(NullObserver))
            .with_acls(true);
        let f = file("docs/Plan.pdf", AccessControl::new(["u1"], ["g1"]));
        let sections = vec![Section::new(page(2, "text"), &f, Some("hr".into()))];

        manager
            .update_content("idx", &sections, None, Some("https://x/content/Plan.pdf"))
            .await
            .unwrap();

        let doc = service.document("idx", &format!("{}-page-0", f.id())).unwrap();
        assert_eq!(doc["sourcepage"], serde_json::json!("Plan.pdf#page=3"));
        assert_eq!(doc["sourcefile"], serde_json::json!("Plan.pdf"));
        assert_eq!(doc["oids"], serde_json::json!(["u1"]));
        assert_eq!(doc["groups"], serde_json::json!(["g1"]));
        assert_eq!(doc["category"], serde_json::json!("hr"));
        assert_eq!(doc["storageUrl"], serde_json::json!("https://x/content/Plan.pdf"));
        assert!(!doc.contains_key("embedding"));
    }

    #[tokio::test]
    async fn image_embeddings_are_indexed_by_page() {
        let service = service_with("idx", false).await;
        let manager = SearchManager::new(service.clone(), "idx", Arc::new(NullObserver));
        let f = file("deck.pdf", AccessControl::default());
        let sections = vec![Section::new(page(1, "p1"), &f, None)];
        let images = vec![vec![0.0; 2], vec![1.0; 2]];

        manager
            .update_content("idx", &sections, Some(images.as_slice()), None)
            .await
            .unwrap();
        let doc = service.document("idx", &format!("{}-page-0", f.id())).unwrap();
        assert_eq!(doc["imageEmbedding"], serde_json::json!([1.0, 1.0]));
        assert_eq!(doc["sourcepage"], serde_json::json!("deck-1.png"));

        let missing = vec![Section::new(page(5, "p5"), &f, None)];
        let err = manager
            .update_content("idx", &missing, Some(images.as_slice()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn upload_failure_propagates_as_batch_error() {
        let service = service_with("idx", false).await;
        service.fail_uploads(true);
        let manager = SearchManager::new(service.clone(), "idx", Arc::new(NullObserver));
        let f = file("a.txt", AccessControl::default());
        let sections = vec![Section::new(page(0, "x"), &f, None)];

        let err = manager
            .update_content("idx", &sections, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::BatchUpload { batch: 0, .. }));
    }
}
