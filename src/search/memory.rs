//! In-memory [`SearchIndexService`].
//!
//! Stores index definitions and documents behind `std::sync::RwLock`.
//! Filters support `field eq 'value'` clauses joined by `and`, which is all
//! the sync engine issues.
//!
//! Two knobs simulate a hosted service's failure modes:
//! - `with_delete_lag(n)`: a deleted document stays visible to the next `n`
//!   searches of its index (eventual consistency).
//! - `with_silent_delete_failure()`: deletes succeed but change nothing.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};

use super::{IndexAction, IndexDefinition, SearchIndexService, SearchPage, SearchRequest};

/// Page size used when a search request does not set `top`.
const DEFAULT_TOP: usize = 50;

type Document = Map<String, Value>;

#[derive(Default)]
struct IndexState {
    documents: BTreeMap<String, Document>,
    /// Deleted documents still visible, with the searches they survive.
    ghosts: BTreeMap<String, (Document, usize)>,
}

pub struct InMemorySearchService {
    definitions: RwLock<BTreeMap<String, IndexDefinition>>,
    state: RwLock<BTreeMap<String, IndexState>>,
    batches: RwLock<Vec<(String, usize)>>,
    delete_lag: usize,
    silent_delete_failure: bool,
    fail_uploads: RwLock<bool>,
}

impl InMemorySearchService {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(BTreeMap::new()),
            state: RwLock::new(BTreeMap::new()),
            batches: RwLock::new(Vec::new()),
            delete_lag: 0,
            silent_delete_failure: false,
            fail_uploads: RwLock::new(false),
        }
    }

    pub fn with_delete_lag(mut self, searches: usize) -> Self {
        self.delete_lag = searches;
        self
    }

    pub fn with_silent_delete_failure(mut self) -> Self {
        self.silent_delete_failure = true;
        self
    }

    /// Make every subsequent `index_documents` call fail.
    pub fn fail_uploads(&self, fail: bool) {
        *self.fail_uploads.write().unwrap() = fail;
    }

    /// `(index, action count)` of every accepted `index_documents` call.
    pub fn batches(&self) -> Vec<(String, usize)> {
        self.batches.read().unwrap().clone()
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Document> {
        self.state
            .read()
            .unwrap()
            .get(index)
            .and_then(|s| s.documents.get(id).cloned())
    }

    /// Live documents of an index, ordered by id.
    pub fn documents(&self, index: &str) -> Vec<Document> {
        self.state
            .read()
            .unwrap()
            .get(index)
            .map(|s| s.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Insert a document directly, bypassing batch bookkeeping.
    pub fn seed(&self, index: &str, document: Document) -> Result<()> {
        let id = document_key(&document)?;
        self.state
            .write()
            .unwrap()
            .entry(index.to_string())
            .or_default()
            .documents
            .insert(id, document);
        Ok(())
    }

    fn require_index(&self, index: &str) -> Result<()> {
        if self.definitions.read().unwrap().contains_key(index) {
            Ok(())
        } else {
            Err(SyncError::NotFound(format!("index {}", index)))
        }
    }
}

impl Default for InMemorySearchService {
    fn default() -> Self {
        Self::new()
    }
}

fn document_key(doc: &Document) -> Result<String> {
    doc.get(super::KEY_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SyncError::InvalidInput("document has no string 'id'".to_string()))
}

/// Parse `a eq 'x' and b eq 'y'` into `(field, value)` pairs.
fn parse_filter(filter: &str) -> Result<Vec<(String, String)>> {
    let invalid = || SyncError::InvalidInput(format!("unsupported filter: {}", filter));
    let mut clauses = Vec::new();
    let mut rest = filter.trim();
    while !rest.is_empty() {
        let (field, after) = rest.split_once(" eq ").ok_or_else(invalid)?;
        let after = after.trim_start().strip_prefix('\'').ok_or_else(invalid)?;

        let mut value = String::new();
        let mut chars = after.char_indices().peekable();
        let mut end = None;
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    value.push('\'');
                    chars.next();
                } else {
                    end = Some(i + 1);
                    break;
                }
            } else {
                value.push(c);
            }
        }
        let end = end.ok_or_else(invalid)?;
        clauses.push((field.trim().to_string(), value));

        rest = after[end..].trim_start();
        if !rest.is_empty() {
            rest = rest.strip_prefix("and ").ok_or_else(invalid)?.trim_start();
        }
    }
    Ok(clauses)
}

fn matches(doc: &Document, clauses: &[(String, String)]) -> bool {
    clauses
        .iter()
        .all(|(field, value)| doc.get(field).and_then(Value::as_str) == Some(value.as_str()))
}

#[async_trait]
impl SearchIndexService for InMemorySearchService {
    async fn get_index(&self, name: &str) -> Result<Option<IndexDefinition>> {
        Ok(self.definitions.read().unwrap().get(name).cloned())
    }

    async fn create_index(&self, index: &IndexDefinition) -> Result<()> {
        let mut defs = self.definitions.write().unwrap();
        if defs.contains_key(&index.name) {
            return Err(SyncError::provider(
                "create index",
                format!("index '{}' already exists", index.name),
            ));
        }
        defs.insert(index.name.clone(), index.clone());
        Ok(())
    }

    async fn create_or_update_index(&self, index: &IndexDefinition) -> Result<()> {
        self.definitions
            .write()
            .unwrap()
            .insert(index.name.clone(), index.clone());
        Ok(())
    }

    async fn index_documents(&self, index: &str, actions: Vec<IndexAction>) -> Result<()> {
        self.require_index(index)?;
        if *self.fail_uploads.read().unwrap() {
            return Err(SyncError::provider(
                "index documents",
                "simulated service failure",
            ));
        }

        let mut state = self.state.write().unwrap();
        let entry = state.entry(index.to_string()).or_default();

        // Validate the whole batch before applying any of it.
        for action in &actions {
            match action {
                IndexAction::Upload(doc) => {
                    document_key(doc)?;
                }
                IndexAction::Merge(doc) => {
                    let id = document_key(doc)?;
                    if !entry.documents.contains_key(&id) {
                        return Err(SyncError::provider(
                            "index documents",
                            format!("{} (404): document not found for merge", id),
                        ));
                    }
                }
                IndexAction::Delete(_) => {}
            }
        }

        let count = actions.len();
        for action in actions {
            match action {
                IndexAction::Upload(doc) => {
                    let id = document_key(&doc)?;
                    entry.ghosts.remove(&id);
                    entry.documents.insert(id, doc);
                }
                IndexAction::Merge(doc) => {
                    let id = document_key(&doc)?;
                    if let Some(existing) = entry.documents.get_mut(&id) {
                        for (k, v) in doc {
                            existing.insert(k, v);
                        }
                    }
                }
                IndexAction::Delete(id) => {
                    if self.silent_delete_failure {
                        continue;
                    }
                    if let Some(doc) = entry.documents.remove(&id) {
                        if self.delete_lag > 0 {
                            entry.ghosts.insert(id, (doc, self.delete_lag));
                        }
                    }
                }
            }
        }
        drop(state);
        self.batches
            .write()
            .unwrap()
            .push((index.to_string(), count));
        Ok(())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchPage> {
        self.require_index(index)?;
        let clauses = match &request.filter {
            Some(f) => parse_filter(f)?,
            None => Vec::new(),
        };

        let mut state = self.state.write().unwrap();
        let entry = state.entry(index.to_string()).or_default();

        let mut hits: Vec<Document> = entry
            .documents
            .values()
            .chain(entry.ghosts.values().map(|(doc, _)| doc))
            .filter(|doc| matches(doc, &clauses))
            .cloned()
            .collect();

        // Each search brings ghosts one step closer to disappearing.
        entry.ghosts.retain(|_, (_, remaining)| {
            *remaining -= 1;
            *remaining > 0
        });

        let total = hits.len() as u64;
        hits.drain(..request.skip.unwrap_or(0).min(hits.len()));
        hits.truncate(request.top.unwrap_or(DEFAULT_TOP));
        Ok(SearchPage {
            count: request.include_total_count.then_some(total),
            documents: hits,
        })
    }

    async fn document_count(&self, index: &str) -> Result<u64> {
        self.require_index(index)?;
        Ok(self
            .state
            .read()
            .unwrap()
            .get(index)
            .map(|s| s.documents.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    async fn service_with_index(service: InMemorySearchService) -> InMemorySearchService {
        let def: IndexDefinition =
            serde_json::from_value(json!({"name": "idx", "fields": []})).unwrap();
        service.create_index(&def).await.unwrap();
        service
    }

    #[test]
    fn filter_parsing_handles_escaped_quotes() {
        let clauses = parse_filter("sourcefile eq 'O''Brien.pdf' and category eq 'hr'").unwrap();
        assert_eq!(
            clauses,
            vec![
                ("sourcefile".to_string(), "O'Brien.pdf".to_string()),
                ("category".to_string(), "hr".to_string())
            ]
        );
        assert!(parse_filter("search.in(oids, 'a')").is_err());
    }

    #[tokio::test]
    async fn merge_updates_only_supplied_fields() {
        let service = service_with_index(InMemorySearchService::new()).await;
        service
            .index_documents(
                "idx",
                vec![IndexAction::Upload(doc(
                    json!({"id": "1", "content": "c", "oids": ["a"]}),
                ))],
            )
            .await
            .unwrap();
        service
            .index_documents(
                "idx",
                vec![IndexAction::Merge(doc(json!({"id": "1", "oids": ["b"]})))],
            )
            .await
            .unwrap();
        let stored = service.document("idx", "1").unwrap();
        assert_eq!(stored["content"], json!("c"));
        assert_eq!(stored["oids"], json!(["b"]));
    }

    #[tokio::test]
    async fn merge_of_missing_document_fails_whole_batch() {
        let service = service_with_index(InMemorySearchService::new()).await;
        let result = service
            .index_documents(
                "idx",
                vec![
                    IndexAction::Upload(doc(json!({"id": "1"}))),
                    IndexAction::Merge(doc(json!({"id": "2", "oids": []}))),
                ],
            )
            .await;
        assert!(result.is_err());
        assert!(service.document("idx", "1").is_none());
    }

    #[tokio::test]
    async fn deleted_documents_linger_for_lagged_searches() {
        let service = service_with_index(InMemorySearchService::new().with_delete_lag(2)).await;
        service
            .index_documents("idx", vec![IndexAction::Upload(doc(json!({"id": "1"})))])
            .await
            .unwrap();
        service
            .index_documents("idx", vec![IndexAction::Delete("1".into())])
            .await
            .unwrap();

        let req = SearchRequest::default().with_total_count();
        assert_eq!(service.search("idx", &req).await.unwrap().count, Some(1));
        assert_eq!(service.search("idx", &req).await.unwrap().count, Some(1));
        assert_eq!(service.search("idx", &req).await.unwrap().count, Some(0));
        assert_eq!(service.document_count("idx").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_index_is_not_found() {
        let service = InMemorySearchService::new();
        let err = service
            .search("missing", &SearchRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }
}
