//! Search index service abstraction.
//!
//! The [`SearchIndexService`] trait is the seam between the sync engine and
//! a hosted search service. Index definitions mirror the Azure AI Search
//! REST shape (camelCase JSON) and keep unknown properties verbatim so that
//! a read-modify-write of an existing index never drops server-side
//! configuration.
//!
//! - [`azure::AzureSearchService`] — REST adapter.
//! - [`memory::InMemorySearchService`] — in-process service for tests and
//!   dry runs, with optional eventual-consistency simulation.

pub mod azure;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Name of the document key field in every index.
pub const KEY_FIELD: &str = "id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_search: Option<VectorSearch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticSearch>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl IndexDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searchable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filterable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facetable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_search_profile: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl FieldDefinition {
    /// A field of `field_type` with every attribute unset.
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            key: None,
            searchable: None,
            filterable: None,
            facetable: None,
            sortable: None,
            analyzer: None,
            dimensions: None,
            vector_search_profile: None,
            other: Map::new(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, "Edm.String")
    }

    pub fn key(mut self) -> Self {
        self.key = Some(true);
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = Some(true);
        self
    }

    pub fn filterable(mut self) -> Self {
        self.filterable = Some(true);
        self
    }

    pub fn facetable(mut self) -> Self {
        self.facetable = Some(true);
        self
    }

    pub fn with_analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.analyzer = Some(analyzer.into());
        self
    }

    /// A searchable `Collection(Edm.Single)` vector field.
    pub fn vector(name: impl Into<String>, dimensions: usize, profile: impl Into<String>) -> Self {
        let mut field = Self::new(name, "Collection(Edm.Single)").searchable();
        field.dimensions = Some(dimensions);
        field.vector_search_profile = Some(profile.into());
        field
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearch {
    #[serde(default)]
    pub algorithms: Vec<VectorAlgorithm>,
    #[serde(default)]
    pub profiles: Vec<VectorProfile>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorAlgorithm {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hnsw_parameters: Option<HnswParameters>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HnswParameters {
    pub metric: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorProfile {
    pub name: String,
    pub algorithm: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticSearch {
    #[serde(default)]
    pub configurations: Vec<SemanticConfiguration>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticConfiguration {
    pub name: String,
    pub prioritized_fields: PrioritizedFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrioritizedFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_field: Option<SemanticField>,
    #[serde(default)]
    pub prioritized_content_fields: Vec<SemanticField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prioritized_keywords_fields: Vec<SemanticField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticField {
    pub field_name: String,
}

/// One entry of a document batch.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexAction {
    /// Insert or replace the whole document.
    Upload(Map<String, Value>),
    /// Update only the supplied fields of an existing document.
    Merge(Map<String, Value>),
    /// Delete by key.
    Delete(String),
}

impl IndexAction {
    pub fn action_name(&self) -> &'static str {
        match self {
            IndexAction::Upload(_) => "upload",
            IndexAction::Merge(_) => "merge",
            IndexAction::Delete(_) => "delete",
        }
    }

    /// The document key this action targets, if present.
    pub fn key(&self) -> Option<&str> {
        match self {
            IndexAction::Upload(doc) | IndexAction::Merge(doc) => {
                doc.get(KEY_FIELD).and_then(Value::as_str)
            }
            IndexAction::Delete(id) => Some(id),
        }
    }

    /// Wire form: the document with an `@search.action` member.
    pub fn to_json(&self) -> Value {
        let mut body = match self {
            IndexAction::Upload(doc) | IndexAction::Merge(doc) => doc.clone(),
            IndexAction::Delete(id) => {
                let mut m = Map::new();
                m.insert(KEY_FIELD.to_string(), Value::String(id.clone()));
                m
            }
        };
        body.insert(
            "@search.action".to_string(),
            Value::String(self.action_name().to_string()),
        );
        Value::Object(body)
    }
}

/// A filtered query. `search_text` defaults to match-all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub search_text: Option<String>,
    pub filter: Option<String>,
    pub top: Option<usize>,
    /// Matches to pass over before the first returned document.
    pub skip: Option<usize>,
    pub include_total_count: bool,
}

impl SearchRequest {
    pub fn filtered(filter: Option<String>) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = (skip > 0).then_some(skip);
        self
    }

    pub fn with_total_count(mut self) -> Self {
        self.include_total_count = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    /// Total matches across all pages, when requested.
    pub count: Option<u64>,
    pub documents: Vec<Map<String, Value>>,
}

/// Hosted search service operations used by the sync engine.
#[async_trait]
pub trait SearchIndexService: Send + Sync {
    /// `Ok(None)` when the index does not exist.
    async fn get_index(&self, name: &str) -> Result<Option<IndexDefinition>>;

    async fn create_index(&self, index: &IndexDefinition) -> Result<()>;

    async fn create_or_update_index(&self, index: &IndexDefinition) -> Result<()>;

    /// Apply a batch atomically from the caller's point of view: any
    /// per-document failure fails the call.
    async fn index_documents(&self, index: &str, actions: Vec<IndexAction>) -> Result<()>;

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchPage>;

    async fn document_count(&self, index: &str) -> Result<u64>;
}

/// OData equality filter with embedded quotes escaped.
pub fn odata_eq(field: &str, value: &str) -> String {
    format!("{} eq '{}'", field, value.replace('\'', "''"))
}

/// String-array field of a search hit, e.g. `oids`. Missing or null is empty.
pub fn string_list(doc: &Map<String, Value>, field: &str) -> Vec<String> {
    doc.get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odata_escapes_quotes() {
        assert_eq!(odata_eq("sourcefile", "a.pdf"), "sourcefile eq 'a.pdf'");
        assert_eq!(
            odata_eq("sourcefile", "O'Brien's.pdf"),
            "sourcefile eq 'O''Brien''s.pdf'"
        );
    }

    #[test]
    fn delete_action_wire_form() {
        let json = IndexAction::Delete("doc-1".into()).to_json();
        assert_eq!(
            json,
            serde_json::json!({"id": "doc-1", "@search.action": "delete"})
        );
    }

    #[test]
    fn index_definition_keeps_unknown_properties() {
        let raw = serde_json::json!({
            "name": "idx",
            "fields": [
                {"name": "id", "type": "Edm.String", "key": true, "retrievable": true}
            ],
            "corsOptions": {"allowedOrigins": ["*"]},
            "@odata.etag": "\"0x1\""
        });
        let def: IndexDefinition = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(def.field("id").unwrap().key, Some(true));
        assert_eq!(serde_json::to_value(&def).unwrap(), raw);
    }

    #[test]
    fn string_list_tolerates_missing_field() {
        let doc: Map<String, Value> =
            serde_json::from_value(serde_json::json!({"oids": ["u1", "u2"]})).unwrap();
        assert_eq!(string_list(&doc, "oids"), vec!["u1", "u2"]);
        assert!(string_list(&doc, "groups").is_empty());
    }
}
