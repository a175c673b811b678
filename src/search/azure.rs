//! Azure AI Search REST adapter.
//!
//! | Method | REST call |
//! |--------|-----------|
//! | `get_index` | `GET /indexes/{name}` (404 → `None`) |
//! | `create_index` | `POST /indexes` |
//! | `create_or_update_index` | `PUT /indexes/{name}` |
//! | `index_documents` | `POST /indexes/{name}/docs/index` |
//! | `search` | `POST /indexes/{name}/docs/search` |
//! | `document_count` | `GET /indexes/{name}/docs/$count` |
//!
//! All calls carry the `api-key` header and `api-version=2023-11-01`.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};

use super::{IndexAction, IndexDefinition, SearchIndexService, SearchPage, SearchRequest};

const API_VERSION: &str = "2023-11-01";

/// A search service endpoint authorized with an admin key.
#[derive(Clone)]
pub struct AzureSearchService {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AzureSearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureSearchService")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct IndexingResponse {
    #[serde(default)]
    value: Vec<IndexingResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexingResult {
    key: String,
    status: bool,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    status_code: Option<u16>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(rename = "@odata.count", default)]
    count: Option<u64>,
    #[serde(default)]
    value: Vec<Map<String, Value>>,
}

impl AzureSearchService {
    pub fn new(endpoint: &str, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, API_VERSION)
    }

    async fn send(
        &self,
        method: Method,
        operation: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .request(method, self.url(path))
            .header("api-key", &self.api_key);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::provider(operation, e))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(format!("{} ({})", path, operation)));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::debug!(%status, operation, body = %text, "search request failed");
            return Err(SyncError::provider(
                operation,
                format!("HTTP {}: {}", status, text),
            ));
        }
        Ok(resp)
    }
}

#[async_trait]
impl SearchIndexService for AzureSearchService {
    async fn get_index(&self, name: &str) -> Result<Option<IndexDefinition>> {
        let path = format!("/indexes/{}", name);
        match self.send(Method::GET, "get index", &path, None).await {
            Ok(resp) => {
                let def = resp
                    .json::<IndexDefinition>()
                    .await
                    .map_err(|e| SyncError::provider("get index", e))?;
                Ok(Some(def))
            }
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_index(&self, index: &IndexDefinition) -> Result<()> {
        let body = serde_json::to_value(index)?;
        self.send(Method::POST, "create index", "/indexes", Some(body))
            .await?;
        Ok(())
    }

    async fn create_or_update_index(&self, index: &IndexDefinition) -> Result<()> {
        let body = serde_json::to_value(index)?;
        let path = format!("/indexes/{}", index.name);
        self.send(Method::PUT, "update index", &path, Some(body))
            .await?;
        Ok(())
    }

    async fn index_documents(&self, index: &str, actions: Vec<IndexAction>) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        let count = actions.len();
        let body = serde_json::json!({
            "value": actions.iter().map(IndexAction::to_json).collect::<Vec<_>>(),
        });
        let path = format!("/indexes/{}/docs/index", index);
        let resp = self
            .send(Method::POST, "index documents", &path, Some(body))
            .await?;

        let multi_status = resp.status() == StatusCode::MULTI_STATUS;
        let parsed: IndexingResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::provider("index documents", e))?;
        let failed: Vec<String> = parsed
            .value
            .iter()
            .filter(|r| !r.status)
            .map(|r| {
                format!(
                    "{} ({}): {}",
                    r.key,
                    r.status_code.unwrap_or_default(),
                    r.error_message.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        if multi_status || !failed.is_empty() {
            return Err(SyncError::provider(
                "index documents",
                format!(
                    "{} of {} documents failed: {}",
                    failed.len(),
                    count,
                    failed.join("; ")
                ),
            ));
        }
        tracing::debug!(index, count, "indexed documents");
        Ok(())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchPage> {
        let mut body = Map::new();
        body.insert(
            "search".to_string(),
            Value::String(request.search_text.clone().unwrap_or_else(|| "*".to_string())),
        );
        if let Some(filter) = &request.filter {
            body.insert("filter".to_string(), Value::String(filter.clone()));
        }
        if let Some(top) = request.top {
            body.insert("top".to_string(), Value::from(top));
        }
        if let Some(skip) = request.skip {
            body.insert("skip".to_string(), Value::from(skip));
        }
        if request.include_total_count {
            body.insert("count".to_string(), Value::Bool(true));
        }
        let path = format!("/indexes/{}/docs/search", index);
        let resp = self
            .send(Method::POST, "search", &path, Some(Value::Object(body)))
            .await?;
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::provider("search", e))?;
        Ok(SearchPage {
            count: parsed.count,
            documents: parsed.value,
        })
    }

    async fn document_count(&self, index: &str) -> Result<u64> {
        let path = format!("/indexes/{}/docs/$count", index);
        let text = self
            .send(Method::GET, "count documents", &path, None)
            .await?
            .text()
            .await
            .map_err(|e| SyncError::provider("count documents", e))?;
        text.trim_start_matches('\u{feff}')
            .trim()
            .parse()
            .map_err(|_| SyncError::provider("count documents", format!("bad count '{}'", text)))
    }
}
