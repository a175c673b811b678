//! Azure Data Lake Storage Gen2 backend.
//!
//! Talks to the DFS REST endpoint directly (`https://<account>.dfs.core.windows.net`)
//! using `reqwest`. Requests are authenticated either with a bearer token or
//! with Shared Key signing (HMAC-SHA256 over a canonicalized request), which
//! needs only the pure-Rust `hmac` + `sha2` crates.
//!
//! # Operations
//!
//! | Method | REST call |
//! |--------|-----------|
//! | `list_page` | `GET /{fs}?resource=filesystem&recursive=true` (paged via `x-ms-continuation`) |
//! | `download` | `GET /{fs}/{path}` |
//! | `access_control` | `HEAD /{fs}/{path}?action=getAccessControl&upn=false` → `x-ms-acl` |
//! | `upload` | `PUT ?resource=file`, `PATCH ?action=append`, `PATCH ?action=flush` |
//! | `delete` | `DELETE /{fs}/{path}` |

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde::Deserialize;
use sha2::Sha256;

use crate::error::{Result, SyncError};
use crate::models::PathEntry;

use super::{PathPage, StorageProvider};

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2023-11-03";
const LIST_PAGE_SIZE: usize = 5000;
/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
const FILETIME_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// How requests to the storage account are authorized.
#[derive(Clone)]
pub enum StorageCredential {
    /// Base64-encoded storage account key.
    SharedKey(String),
    /// OAuth bearer token.
    Bearer(String),
}

impl std::fmt::Debug for StorageCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageCredential::SharedKey(_) => f.write_str("SharedKey(..)"),
            StorageCredential::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

/// A Data Lake Storage Gen2 filesystem (container).
#[derive(Debug, Clone)]
pub struct AdlsStorage {
    account: String,
    filesystem: String,
    endpoint: String,
    credential: StorageCredential,
    client: reqwest::Client,
}

impl AdlsStorage {
    pub fn new(account: &str, filesystem: &str, credential: StorageCredential) -> Self {
        let endpoint = format!("https://{}.dfs.core.windows.net", account);
        Self::with_endpoint(account, filesystem, &endpoint, credential)
    }

    /// Use a custom endpoint (emulators, tests).
    pub fn with_endpoint(
        account: &str,
        filesystem: &str,
        endpoint: &str,
        credential: StorageCredential,
    ) -> Self {
        Self {
            account: account.to_string(),
            filesystem: filesystem.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credential,
            client: reqwest::Client::new(),
        }
    }

    fn encoded_path(&self, path: &str) -> String {
        let mut out = format!("/{}", uri_encode(&self.filesystem));
        let path = path.trim_matches('/');
        if !path.is_empty() {
            out.push('/');
            out.push_str(&path.split('/').map(uri_encode).collect::<Vec<_>>().join("/"));
        }
        out
    }

    /// Build, sign, and send one request. Non-success statuses become errors
    /// (`404` → `NotFound`).
    async fn send(
        &self,
        method: Method,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response> {
        let encoded_path = self.encoded_path(path);

        let mut sorted_query: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        sorted_query.sort_by(|a, b| a.0.cmp(&b.0));
        let query_string = sorted_query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let url = if query_string.is_empty() {
            format!("{}{}", self.endpoint, encoded_path)
        } else {
            format!("{}{}?{}", self.endpoint, encoded_path, query_string)
        };

        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let content_length = body.as_ref().map(|b| b.len()).unwrap_or(0);

        let mut req = self
            .client
            .request(method.clone(), &url)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION);

        let authorization = match &self.credential {
            StorageCredential::Bearer(token) => format!("Bearer {}", token),
            StorageCredential::SharedKey(key) => {
                let ms_headers = vec![
                    ("x-ms-date".to_string(), date.clone()),
                    ("x-ms-version".to_string(), API_VERSION.to_string()),
                ];
                let string_to_sign = shared_key_string_to_sign(
                    method.as_str(),
                    content_length,
                    "",
                    &ms_headers,
                    &self.account,
                    &encoded_path,
                    &sorted_query,
                );
                let signature = sign(key, &string_to_sign)?;
                format!("SharedKey {}:{}", self.account, signature)
            }
        };
        req = req.header("Authorization", authorization);

        if let Some(bytes) = body {
            req = req.body(bytes);
        } else if method == Method::PUT || method == Method::PATCH {
            req = req.body(Vec::new());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::provider(operation, format!("{} {}: {}", method, path, e)))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(SyncError::NotFound(format!("{}/{}", self.filesystem, path)));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SyncError::provider(
                operation,
                format!(
                    "HTTP {} for '{}': {}",
                    status,
                    path,
                    text.chars().take(500).collect::<String>()
                ),
            ));
        }
        Ok(resp)
    }
}

#[async_trait]
impl StorageProvider for AdlsStorage {
    async fn list_page(&self, directory: &str, continuation: Option<String>) -> Result<PathPage> {
        let mut query = vec![
            ("resource", "filesystem".to_string()),
            ("recursive", "true".to_string()),
            ("maxResults", LIST_PAGE_SIZE.to_string()),
        ];
        let directory = directory.trim_matches('/');
        if !directory.is_empty() {
            query.push(("directory", directory.to_string()));
        }
        if let Some(token) = continuation {
            query.push(("continuation", token));
        }

        let resp = self
            .send(Method::GET, "list paths", "", &query, None)
            .await?;
        let next = resp
            .headers()
            .get("x-ms-continuation")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string());
        let body = resp.text().await?;
        let entries = parse_path_list(&body)?;

        Ok(PathPage {
            entries,
            continuation: next,
        })
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let resp = self.send(Method::GET, "download", path, &[], None).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn access_control(&self, path: &str) -> Result<String> {
        let query = [
            ("action", "getAccessControl".to_string()),
            ("upn", "false".to_string()),
        ];
        let resp = self
            .send(Method::HEAD, "get access control", path, &query, None)
            .await?;
        Ok(resp
            .headers()
            .get("x-ms-acl")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string())
    }

    async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        self.send(
            Method::PUT,
            "create file",
            path,
            &[("resource", "file".to_string())],
            None,
        )
        .await?;
        if !data.is_empty() {
            self.send(
                Method::PATCH,
                "append",
                path,
                &[
                    ("action", "append".to_string()),
                    ("position", "0".to_string()),
                ],
                Some(data.to_vec()),
            )
            .await?;
        }
        self.send(
            Method::PATCH,
            "flush",
            path,
            &[
                ("action", "flush".to_string()),
                ("position", data.len().to_string()),
            ],
            None,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send(Method::DELETE, "delete", path, &[], None).await?;
        Ok(())
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, self.encoded_path(path))
    }
}

// ============ Listing ============

#[derive(Deserialize)]
struct PathListResponse {
    #[serde(default)]
    paths: Vec<RawPath>,
}

#[derive(Deserialize)]
struct RawPath {
    name: String,
    #[serde(rename = "isDirectory", default)]
    is_directory: Option<serde_json::Value>,
    #[serde(rename = "creationTime", default)]
    creation_time: Option<String>,
    #[serde(rename = "lastModified", default)]
    last_modified: Option<String>,
}

fn parse_path_list(body: &str) -> Result<Vec<PathEntry>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: PathListResponse = serde_json::from_str(body)?;
    Ok(parsed
        .paths
        .into_iter()
        .map(|p| {
            let is_directory = match p.is_directory {
                Some(serde_json::Value::Bool(b)) => b,
                Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
                _ => false,
            };
            let creation_time = p
                .creation_time
                .as_deref()
                .and_then(parse_storage_time)
                .or_else(|| p.last_modified.as_deref().and_then(parse_storage_time))
                .unwrap_or(DateTime::UNIX_EPOCH);
            PathEntry {
                name: p.name,
                is_directory,
                creation_time,
            }
        })
        .collect())
}

/// Parse a timestamp as reported by the DFS endpoint: either Windows FILETIME
/// ticks (100ns since 1601) or an RFC 2822 date.
fn parse_storage_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        let ticks: i64 = raw.parse().ok()?;
        let secs = ticks / 10_000_000 - FILETIME_EPOCH_OFFSET_SECS;
        let nanos = ((ticks % 10_000_000) * 100) as u32;
        return DateTime::from_timestamp(secs, nanos);
    }
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============ Shared Key signing ============

/// Build the Shared Key string-to-sign for a DFS request.
///
/// ```text
/// VERB \n Content-Encoding \n Content-Language \n Content-Length \n
/// Content-MD5 \n Content-Type \n Date \n If-Modified-Since \n If-Match \n
/// If-None-Match \n If-Unmodified-Since \n Range \n
/// CanonicalizedHeaders CanonicalizedResource
/// ```
fn shared_key_string_to_sign(
    verb: &str,
    content_length: usize,
    content_type: &str,
    ms_headers: &[(String, String)],
    account: &str,
    encoded_path: &str,
    sorted_query: &[(String, String)],
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut headers: Vec<(String, String)> = ms_headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let mut canonical_resource = format!("/{}{}", account, encoded_path);
    let mut params: Vec<(String, String)> = sorted_query
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));
    for (k, v) in params {
        canonical_resource.push_str(&format!("\n{}:{}", k, v));
    }

    format!(
        "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}{}",
        verb, length, content_type, canonical_headers, canonical_resource
    )
}

fn sign(account_key: &str, string_to_sign: &str) -> Result<String> {
    let key = BASE64
        .decode(account_key)
        .map_err(|e| SyncError::Config(format!("storage account key is not base64: {}", e)))?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| SyncError::Config(format!("invalid storage account key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// URI-encode per RFC 3986, leaving unreserved characters as-is.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
