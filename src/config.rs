use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub removal: RemovalConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Local,
    Adls,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageAuth {
    #[default]
    SharedKey,
    Bearer,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub kind: StorageKind,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub filesystem: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub auth: StorageAuth,
    #[serde(default = "default_storage_credential_env")]
    pub credential_env: String,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_storage_credential_env() -> String {
    "AZURE_STORAGE_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub index_names: Vec<String>,
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub analyzer_name: Option<String>,
    #[serde(default)]
    pub use_acls: bool,
    #[serde(default)]
    pub search_images: bool,
    #[serde(default)]
    pub use_int_vectorization: bool,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_search_key_env() -> String {
    "AZURE_SEARCH_KEY".to_string()
}

impl SearchConfig {
    /// Index used by single-index operations (status, remove without fan-out).
    pub fn default_index(&self) -> &str {
        self.index_names.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            base_url: default_base_url(),
            api_key_env: default_embedding_key_env(),
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens: 500 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemovalConfig {
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_removal_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            max_passes: default_max_passes(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_removal_timeout_secs(),
        }
    }
}

fn default_max_passes() -> usize {
    50
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_removal_timeout_secs() -> u64 {
    300
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate storage
    match config.storage.kind {
        StorageKind::Local => {
            if config.storage.root.is_none() {
                anyhow::bail!("storage.root must be set when storage.kind is 'local'");
            }
        }
        StorageKind::Adls => {
            if config.storage.account.as_deref().unwrap_or("").is_empty() {
                anyhow::bail!("storage.account must be set when storage.kind is 'adls'");
            }
            if config.storage.filesystem.as_deref().unwrap_or("").is_empty() {
                anyhow::bail!("storage.filesystem must be set when storage.kind is 'adls'");
            }
        }
    }

    // Validate search
    if config.search.index_names.is_empty() {
        anyhow::bail!("search.index_names must name at least one index");
    }
    if config.search.index_names.iter().any(|n| n.trim().is_empty()) {
        anyhow::bail!("search.index_names must not contain empty names");
    }

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    // Validate removal
    if config.removal.max_passes == 0 {
        anyhow::bail!("removal.max_passes must be > 0");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
