//! Application configuration for chunkflow.
//!
//! User config lives at `~/.chunkflow/chunkflow.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ChunkflowError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "chunkflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".chunkflow";

// ---------------------------------------------------------------------------
// Config structs (matching chunkflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline concurrency and admission settings.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Text splitting policy.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Document store connection settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Embedding service settings.
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Admission budget: max articles fed into the pipeline per run.
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Concurrent article fetches.
    #[serde(default = "default_load_concurrency")]
    pub load_concurrency: usize,

    /// Concurrent chunking transforms.
    #[serde(default = "default_chunk_concurrency")]
    pub chunk_concurrency: usize,

    /// Concurrent snapshot reads + diffs.
    #[serde(default = "default_diff_concurrency")]
    pub diff_concurrency: usize,

    /// Concurrent embedding calls.
    #[serde(default = "default_vectorize_concurrency")]
    pub vectorize_concurrency: usize,

    /// Concurrent store reconciliations.
    #[serde(default = "default_store_concurrency")]
    pub store_concurrency: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            load_concurrency: default_load_concurrency(),
            chunk_concurrency: default_chunk_concurrency(),
            diff_concurrency: default_diff_concurrency(),
            vectorize_concurrency: default_vectorize_concurrency(),
            store_concurrency: default_store_concurrency(),
        }
    }
}

fn default_max_items() -> usize {
    100
}
fn default_load_concurrency() -> usize {
    10
}
fn default_chunk_concurrency() -> usize {
    2
}
fn default_diff_concurrency() -> usize {
    5
}
fn default_vectorize_concurrency() -> usize {
    5
}
fn default_store_concurrency() -> usize {
    3
}

/// `[chunking]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters of overlap between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    100
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the JSON document API.
    #[serde(default)]
    pub endpoint: String,

    /// Namespace (keyspace) holding the collections.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Name of the env var holding the access token (never the token itself).
    #[serde(default = "default_store_token_env")]
    pub token_env: String,

    /// Collection for chunk embedding documents.
    #[serde(default = "default_embeddings_collection")]
    pub embeddings_collection: String,

    /// Collection for per-article chunk snapshots.
    #[serde(default = "default_snapshots_collection")]
    pub snapshots_collection: String,

    /// Collection for the rolling recent-articles registry.
    #[serde(default = "default_recent_collection")]
    pub recent_collection: String,

    /// Capacity of the recent-articles registry.
    #[serde(default = "default_recent_cap")]
    pub recent_cap: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            namespace: default_namespace(),
            token_env: default_store_token_env(),
            embeddings_collection: default_embeddings_collection(),
            snapshots_collection: default_snapshots_collection(),
            recent_collection: default_recent_collection(),
            recent_cap: default_recent_cap(),
        }
    }
}

fn default_namespace() -> String {
    "chunkflow".into()
}
fn default_store_token_env() -> String {
    "CHUNKFLOW_STORE_TOKEN".into()
}
fn default_embeddings_collection() -> String {
    "chunk_embeddings".into()
}
fn default_snapshots_collection() -> String {
    "chunk_snapshots".into()
}
fn default_recent_collection() -> String {
    "recent_articles".into()
}
fn default_recent_cap() -> usize {
    crate::types::DEFAULT_RECENT_CAP
}

/// `[embeddings]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Embeddings endpoint (OpenAI-compatible `/v1/embeddings`).
    #[serde(default = "default_embeddings_endpoint")]
    pub endpoint: String,

    /// Model identifier sent with each request.
    #[serde(default = "default_embeddings_model")]
    pub model: String,

    /// Name of the env var holding the API key (never the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embeddings_endpoint(),
            model: default_embeddings_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_embeddings_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".into()
}
fn default_embeddings_model() -> String {
    "text-embedding-3-small".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration — merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_items: usize,
    pub load_concurrency: usize,
    pub chunk_concurrency: usize,
    pub diff_concurrency: usize,
    pub vectorize_concurrency: usize,
    pub store_concurrency: usize,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_items: config.pipeline.max_items,
            load_concurrency: config.pipeline.load_concurrency,
            chunk_concurrency: config.pipeline.chunk_concurrency,
            diff_concurrency: config.pipeline.diff_concurrency,
            vectorize_concurrency: config.pipeline.vectorize_concurrency,
            store_concurrency: config.pipeline.store_concurrency,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.chunkflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ChunkflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.chunkflow/chunkflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ChunkflowError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ChunkflowError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ChunkflowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ChunkflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ChunkflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
