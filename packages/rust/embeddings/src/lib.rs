//! Embedding computation for chunkflow.
//!
//! [`Embedder`] is the seam the pipeline core depends on; [`HttpEmbedder`]
//! talks to an OpenAI-compatible `/v1/embeddings` endpoint. The contract is
//! strict: one vector per input text, in input order.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use chunkflow_shared::{ChunkflowError, EmbeddingsConfig, Result};

/// Computes embedding vectors for chunk texts.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning one vector per text in the same order.
    /// Fails with [`ChunkflowError::Embed`].
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// HTTP embedder against an OpenAI-style embeddings API.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ChunkflowError::Embed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        })
    }

    /// Build an embedder from config, reading the API key from the
    /// configured env var.
    pub fn from_config(config: &EmbeddingsConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ChunkflowError::config(format!(
                "embeddings API key not found. Set the {} environment variable.",
                config.api_key_env
            ))
        })?;
        Self::new(config.endpoint.clone(), config.model.clone(), api_key)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(count = texts.len(), model = %self.model, "requesting embeddings");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(|e| ChunkflowError::Embed(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChunkflowError::Embed(format!(
                "{}: HTTP {status}: {body}",
                self.endpoint
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| ChunkflowError::Embed(format!("invalid embeddings response: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(ChunkflowError::Embed(format!(
                "embedding count mismatch: sent {} texts, got {} vectors",
                texts.len(),
                parsed.data.len()
            )));
        }

        // The API may return items out of order; restore input order by index.
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for item in parsed.data {
            let slot = vectors.get_mut(item.index).ok_or_else(|| {
                ChunkflowError::Embed(format!("embedding index {} out of range", item.index))
            })?;
            *slot = Some(item.embedding);
        }

        vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                v.ok_or_else(|| ChunkflowError::Embed(format!("missing embedding for index {i}")))
            })
            .collect()
    }
}
