//! JSON document API client.
//!
//! Every operation is a POST to `{endpoint}/{namespace}/{collection}` with a
//! single-command body (`findOne`, `findOneAndReplace`, `insertMany`,
//! `deleteMany`) and a `Token` auth header.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use chunkflow_shared::{ChunkflowError, Result, StoreConfig};

use crate::{DocumentStore, InsertError, InsertReport};

/// HTTP-backed [`DocumentStore`].
pub struct HttpStore {
    client: reqwest::Client,
    endpoint: String,
    namespace: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    status: Option<ApiStatus>,
    #[serde(default)]
    errors: Vec<InsertError>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    document: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiStatus {
    #[serde(rename = "insertedIds", default)]
    inserted_ids: Vec<String>,
    #[serde(rename = "deletedCount", default)]
    deleted_count: u64,
}

impl HttpStore {
    pub fn new(
        endpoint: impl Into<String>,
        namespace: impl Into<String>,
        token: String,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChunkflowError::store(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
            namespace: namespace.into(),
            token,
        })
    }

    /// Build a store client from config, reading the auth token from the
    /// configured env var.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).map_err(|_| {
            ChunkflowError::config(format!(
                "store token not found. Set the {} environment variable.",
                config.token_env
            ))
        })?;
        Self::new(config.endpoint.clone(), config.namespace.clone(), token)
    }

    async fn command(&self, collection: &str, body: Value) -> Result<ApiResponse> {
        let url = format!("{}/{}/{collection}", self.endpoint, self.namespace);
        debug!(%url, "store command");

        let response = self
            .client
            .post(&url)
            .header("Token", &self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChunkflowError::store(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChunkflowError::store(format!("{url}: HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| ChunkflowError::store(format!("invalid store response: {e}")))
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn find_one(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let response = self
            .command(collection, json!({"findOne": {"filter": {"_id": id}}}))
            .await?;
        Ok(response.data.and_then(|d| d.document))
    }

    async fn find_one_and_replace(
        &self,
        collection: &str,
        id: &str,
        document: Value,
    ) -> Result<()> {
        self.command(
            collection,
            json!({
                "findOneAndReplace": {
                    "filter": {"_id": id},
                    "replacement": document,
                    "options": {"upsert": true},
                }
            }),
        )
        .await?;
        Ok(())
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<InsertReport> {
        let response = self
            .command(
                collection,
                json!({
                    "insertMany": {
                        "documents": documents,
                        "options": {"ordered": false},
                    }
                }),
            )
            .await?;

        Ok(InsertReport {
            inserted_ids: response.status.unwrap_or_default().inserted_ids,
            errors: response.errors,
        })
    }

    async fn delete_many(&self, collection: &str, ids: &[String]) -> Result<u64> {
        let response = self
            .command(
                collection,
                json!({"deleteMany": {"filter": {"_id": {"$in": ids}}}}),
            )
            .await?;
        Ok(response.status.unwrap_or_default().deleted_count)
    }
}
