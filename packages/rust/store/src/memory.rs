//! In-memory [`DocumentStore`] for tests and offline runs.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use chunkflow_shared::{ChunkflowError, Result};

use crate::{DOCUMENT_ALREADY_EXISTS, DocumentStore, InsertError, InsertReport};

/// HashMap-backed document store with the same conflict semantics as the
/// HTTP store: inserting an existing `_id` yields a per-document
/// `DOCUMENT_ALREADY_EXISTS` error, not a failed call.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, HashMap::len)
    }

    /// Fetch a document without going through the trait (test convenience).
    pub async fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned()
    }
}

fn doc_id(document: &Value) -> Result<String> {
    document
        .get("_id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| ChunkflowError::validation("document is missing a string _id"))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self.get(collection, id).await)
    }

    async fn find_one_and_replace(
        &self,
        collection: &str,
        id: &str,
        document: Value,
    ) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_owned())
            .or_default()
            .insert(id.to_owned(), document);
        Ok(())
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<InsertReport> {
        let mut collections = self.collections.write().await;
        let coll = collections.entry(collection.to_owned()).or_default();

        let mut report = InsertReport::default();
        for document in documents {
            let id = doc_id(&document)?;
            if coll.contains_key(&id) {
                report.errors.push(InsertError {
                    code: DOCUMENT_ALREADY_EXISTS.into(),
                    message: format!("document {id} already exists"),
                });
            } else {
                coll.insert(id.clone(), document);
                report.inserted_ids.push(id);
            }
        }
        Ok(report)
    }

    async fn delete_many(&self, collection: &str, ids: &[String]) -> Result<u64> {
        let mut collections = self.collections.write().await;
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut deleted = 0;
        for id in ids {
            if coll.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
