//! Document store access and reconciliation for chunkflow.
//!
//! This crate provides:
//! - [`DocumentStore`] — the typed store-client seam (find / upsert /
//!   unordered bulk insert with per-document errors / bulk delete)
//! - [`MemoryStore`] — in-memory implementation for tests and offline runs
//! - [`HttpStore`] — JSON document API client
//! - [`Reconciler`] — batched insert/delete with duplicate tolerance,
//!   snapshot upsert, and the rolling recent-articles registry

mod http;
mod memory;
mod reconcile;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chunkflow_shared::Result;

pub use http::HttpStore;
pub use memory::MemoryStore;
pub use reconcile::{BATCH_SIZE, ReconcileConfig, Reconciler};

/// Error code a store reports when an inserted `_id` already exists.
/// This is the one insert failure the reconciler tolerates.
pub const DOCUMENT_ALREADY_EXISTS: &str = "DOCUMENT_ALREADY_EXISTS";

/// One per-document failure from an unordered bulk insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertError {
    /// Machine-readable error code (e.g. [`DOCUMENT_ALREADY_EXISTS`]).
    #[serde(rename = "errorCode")]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Outcome of an unordered bulk insert: which documents landed, and the
/// per-document failures for those that did not.
#[derive(Debug, Clone, Default)]
pub struct InsertReport {
    pub inserted_ids: Vec<String>,
    pub errors: Vec<InsertError>,
}

/// Typed access to a JSON document store.
///
/// `insert_many` is unordered and allows partial failures: per-document
/// conflicts come back inside the [`InsertReport`], and only
/// transport-level problems fail the call itself. Callers decide which
/// reported error codes they tolerate.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by `_id`. `None` when absent.
    async fn find_one(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Replace the document with `_id == id`, inserting it if absent.
    async fn find_one_and_replace(&self, collection: &str, id: &str, document: Value)
    -> Result<()>;

    /// Unordered bulk insert with partial failures surfaced per document.
    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<InsertReport>;

    /// Delete documents by `_id`. Absent ids are not errors; returns the
    /// number actually deleted.
    async fn delete_many(&self, collection: &str, ids: &[String]) -> Result<u64>;
}
