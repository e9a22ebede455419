//! Reconciliation: applying a vectorized diff to the document store.
//!
//! Inserts run in bounded unordered batches, tolerating already-exists
//! conflicts (the chunk `_id` is its content hash, so a conflict means the
//! document is already correct). Deletes are batched and idempotent. After
//! both succeed, the article's snapshot is replaced wholesale and the
//! rolling recent-articles registry is folded and persisted under a lock.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use chunkflow_shared::{
    ArticleRef, ArticleSummary, ChunkMeta, ChunkSnapshot, ChunkflowError, Metrics,
    RECENT_ARTICLES_ID, RecentArticles, Result, StoreConfig, VectoredChunk, VectoredDiff,
};

use crate::{DOCUMENT_ALREADY_EXISTS, DocumentStore, InsertError};

/// Maximum documents per bulk insert/delete call.
pub const BATCH_SIZE: usize = 20;

/// Embedding vector field in stored chunk documents.
const VECTOR_FIELD: &str = "$vector";

/// Collection names and registry capacity for one reconciler.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub embeddings_collection: String,
    pub snapshots_collection: String,
    pub recent_collection: String,
    pub recent_cap: usize,
}

impl From<&StoreConfig> for ReconcileConfig {
    fn from(config: &StoreConfig) -> Self {
        Self {
            embeddings_collection: config.embeddings_collection.clone(),
            snapshots_collection: config.snapshots_collection.clone(),
            recent_collection: config.recent_collection.clone(),
            recent_cap: config.recent_cap,
        }
    }
}

/// Applies vectorized diffs to the store.
pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    config: ReconcileConfig,
    metrics: Arc<Metrics>,
    /// Serializes registry fold + persist; concurrent store workers must not
    /// interleave read-modify-write cycles on the single registry document.
    recent: Mutex<RecentArticles>,
}

impl Reconciler {
    /// Open a reconciler, seeding the recent-articles registry from the
    /// store (or starting empty on first run).
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        config: ReconcileConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let recent = match store
            .find_one(&config.recent_collection, RECENT_ARTICLES_ID)
            .await?
        {
            Some(doc) => {
                let mut recent: RecentArticles = serde_json::from_value(strip_doc_id(doc))
                    .map_err(|e| {
                        ChunkflowError::store(format!("invalid recent-articles document: {e}"))
                    })?;
                recent.cap = config.recent_cap.max(1);
                recent.entries.truncate(recent.cap);
                recent
            }
            None => RecentArticles::with_cap(config.recent_cap),
        };

        Ok(Self {
            store,
            config,
            metrics,
            recent: Mutex::new(recent),
        })
    }

    /// Fetch the article's snapshot from its previous pass, if any.
    pub async fn load_snapshot(&self, url: &str) -> Result<Option<ChunkSnapshot>> {
        let Some(doc) = self
            .store
            .find_one(&self.config.snapshots_collection, url)
            .await?
        else {
            return Ok(None);
        };

        let snapshot: ChunkSnapshot = serde_json::from_value(doc)
            .map_err(|e| ChunkflowError::store(format!("invalid snapshot for {url}: {e}")))?;
        Metrics::incr(&self.metrics.articles_read);
        Ok(Some(snapshot))
    }

    /// Apply one article's diff: insert added chunks, delete removed ones,
    /// replace the snapshot, fold the registry.
    #[instrument(skip_all, fields(url = %diff.article_ref.url))]
    pub async fn apply(&self, diff: VectoredDiff) -> Result<()> {
        self.insert_chunks(&diff.article_ref, &diff.added).await?;
        self.delete_chunks(&diff.removed).await?;

        // Snapshot is the full current chunk set, not a merge.
        let current_meta = diff
            .added
            .iter()
            .map(|v| v.chunk.meta.clone())
            .chain(diff.unchanged.iter().map(|c| c.meta.clone()));
        let snapshot = ChunkSnapshot::from_chunk_meta(&diff.article_ref, current_meta);
        let chunk_count = snapshot.len();
        let updated_at = snapshot.updated_at;

        let doc = serde_json::to_value(&snapshot)
            .map_err(|e| ChunkflowError::store(format!("failed to serialize snapshot: {e}")))?;
        self.store
            .find_one_and_replace(&self.config.snapshots_collection, &snapshot.article_url, doc)
            .await?;

        self.record_recent(ArticleSummary {
            url: diff.article_ref.url.clone(),
            title: diff.article_ref.title.clone(),
            chunk_count,
            updated_at,
        })
        .await?;

        Metrics::incr(&self.metrics.articles_stored);
        info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            unchanged = diff.unchanged.len(),
            "article reconciled"
        );
        Ok(())
    }

    /// Insert added chunks in batches, tolerating already-exists conflicts.
    /// Any other per-document error aborts with the full error payload.
    pub async fn insert_chunks(
        &self,
        article_ref: &ArticleRef,
        added: &[VectoredChunk],
    ) -> Result<()> {
        for batch in added.chunks(BATCH_SIZE) {
            let documents: Vec<Value> =
                batch.iter().map(|v| chunk_document(article_ref, v)).collect();
            let batch_len = documents.len();

            let report = self
                .store
                .insert_many(&self.config.embeddings_collection, documents.clone())
                .await?;

            if let Some(fatal) = report
                .errors
                .iter()
                .find(|e| e.code != DOCUMENT_ALREADY_EXISTS)
            {
                return Err(insert_failure(fatal, &report.errors));
            }

            let collisions = report.errors.len();
            if collisions > 0 {
                Metrics::add(&self.metrics.chunk_collisions, collisions);
                warn!(
                    target: "existing_chunks",
                    url = %article_ref.url,
                    collisions,
                    skipped = ?skipped_documents(&documents, &report.inserted_ids),
                    "chunks already present in store"
                );
            }

            Metrics::add(&self.metrics.chunks_inserted, report.inserted_ids.len());
            debug!(
                inserted = report.inserted_ids.len(),
                of = batch_len,
                "chunk batch inserted"
            );
        }
        Ok(())
    }

    /// Delete removed chunks in batches. Already-absent documents are fine.
    pub async fn delete_chunks(&self, removed: &[ChunkMeta]) -> Result<u64> {
        let mut total = 0;
        for batch in removed.chunks(BATCH_SIZE) {
            let ids: Vec<String> = batch.iter().map(|m| m.hash.clone()).collect();
            let deleted = self
                .store
                .delete_many(&self.config.embeddings_collection, &ids)
                .await?;
            Metrics::add(&self.metrics.chunks_removed, deleted as usize);
            total += deleted;
        }
        Ok(total)
    }

    /// Fold one summary into the registry and persist it. The lock is held
    /// across both so concurrent applies cannot lose each other's entries.
    async fn record_recent(&self, summary: ArticleSummary) -> Result<()> {
        let mut recent = self.recent.lock().await;
        recent.fold(summary);

        let mut doc = serde_json::to_value(&*recent)
            .map_err(|e| ChunkflowError::store(format!("failed to serialize registry: {e}")))?;
        doc["_id"] = json!(RECENT_ARTICLES_ID);
        self.store
            .find_one_and_replace(&self.config.recent_collection, RECENT_ARTICLES_ID, doc)
            .await
    }
}

/// Stored chunk document. The content hash is the `_id`, which is what
/// makes duplicate inserts harmless.
fn chunk_document(article_ref: &ArticleRef, vectored: &VectoredChunk) -> Value {
    let mut doc = json!({
        "_id": vectored.chunk.meta.hash,
        "content": vectored.chunk.content,
        "article_url": article_ref.url,
        "index": vectored.chunk.meta.index,
        "length": vectored.chunk.meta.length,
        VECTOR_FIELD: vectored.vector,
    });
    if let Some(title) = &article_ref.title {
        doc["title"] = json!(title);
    }
    doc
}

/// Documents from a batch that did not land, with embedding vectors
/// stripped so log records stay readable.
fn skipped_documents(documents: &[Value], inserted_ids: &[String]) -> Vec<Value> {
    documents
        .iter()
        .filter(|d| {
            d.get("_id")
                .and_then(Value::as_str)
                .is_none_or(|id| !inserted_ids.iter().any(|i| i == id))
        })
        .map(|d| {
            let mut doc = d.clone();
            if let Some(obj) = doc.as_object_mut() {
                obj.remove(VECTOR_FIELD);
            }
            doc
        })
        .collect()
}

fn insert_failure(fatal: &InsertError, all: &[InsertError]) -> ChunkflowError {
    let payload = serde_json::to_string(all).unwrap_or_else(|_| format!("{all:?}"));
    ChunkflowError::store(format!(
        "bulk insert failed with {}: {payload}",
        fatal.code
    ))
}

fn strip_doc_id(mut doc: Value) -> Value {
    if let Some(obj) = doc.as_object_mut() {
        obj.remove("_id");
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InsertReport, MemoryStore};
    use async_trait::async_trait;
    use chunkflow_shared::Chunk;
    use std::sync::Mutex as StdMutex;

    fn test_config() -> ReconcileConfig {
        ReconcileConfig {
            embeddings_collection: "chunks".into(),
            snapshots_collection: "snapshots".into(),
            recent_collection: "recent".into(),
            recent_cap: 4,
        }
    }

    fn vectored(text: &str, index: usize) -> VectoredChunk {
        VectoredChunk {
            chunk: Chunk::new(text.into(), index),
            vector: vec![0.1, 0.2, 0.3],
        }
    }

    fn diff_for(url: &str, added: Vec<VectoredChunk>) -> VectoredDiff {
        VectoredDiff {
            article_ref: ArticleRef::with_title(url, "Title"),
            added,
            removed: Vec::new(),
            unchanged: Vec::new(),
        }
    }

    async fn open_reconciler(store: Arc<dyn DocumentStore>) -> (Reconciler, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::default());
        let reconciler = Reconciler::open(store, test_config(), Arc::clone(&metrics))
            .await
            .unwrap();
        (reconciler, metrics)
    }

    /// Store wrapper recording the size of every bulk call.
    struct RecordingStore {
        inner: MemoryStore,
        insert_batches: StdMutex<Vec<usize>>,
        delete_batches: StdMutex<Vec<usize>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                insert_batches: StdMutex::new(Vec::new()),
                delete_batches: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for RecordingStore {
        async fn find_one(&self, collection: &str, id: &str) -> Result<Option<Value>> {
            self.inner.find_one(collection, id).await
        }

        async fn find_one_and_replace(
            &self,
            collection: &str,
            id: &str,
            document: Value,
        ) -> Result<()> {
            self.inner.find_one_and_replace(collection, id, document).await
        }

        async fn insert_many(
            &self,
            collection: &str,
            documents: Vec<Value>,
        ) -> Result<InsertReport> {
            self.insert_batches.lock().unwrap().push(documents.len());
            self.inner.insert_many(collection, documents).await
        }

        async fn delete_many(&self, collection: &str, ids: &[String]) -> Result<u64> {
            self.delete_batches.lock().unwrap().push(ids.len());
            self.inner.delete_many(collection, ids).await
        }
    }

    /// Store whose bulk insert reports a non-duplicate failure.
    struct FailingStore;

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn find_one(&self, _: &str, _: &str) -> Result<Option<Value>> {
            Ok(None)
        }

        async fn find_one_and_replace(&self, _: &str, _: &str, _: Value) -> Result<()> {
            Ok(())
        }

        async fn insert_many(&self, _: &str, _: Vec<Value>) -> Result<InsertReport> {
            Ok(InsertReport {
                inserted_ids: Vec::new(),
                errors: vec![InsertError {
                    code: "TOO_MANY_INDEXES".into(),
                    message: "collection limit reached".into(),
                }],
            })
        }

        async fn delete_many(&self, _: &str, _: &[String]) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn inserts_run_in_bounded_batches() {
        let store = Arc::new(RecordingStore::new());
        let (reconciler, _) = open_reconciler(Arc::clone(&store) as _).await;

        let added: Vec<VectoredChunk> = (0..45).map(|i| vectored(&format!("chunk {i}"), i)).collect();
        reconciler
            .insert_chunks(&ArticleRef::new("https://example.com/a"), &added)
            .await
            .unwrap();

        assert_eq!(*store.insert_batches.lock().unwrap(), vec![20, 20, 5]);
        assert_eq!(store.inner.count("chunks").await, 45);
    }

    #[tokio::test]
    async fn deletes_run_in_bounded_batches() {
        let store = Arc::new(RecordingStore::new());
        let (reconciler, metrics) = open_reconciler(Arc::clone(&store) as _).await;

        let added: Vec<VectoredChunk> = (0..25).map(|i| vectored(&format!("chunk {i}"), i)).collect();
        reconciler
            .insert_chunks(&ArticleRef::new("https://example.com/a"), &added)
            .await
            .unwrap();

        let removed: Vec<ChunkMeta> = added.iter().map(|v| v.chunk.meta.clone()).collect();
        let deleted = reconciler.delete_chunks(&removed).await.unwrap();

        assert_eq!(deleted, 25);
        assert_eq!(*store.delete_batches.lock().unwrap(), vec![20, 5]);
        assert_eq!(metrics.snapshot().chunks_removed, 25);
    }

    #[tokio::test]
    async fn duplicate_inserts_are_tolerated_and_counted() {
        let store = Arc::new(MemoryStore::new());
        let article_ref = ArticleRef::new("https://example.com/a");
        let already = vectored("already stored", 0);
        store
            .insert_many("chunks", vec![chunk_document(&article_ref, &already)])
            .await
            .unwrap();

        // One duplicate among 19 fresh chunks, filling a whole batch: the
        // batch must not abort and the fresh 19 must all land.
        let mut added = vec![already];
        added.extend((1..BATCH_SIZE).map(|i| vectored(&format!("fresh {i}"), i)));
        assert_eq!(added.len(), BATCH_SIZE);

        let (reconciler, metrics) = open_reconciler(Arc::clone(&store) as _).await;
        reconciler.insert_chunks(&article_ref, &added).await.unwrap();

        let snap = metrics.snapshot();
        assert_eq!(snap.chunk_collisions, 1);
        assert_eq!(snap.chunks_inserted, 19);
        assert_eq!(store.count("chunks").await, 20);
    }

    #[tokio::test]
    async fn non_duplicate_insert_error_aborts() {
        let (reconciler, metrics) = open_reconciler(Arc::new(FailingStore)).await;
        let err = reconciler
            .insert_chunks(&ArticleRef::new("https://example.com/a"), &[vectored("x", 0)])
            .await
            .unwrap_err();

        assert!(matches!(err, ChunkflowError::Store(_)));
        assert!(err.to_string().contains("TOO_MANY_INDEXES"));
        assert_eq!(metrics.snapshot().chunks_inserted, 0);
    }

    #[tokio::test]
    async fn apply_replaces_snapshot_wholesale() {
        let store = Arc::new(MemoryStore::new());
        let (reconciler, _) = open_reconciler(Arc::clone(&store) as _).await;

        let first = diff_for("https://example.com/a", vec![vectored("v1", 0), vectored("v1b", 1)]);
        reconciler.apply(first).await.unwrap();

        // Second pass: entirely different chunk set. The snapshot must hold
        // only the new hashes, not a merge.
        let second = VectoredDiff {
            article_ref: ArticleRef::with_title("https://example.com/a", "Title"),
            added: vec![vectored("v2", 0)],
            removed: vec![Chunk::new("v1".into(), 0).meta, Chunk::new("v1b".into(), 1).meta],
            unchanged: Vec::new(),
        };
        reconciler.apply(second).await.unwrap();

        let doc = store
            .get("snapshots", "https://example.com/a")
            .await
            .unwrap();
        let snapshot: ChunkSnapshot = serde_json::from_value(doc).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains(&Chunk::new("v2".into(), 0).meta.hash));

        // Removed chunk documents are gone from the embeddings collection.
        assert_eq!(store.count("chunks").await, 1);
    }

    #[tokio::test]
    async fn apply_folds_recent_registry() {
        let store = Arc::new(MemoryStore::new());
        let (reconciler, metrics) = open_reconciler(Arc::clone(&store) as _).await;

        reconciler
            .apply(diff_for("https://example.com/a", vec![vectored("a", 0)]))
            .await
            .unwrap();
        reconciler
            .apply(diff_for("https://example.com/b", vec![vectored("b", 0)]))
            .await
            .unwrap();
        reconciler
            .apply(diff_for("https://example.com/a", vec![vectored("a2", 0)]))
            .await
            .unwrap();

        let doc = store.get("recent", RECENT_ARTICLES_ID).await.unwrap();
        let recent: RecentArticles = serde_json::from_value(strip_doc_id(doc)).unwrap();

        let urls: Vec<&str> = recent.entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, ["https://example.com/a", "https://example.com/b"]);
        assert_eq!(metrics.snapshot().articles_stored, 3);
    }

    #[tokio::test]
    async fn open_seeds_registry_from_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let (reconciler, _) = open_reconciler(Arc::clone(&store) as _).await;
            reconciler
                .apply(diff_for("https://example.com/a", vec![vectored("a", 0)]))
                .await
                .unwrap();
        }

        // A fresh reconciler sees the persisted registry and keeps folding.
        let (reconciler, _) = open_reconciler(Arc::clone(&store) as _).await;
        reconciler
            .apply(diff_for("https://example.com/b", vec![vectored("b", 0)]))
            .await
            .unwrap();

        let doc = store.get("recent", RECENT_ARTICLES_ID).await.unwrap();
        let recent: RecentArticles = serde_json::from_value(strip_doc_id(doc)).unwrap();
        assert_eq!(recent.entries.len(), 2);
        assert_eq!(recent.entries[0].url, "https://example.com/b");
    }

    #[tokio::test]
    async fn load_snapshot_counts_previous_passes() {
        let store = Arc::new(MemoryStore::new());
        let (reconciler, metrics) = open_reconciler(Arc::clone(&store) as _).await;

        assert!(reconciler
            .load_snapshot("https://example.com/a")
            .await
            .unwrap()
            .is_none());
        assert_eq!(metrics.snapshot().articles_read, 0);

        reconciler
            .apply(diff_for("https://example.com/a", vec![vectored("a", 0)]))
            .await
            .unwrap();

        let snapshot = reconciler
            .load_snapshot("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(metrics.snapshot().articles_read, 1);
    }

    #[test]
    fn skipped_documents_strip_vectors() {
        let article_ref = ArticleRef::new("https://example.com/a");
        let docs = vec![
            chunk_document(&article_ref, &vectored("kept", 0)),
            chunk_document(&article_ref, &vectored("skipped", 1)),
        ];
        let kept_id = docs[0]["_id"].as_str().unwrap().to_owned();

        let skipped = skipped_documents(&docs, std::slice::from_ref(&kept_id));
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0]["content"], "skipped");
        assert!(skipped[0].get(VECTOR_FIELD).is_none());
    }
}
