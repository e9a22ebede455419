//! Ingest orchestration: wiring the stage transforms into a pipeline run.

use std::sync::Arc;

use tracing::{info, instrument};

use chunkflow_pipeline::{Pipeline, PipelineBuilder, StageFailure};
use chunkflow_shared::{ArticleRef, MetricsSnapshot, PipelineConfig};

use crate::process::ProcessContext;

/// Outcome of one ingest run.
#[derive(Debug)]
pub struct IngestReport {
    /// Articles accepted past the admission cap.
    pub admitted: usize,
    /// Articles turned away by the cap.
    pub rejected: usize,
    /// Articles fully reconciled into the store.
    pub completed: usize,
    /// Per-article failures, with the stage that dropped them.
    pub failures: Vec<StageFailure>,
    /// Counter totals for the run.
    pub metrics: MetricsSnapshot,
}

/// Build the five-stage ingest pipeline: load → chunk → diff → vectorize
/// → store, each with its own worker pool.
pub fn build_pipeline(ctx: Arc<ProcessContext>, config: &PipelineConfig) -> Pipeline<ArticleRef> {
    let load_ctx = Arc::clone(&ctx);
    let chunk_ctx = Arc::clone(&ctx);
    let diff_ctx = Arc::clone(&ctx);
    let vectorize_ctx = Arc::clone(&ctx);
    let store_ctx = ctx;

    PipelineBuilder::new()
        .stage("load", config.load_concurrency, move |article_ref| {
            let ctx = Arc::clone(&load_ctx);
            async move { ctx.load(article_ref).await }
        })
        .stage("chunk", config.chunk_concurrency, move |article| {
            let ctx = Arc::clone(&chunk_ctx);
            async move { ctx.chunk(article).await }
        })
        .stage("diff", config.diff_concurrency, move |chunked| {
            let ctx = Arc::clone(&diff_ctx);
            async move { ctx.diff(chunked).await }
        })
        .stage("vectorize", config.vectorize_concurrency, move |diff| {
            let ctx = Arc::clone(&vectorize_ctx);
            async move { ctx.vectorize(diff).await }
        })
        .finish("store", config.store_concurrency, move |vectored| {
            let ctx = Arc::clone(&store_ctx);
            async move { ctx.store(vectored).await }
        })
        .with_max_items(config.max_items)
}

/// Run one ingest pass over `article_refs`.
#[instrument(skip_all, fields(articles = article_refs.len()))]
pub async fn ingest(
    ctx: Arc<ProcessContext>,
    config: &PipelineConfig,
    article_refs: Vec<ArticleRef>,
) -> IngestReport {
    let metrics = Arc::clone(&ctx.metrics);
    let pipeline = build_pipeline(ctx, config);

    // The first rejected admission means the cap is spent; stop feeding.
    let mut rejected = 0;
    let mut refs = article_refs.into_iter();
    while let Some(article_ref) = refs.next() {
        if !pipeline.push(article_ref).await {
            rejected = 1 + refs.len();
            info!(rejected, "admission cap reached, feed stopped");
            break;
        }
    }

    let report = pipeline.shutdown().await;
    let metrics = metrics.snapshot();
    info!(
        admitted = report.admitted,
        rejected,
        completed = report.completed,
        failed = report.failed(),
        "ingest pass finished"
    );

    IngestReport {
        admitted: report.admitted,
        rejected,
        completed: report.completed,
        failures: report.failures,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    use chunkflow_chunker::TextSplitter;
    use chunkflow_embeddings::Embedder;
    use chunkflow_loader::ContentLoader;
    use chunkflow_shared::{Article, ChunkflowError, Metrics, Result, content_hash};
    use chunkflow_store::{DocumentStore, MemoryStore, ReconcileConfig, Reconciler};

    /// Loader serving canned bodies; unknown URLs fail like a dead link.
    struct FakeLoader {
        bodies: HashMap<String, String>,
    }

    #[async_trait]
    impl ContentLoader for FakeLoader {
        async fn fetch(&self, article_ref: &ArticleRef) -> Result<Article> {
            let content = self
                .bodies
                .get(&article_ref.url)
                .cloned()
                .ok_or_else(|| ChunkflowError::Fetch(format!("{}: HTTP 404", article_ref.url)))?;
            Ok(Article {
                article_ref: article_ref.clone(),
                content,
            })
        }
    }

    /// Deterministic embedder: one short vector per text.
    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            max_items: 100,
            load_concurrency: 4,
            chunk_concurrency: 2,
            diff_concurrency: 2,
            vectorize_concurrency: 2,
            store_concurrency: 2,
        }
    }

    async fn context_with(
        store: Arc<MemoryStore>,
        bodies: &[(&str, &str)],
    ) -> Arc<ProcessContext> {
        let metrics = Arc::new(Metrics::default());
        let reconciler = Reconciler::open(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            ReconcileConfig {
                embeddings_collection: "chunks".into(),
                snapshots_collection: "snapshots".into(),
                recent_collection: "recent".into(),
                recent_cap: 8,
            },
            Arc::clone(&metrics),
        )
        .await
        .unwrap();

        Arc::new(ProcessContext {
            loader: Arc::new(FakeLoader {
                bodies: bodies
                    .iter()
                    .map(|(u, b)| ((*u).to_owned(), (*b).to_owned()))
                    .collect(),
            }),
            splitter: TextSplitter::new(40, 0),
            embedder: Arc::new(FakeEmbedder),
            reconciler: Arc::new(reconciler),
            metrics,
        })
    }

    #[tokio::test]
    async fn first_pass_stores_everything() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context_with(
            Arc::clone(&store),
            &[
                ("https://example.com/a", "alpha body text"),
                ("https://example.com/b", "beta body text"),
            ],
        )
        .await;

        let report = ingest(
            ctx,
            &test_config(),
            vec![
                ArticleRef::new("https://example.com/a"),
                ArticleRef::new("https://example.com/b"),
            ],
        )
        .await;

        assert_eq!(report.admitted, 2);
        assert_eq!(report.completed, 2);
        assert!(report.failures.is_empty());
        assert_eq!(report.metrics.articles_stored, 2);
        assert_eq!(report.metrics.chunks_new, report.metrics.chunks_created);

        // One chunk document per body, one snapshot per article.
        assert_eq!(store.count("chunks").await, 2);
        assert_eq!(store.count("snapshots").await, 2);
        let chunk = store
            .get("chunks", &content_hash("alpha body text"))
            .await
            .unwrap();
        assert_eq!(chunk["article_url"], "https://example.com/a");
    }

    #[tokio::test]
    async fn second_pass_with_same_content_embeds_nothing() {
        let store = Arc::new(MemoryStore::new());
        let bodies = [("https://example.com/a", "stable body text")];

        let ctx = context_with(Arc::clone(&store), &bodies).await;
        ingest(
            Arc::clone(&ctx),
            &test_config(),
            vec![ArticleRef::new("https://example.com/a")],
        )
        .await;

        // Fresh context, fresh metrics: only the second pass counts.
        let ctx = context_with(Arc::clone(&store), &bodies).await;
        let report = ingest(
            ctx,
            &test_config(),
            vec![ArticleRef::new("https://example.com/a")],
        )
        .await;

        assert_eq!(report.completed, 1);
        assert_eq!(report.metrics.chunks_new, 0);
        assert_eq!(report.metrics.chunks_vectorized, 0);
        assert_eq!(report.metrics.chunks_unchanged, 1);
        assert_eq!(report.metrics.articles_read, 1);
        assert_eq!(store.count("chunks").await, 1);
    }

    #[tokio::test]
    async fn changed_content_swaps_the_changed_chunk() {
        let store = Arc::new(MemoryStore::new());

        let ctx = context_with(Arc::clone(&store), &[("https://example.com/a", "version one")])
            .await;
        ingest(
            ctx,
            &test_config(),
            vec![ArticleRef::new("https://example.com/a")],
        )
        .await;

        let ctx = context_with(Arc::clone(&store), &[("https://example.com/a", "version two")])
            .await;
        let report = ingest(
            ctx,
            &test_config(),
            vec![ArticleRef::new("https://example.com/a")],
        )
        .await;

        assert_eq!(report.metrics.chunks_new, 1);
        assert_eq!(report.metrics.chunks_deleted, 1);
        assert_eq!(report.metrics.chunks_removed, 1);

        assert!(store
            .get("chunks", &content_hash("version two"))
            .await
            .is_some());
        assert!(store
            .get("chunks", &content_hash("version one"))
            .await
            .is_none());
        assert_eq!(store.count("chunks").await, 1);
    }

    #[tokio::test]
    async fn dead_link_fails_alone() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context_with(Arc::clone(&store), &[("https://example.com/a", "good body")])
            .await;

        let report = ingest(
            ctx,
            &test_config(),
            vec![
                ArticleRef::new("https://example.com/a"),
                ArticleRef::new("https://example.com/dead"),
            ],
        )
        .await;

        assert_eq!(report.admitted, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, "load");
        assert!(report.failures[0].error.contains("404"));
        assert_eq!(store.count("snapshots").await, 1);
    }

    #[tokio::test]
    async fn admission_cap_rejects_overflow() {
        let store = Arc::new(MemoryStore::new());
        let bodies: Vec<(String, String)> = (0..5)
            .map(|i| (format!("https://example.com/{i}"), format!("body {i}")))
            .collect();
        let borrowed: Vec<(&str, &str)> = bodies
            .iter()
            .map(|(u, b)| (u.as_str(), b.as_str()))
            .collect();
        let ctx = context_with(Arc::clone(&store), &borrowed).await;

        let config = PipelineConfig {
            max_items: 3,
            ..test_config()
        };
        let refs = bodies
            .iter()
            .map(|(u, _)| ArticleRef::new(u.clone()))
            .collect();
        let report = ingest(ctx, &config, refs).await;

        assert_eq!(report.admitted, 3);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.completed, 3);
        assert_eq!(store.count("snapshots").await, 3);
    }

    #[tokio::test]
    async fn emptied_article_retires_its_chunks() {
        let store = Arc::new(MemoryStore::new());

        let ctx = context_with(Arc::clone(&store), &[("https://example.com/a", "had content")])
            .await;
        ingest(
            ctx,
            &test_config(),
            vec![ArticleRef::new("https://example.com/a")],
        )
        .await;
        assert_eq!(store.count("chunks").await, 1);

        let ctx = context_with(Arc::clone(&store), &[("https://example.com/a", "")]).await;
        let report = ingest(
            ctx,
            &test_config(),
            vec![ArticleRef::new("https://example.com/a")],
        )
        .await;

        assert_eq!(report.completed, 1);
        assert_eq!(store.count("chunks").await, 0);

        // The snapshot survives, now empty.
        let doc = store.get("snapshots", "https://example.com/a").await.unwrap();
        let snapshot: chunkflow_shared::ChunkSnapshot = serde_json::from_value(doc).unwrap();
        assert!(snapshot.is_empty());
    }
}
