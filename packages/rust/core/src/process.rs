//! Per-article stage transforms.
//!
//! [`ProcessContext`] bundles the collaborators every stage needs; the
//! transforms themselves are small async functions the ingest pipeline
//! wires together. Each takes one article's state and hands back the next.

use std::sync::Arc;

use tracing::{debug, instrument};

use chunkflow_chunker::TextSplitter;
use chunkflow_embeddings::Embedder;
use chunkflow_loader::ContentLoader;
use chunkflow_shared::{
    Article, ArticleRef, Chunk, ChunkDiff, ChunkedArticle, Metrics, Result, VectoredChunk,
    VectoredDiff,
};
use chunkflow_store::Reconciler;

use crate::diff::diff_chunks;

/// Shared collaborators for all pipeline stages.
pub struct ProcessContext {
    pub loader: Arc<dyn ContentLoader>,
    pub splitter: TextSplitter,
    pub embedder: Arc<dyn Embedder>,
    pub reconciler: Arc<Reconciler>,
    pub metrics: Arc<Metrics>,
}

impl ProcessContext {
    /// Fetch the article body.
    pub async fn load(&self, article_ref: ArticleRef) -> Result<Article> {
        self.loader.fetch(&article_ref).await
    }

    /// Split the article into content-addressed chunks. An empty body
    /// yields an empty chunk set, which flows on so the diff stage can
    /// retire the article's previous chunks.
    pub async fn chunk(&self, article: Article) -> Result<ChunkedArticle> {
        let chunks: Vec<Chunk> = self
            .splitter
            .split(&article.content)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk::new(text, index))
            .collect();

        Metrics::add(&self.metrics.chunks_created, chunks.len());
        debug!(url = %article.article_ref.url, chunks = chunks.len(), "article chunked");
        Ok(ChunkedArticle { article, chunks })
    }

    /// Load the previous snapshot and diff the current chunks against it.
    #[instrument(skip_all, fields(url = %article.article.article_ref.url))]
    pub async fn diff(&self, article: ChunkedArticle) -> Result<ChunkDiff> {
        let previous = self
            .reconciler
            .load_snapshot(&article.article.article_ref.url)
            .await?;
        let diff = diff_chunks(article, previous.as_ref());

        Metrics::add(&self.metrics.chunks_new, diff.added.len());
        Metrics::add(&self.metrics.chunks_deleted, diff.removed.len());
        Metrics::add(&self.metrics.chunks_unchanged, diff.unchanged.len());
        debug!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            unchanged = diff.unchanged.len(),
            "chunks diffed"
        );
        Ok(diff)
    }

    /// Embed the added chunks. Unchanged chunks are never re-embedded.
    pub async fn vectorize(&self, diff: ChunkDiff) -> Result<VectoredDiff> {
        let texts: Vec<String> = diff.added.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let added: Vec<VectoredChunk> = diff
            .added
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectoredChunk { chunk, vector })
            .collect();

        Metrics::add(&self.metrics.chunks_vectorized, added.len());
        Ok(VectoredDiff {
            article_ref: diff.article.article.article_ref,
            added,
            removed: diff.removed,
            unchanged: diff.unchanged,
        })
    }

    /// Reconcile the vectorized diff into the store.
    pub async fn store(&self, diff: VectoredDiff) -> Result<()> {
        self.reconciler.apply(diff).await
    }
}
