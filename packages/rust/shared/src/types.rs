//! Core domain types for the chunkflow ingestion pipeline.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::content_hash;

/// Document `_id` under which the rolling recent-articles registry is stored.
pub const RECENT_ARTICLES_ID: &str = "recent_articles";

/// Default capacity of the recent-articles registry.
pub const DEFAULT_RECENT_CAP: usize = 16;

// ---------------------------------------------------------------------------
// ArticleRef & Article
// ---------------------------------------------------------------------------

/// Reference to an article to ingest: its identity plus optional title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRef {
    /// Source URL — the article's identity across passes.
    pub url: String,
    /// Human-readable title, if known before fetching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ArticleRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
        }
    }

    pub fn with_title(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: Some(title.into()),
        }
    }
}

/// A fetched article: its reference plus the cleaned content body.
///
/// Exists only transiently within one pipeline pass.
#[derive(Debug, Clone)]
pub struct Article {
    pub article_ref: ArticleRef,
    pub content: String,
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// Metadata for one chunk: position, size, and content address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Position within the parent article's ordered chunk sequence.
    pub index: usize,
    /// Content length in characters.
    pub length: usize,
    /// SHA-256 content address. Identity for diffing and storage.
    pub hash: String,
}

/// One addressable fragment of an article's body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub meta: ChunkMeta,
}

impl Chunk {
    /// Build a chunk from its text and position, deriving length and hash.
    pub fn new(content: String, index: usize) -> Self {
        let meta = ChunkMeta {
            index,
            length: content.chars().count(),
            hash: content_hash(&content),
        };
        Self { content, meta }
    }
}

/// An article together with its ordered chunk sequence.
#[derive(Debug, Clone)]
pub struct ChunkedArticle {
    pub article: Article,
    pub chunks: Vec<Chunk>,
}

// ---------------------------------------------------------------------------
// ChunkSnapshot
// ---------------------------------------------------------------------------

/// The persisted `hash → chunk metadata` mapping observed on an article's
/// previous successful pass.
///
/// One snapshot per article, keyed by URL, replaced wholesale on every
/// successful pass — never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    /// Article URL, doubling as the stored document's `_id`.
    #[serde(rename = "_id")]
    pub article_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Chunk metadata keyed by content hash.
    pub chunks: HashMap<String, ChunkMeta>,
    /// When this snapshot was written.
    pub updated_at: DateTime<Utc>,
}

impl ChunkSnapshot {
    /// Build a snapshot from the full current chunk set (added ∪ unchanged).
    pub fn from_chunk_meta(
        article_ref: &ArticleRef,
        chunks: impl IntoIterator<Item = ChunkMeta>,
    ) -> Self {
        Self {
            article_url: article_ref.url.clone(),
            title: article_ref.title.clone(),
            chunks: chunks.into_iter().map(|m| (m.hash.clone(), m)).collect(),
            updated_at: Utc::now(),
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.chunks.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ChunkDiff & vectored forms
// ---------------------------------------------------------------------------

/// Partition of an article's current chunks against its previous snapshot.
///
/// There is no "modified" member: a changed chunk appears once in `added`
/// (new hash) and once in `removed` (old hash).
#[derive(Debug, Clone)]
pub struct ChunkDiff {
    pub article: ChunkedArticle,
    /// Chunks whose hash was absent from the previous snapshot.
    pub added: Vec<Chunk>,
    /// Snapshot entries whose hash is absent from the current chunk set.
    /// Only metadata — chunk text is not persisted in snapshots.
    pub removed: Vec<ChunkMeta>,
    /// Chunks whose hash was already present in the previous snapshot.
    pub unchanged: Vec<Chunk>,
}

/// An added chunk paired with its computed embedding vector.
#[derive(Debug, Clone)]
pub struct VectoredChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A [`ChunkDiff`] with its `added` chunks vectorized, ready for the store.
#[derive(Debug, Clone)]
pub struct VectoredDiff {
    pub article_ref: ArticleRef,
    pub added: Vec<VectoredChunk>,
    pub removed: Vec<ChunkMeta>,
    pub unchanged: Vec<Chunk>,
}

// ---------------------------------------------------------------------------
// RecentArticles
// ---------------------------------------------------------------------------

/// Summary of one reconciled article, as held by the rolling registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub chunk_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Bounded, recency-ordered registry of the most recently reconciled
/// articles. Persisted as a single document under [`RECENT_ARTICLES_ID`]
/// and mutated by every successful reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentArticles {
    /// Most recent first.
    pub entries: VecDeque<ArticleSummary>,
    #[serde(default = "default_cap")]
    pub cap: usize,
}

fn default_cap() -> usize {
    DEFAULT_RECENT_CAP
}

impl Default for RecentArticles {
    fn default() -> Self {
        Self::with_cap(DEFAULT_RECENT_CAP)
    }
}

impl RecentArticles {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    /// Fold one article summary into the registry: deduplicate by URL,
    /// push to the front, truncate to capacity.
    pub fn fold(&mut self, summary: ArticleSummary) {
        self.entries.retain(|e| e.url != summary.url);
        self.entries.push_front(summary);
        self.entries.truncate(self.cap);
    }
}
