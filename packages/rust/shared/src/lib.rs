//! Shared types, error model, hashing, metrics, and configuration for chunkflow.
//!
//! This crate is the foundation depended on by all other chunkflow crates.
//! It provides:
//! - [`ChunkflowError`] — the unified error type
//! - Domain types ([`Article`], [`Chunk`], [`ChunkSnapshot`], [`ChunkDiff`], …)
//! - [`content_hash`] — content addressing for chunks
//! - [`Metrics`] — the injected pipeline counter set
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChunkingConfig, EmbeddingsConfig, PipelineConfig, StoreConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{ChunkflowError, Result};
pub use hash::content_hash;
pub use metrics::{Metrics, MetricsSnapshot};
pub use types::{
    Article, ArticleRef, ArticleSummary, Chunk, ChunkDiff, ChunkMeta, ChunkSnapshot,
    ChunkedArticle, RECENT_ARTICLES_ID, RecentArticles, VectoredChunk, VectoredDiff,
};
