//! Error types for chunkflow.
//!
//! Library crates use [`ChunkflowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all chunkflow operations.
#[derive(Debug, thiserror::Error)]
pub enum ChunkflowError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Content loader failure (network, status, body decode).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Embedding service failure (transport, response shape, count mismatch).
    #[error("embed error: {0}")]
    Embed(String),

    /// Fatal document-store failure. Carries the store's error payload.
    ///
    /// Duplicate-key conflicts on insert are NOT reported through this
    /// variant — they are absorbed by the reconciler from the store's
    /// per-document error report.
    #[error("store error: {0}")]
    Store(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid document, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ChunkflowError>;

impl ChunkflowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a store error from any displayable message.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
