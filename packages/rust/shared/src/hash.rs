//! Content addressing for chunks.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hex digest of a piece of text.
///
/// This digest is a chunk's identity: the diff engine and the document
/// store key chunks by it, so it must be deterministic across calls and
/// across process restarts.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
