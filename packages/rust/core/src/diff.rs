//! Chunk diffing: current chunk set vs. the previous pass's snapshot.

use std::collections::HashSet;

use chunkflow_shared::{ChunkDiff, ChunkSnapshot, ChunkedArticle};

/// Partition an article's chunks against its previous snapshot by content
/// hash. Linear in the number of chunks on both sides.
///
/// A changed chunk has a new hash, so it shows up as one `added` entry and
/// one `removed` entry; there is no "modified" class. With no previous
/// snapshot everything is added.
pub fn diff_chunks(article: ChunkedArticle, previous: Option<&ChunkSnapshot>) -> ChunkDiff {
    let Some(previous) = previous else {
        return ChunkDiff {
            added: article.chunks.clone(),
            removed: Vec::new(),
            unchanged: Vec::new(),
            article,
        };
    };

    let current_hashes: HashSet<&str> =
        article.chunks.iter().map(|c| c.meta.hash.as_str()).collect();

    let mut added = Vec::new();
    let mut unchanged = Vec::new();
    for chunk in &article.chunks {
        if previous.contains(&chunk.meta.hash) {
            unchanged.push(chunk.clone());
        } else {
            added.push(chunk.clone());
        }
    }

    let removed = previous
        .chunks
        .values()
        .filter(|meta| !current_hashes.contains(meta.hash.as_str()))
        .cloned()
        .collect();

    ChunkDiff {
        article,
        added,
        removed,
        unchanged,
    }
}
