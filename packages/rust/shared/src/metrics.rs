//! Pipeline metrics: injected, increment-only, never blocking.
//!
//! A single [`Metrics`] instance is created at the composition root and
//! handed down as `Arc<Metrics>`. Counters are plain atomics, so recording
//! can never fail and never propagates back into the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Increment-only counters for one ingest run (or process lifetime).
#[derive(Debug, Default)]
pub struct Metrics {
    /// Chunks produced by the splitter.
    pub chunks_created: AtomicU64,
    /// Chunks classified as new by the diff engine.
    pub chunks_new: AtomicU64,
    /// Chunks classified as deleted by the diff engine.
    pub chunks_deleted: AtomicU64,
    /// Chunks classified as unchanged by the diff engine.
    pub chunks_unchanged: AtomicU64,
    /// Chunks embedded.
    pub chunks_vectorized: AtomicU64,
    /// Chunks inserted into the store.
    pub chunks_inserted: AtomicU64,
    /// Chunk documents removed from the store.
    pub chunks_removed: AtomicU64,
    /// Tolerated already-exists conflicts on insert.
    pub chunk_collisions: AtomicU64,
    /// Snapshots found on diff (previous pass existed).
    pub articles_read: AtomicU64,
    /// Articles fully reconciled (snapshot + registry written).
    pub articles_stored: AtomicU64,
}

impl Metrics {
    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Increment a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough point-in-time view for reporting.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunks_created: self.chunks_created.load(Ordering::Relaxed),
            chunks_new: self.chunks_new.load(Ordering::Relaxed),
            chunks_deleted: self.chunks_deleted.load(Ordering::Relaxed),
            chunks_unchanged: self.chunks_unchanged.load(Ordering::Relaxed),
            chunks_vectorized: self.chunks_vectorized.load(Ordering::Relaxed),
            chunks_inserted: self.chunks_inserted.load(Ordering::Relaxed),
            chunks_removed: self.chunks_removed.load(Ordering::Relaxed),
            chunk_collisions: self.chunk_collisions.load(Ordering::Relaxed),
            articles_read: self.articles_read.load(Ordering::Relaxed),
            articles_stored: self.articles_stored.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value copy of [`Metrics`] for logging and CLI output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub chunks_created: u64,
    pub chunks_new: u64,
    pub chunks_deleted: u64,
    pub chunks_unchanged: u64,
    pub chunks_vectorized: u64,
    pub chunks_inserted: u64,
    pub chunks_removed: u64,
    pub chunk_collisions: u64,
    pub articles_read: u64,
    pub articles_stored: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::default();
        Metrics::add(&metrics.chunks_created, 12);
        Metrics::add(&metrics.chunks_created, 3);
        Metrics::incr(&metrics.articles_stored);

        let snap = metrics.snapshot();
        assert_eq!(snap.chunks_created, 15);
        assert_eq!(snap.articles_stored, 1);
        assert_eq!(snap.chunk_collisions, 0);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = Metrics::default();
        Metrics::add(&metrics.chunk_collisions, 2);
        let json = serde_json::to_value(metrics.snapshot()).expect("serialize");
        assert_eq!(json["chunk_collisions"], 2);
    }
}
