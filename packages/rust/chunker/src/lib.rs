//! Text segmentation for chunkflow.
//!
//! [`TextSplitter`] cuts an article body into overlapping character windows,
//! preferring to break at paragraph or word boundaries near the window end.
//! Chunk-size/overlap policy lives entirely here — the pipeline core treats
//! the splitter as opaque.

use chunkflow_shared::ChunkingConfig;

/// Fraction of the window in which a soft break point is searched.
const SOFT_BREAK_WINDOW: f64 = 0.2;

/// Character-window text splitter with soft breaks and overlap.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(512, 100)
    }
}

impl TextSplitter {
    /// Create a splitter. Overlap is clamped below the chunk size so every
    /// window makes forward progress.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size / 2),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.overlap)
    }

    /// Split `text` into an ordered list of chunks.
    ///
    /// Deterministic: identical input always yields the identical chunk
    /// sequence. Windows are measured in characters, so multi-byte content
    /// never lands on a broken UTF-8 boundary.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let hard_end = (start + self.chunk_size).min(chars.len());
            let end = if hard_end < chars.len() {
                self.soft_break(&chars, start, hard_end)
            } else {
                hard_end
            };

            let chunk: String = chars[start..end].iter().collect();
            if !chunk.trim().is_empty() {
                chunks.push(chunk);
            }

            if end == chars.len() {
                break;
            }
            // Rewind by the overlap, but never stall: if the soft break cut
            // the window shorter than the overlap, continue from the cut.
            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }

        tracing::trace!(chunks = chunks.len(), "split text");
        chunks
    }

    /// Find a break point near the end of the window: prefer a newline in
    /// the back half, then any whitespace in the last fifth. Falls back to
    /// the hard cut.
    fn soft_break(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let window = hard_end - start;

        let nl_floor = hard_end - (window / 2).max(1);
        for i in (nl_floor..hard_end).rev() {
            if chars[i] == '\n' {
                return i + 1;
            }
        }

        let ws_floor = hard_end - ((window as f64 * SOFT_BREAK_WINDOW) as usize).max(1);
        for i in (ws_floor..hard_end).rev() {
            if chars[i].is_whitespace() {
                return i + 1;
            }
        }
        hard_end
    }
}
