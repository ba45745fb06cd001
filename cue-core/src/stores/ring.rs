use crate::models::TranscriptChunk;
use std::collections::VecDeque;

/// Recent-transcript window, bounded by both count and age.
///
/// Age is measured against the newest chunk's capture timestamp, not wall
/// clock, so replaying historical rows behaves the same as live ingestion.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    chunks: VecDeque<TranscriptChunk>,
    capacity: usize,
    max_age_ms: i64,
}

impl RingBuffer {
    pub fn new(capacity: usize, max_age_ms: i64) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity),
            capacity,
            max_age_ms,
        }
    }

    /// Append a chunk, evicting by count and by age.
    pub fn push(&mut self, chunk: TranscriptChunk) {
        self.chunks.push_back(chunk);

        while self.chunks.len() > self.capacity {
            self.chunks.pop_front();
        }

        let newest_at = self.chunks.back().map(|c| c.at_ms).unwrap_or(0);
        let cutoff = newest_at - self.max_age_ms;
        while let Some(front) = self.chunks.front() {
            if front.at_ms < cutoff {
                self.chunks.pop_front();
            } else {
                break;
            }
        }
    }

    /// Cloned view of the window, oldest first. Never a live reference.
    pub fn snapshot(&self) -> Vec<TranscriptChunk> {
        self.chunks.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Highest final sequence currently held, if any.
    pub fn last_seq(&self) -> Option<i64> {
        self.chunks
            .iter()
            .filter(|c| c.is_final)
            .map(|c| c.seq)
            .max()
    }
}
