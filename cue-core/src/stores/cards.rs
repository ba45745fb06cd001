//! FIFO-bounded card history plus a concept-freshness cache.
//!
//! The freshness cache maps `concept_id → last_shown_at_ms` and is updated
//! unconditionally on every add, so redundancy suppression outlives the
//! FIFO window: a concept whose record has already been dropped from the
//! history still counts as "recently shown" inside the freshness window.

use crate::models::CardRecord;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct CardsStore {
    history: VecDeque<CardRecord>,
    freshness: HashMap<String, i64>,
    capacity: usize,
}

impl CardsStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            freshness: HashMap::new(),
            capacity,
        }
    }

    /// FIFO insert: oldest records drop first once capacity is reached.
    pub fn add(&mut self, record: CardRecord) {
        self.freshness
            .insert(record.concept_id.clone(), record.created_at_ms);
        self.history.push_back(record);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    /// Most-recent-first slice of the history.
    pub fn get_recent(&self, limit: usize) -> Vec<CardRecord> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    /// True iff the concept was shown within `freshness_ms` of `now_ms`,
    /// judged from the freshness cache rather than the FIFO history.
    pub fn has_recent_concept(&self, concept_id: &str, freshness_ms: i64, now_ms: i64) -> bool {
        match self.freshness.get(concept_id) {
            Some(shown_at) => now_ms - shown_at < freshness_ms,
            None => false,
        }
    }

    pub fn get_by_concept(&self, concept_id: &str) -> Vec<CardRecord> {
        self.history
            .iter()
            .filter(|c| c.concept_id == concept_id)
            .cloned()
            .collect()
    }

    pub fn concept_cache(&self) -> &HashMap<String, i64> {
        &self.freshness
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Highest source sequence seen; seeds the cards counter at hydration.
    pub fn max_source_seq(&self) -> Option<i64> {
        self.history.iter().map(|c| c.source_seq).max()
    }
}
