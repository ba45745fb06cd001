//! Capacity-bounded fact map with confidence-ranked eviction.
//!
//! Confidence blending on repeated observation uses the noisy-OR rule:
//!
//!   blended = 1 − (1 − old) × (1 − incoming)
//!
//! which is deterministic, never decreases, and saturates at 1.0. A weak
//! repeat observation still nudges confidence up; it never overwrites a
//! stronger prior.

use crate::models::{Fact, FactRecord};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Result of a single upsert: the fact as stored (confidence may differ
/// from the raw input) and any keys evicted to make room.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub fact: Fact,
    pub evicted: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FactsStore {
    facts: HashMap<String, Fact>,
    capacity: usize,
}

impl FactsStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            facts: HashMap::new(),
            capacity,
        }
    }

    /// Insert or update a fact. Evicted keys are returned so the caller can
    /// mark them inactive in durable storage; they are always keys that were
    /// present before the call, never the key just written.
    pub fn upsert(
        &mut self,
        key: &str,
        value: serde_json::Value,
        confidence: f32,
        last_seen_seq: i64,
        sources: &[i64],
    ) -> UpsertOutcome {
        let fact = match self.facts.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                existing.confidence = blend(existing.confidence, confidence);
                existing.value = value;
                existing.last_seen_seq = existing.last_seen_seq.max(last_seen_seq);
                for s in sources {
                    if !existing.sources.contains(s) {
                        existing.sources.push(*s);
                    }
                }
                existing.clone()
            }
            Entry::Vacant(vacant) => {
                let fact = Fact {
                    key: key.to_string(),
                    value,
                    confidence: confidence.clamp(0.0, 1.0),
                    last_seen_seq,
                    sources: sources.to_vec(),
                    is_active: true,
                };
                vacant.insert(fact.clone());
                fact
            }
        };

        let evicted = self.evict_over_capacity(Some(key));
        UpsertOutcome { fact, evicted }
    }

    pub fn get(&self, key: &str) -> Option<&Fact> {
        self.facts.get(key)
    }

    /// Bulk hydrate from durable rows. A store may be handed more active
    /// rows than its capacity; the least-valuable ones are evicted here,
    /// not silently kept over capacity.
    pub fn load(&mut self, records: Vec<FactRecord>) -> Vec<String> {
        for record in records {
            let fact = record.into_fact();
            self.facts.insert(fact.key.clone(), fact);
        }
        self.evict_over_capacity(None)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.facts.keys()
    }

    /// Evict lowest-confidence entries (tie: oldest last_seen_seq) until
    /// size fits. `protect` shields the key written by the current call.
    fn evict_over_capacity(&mut self, protect: Option<&str>) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.facts.len() > self.capacity {
            let victim = self
                .facts
                .values()
                .filter(|f| Some(f.key.as_str()) != protect)
                .min_by(|a, b| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.last_seen_seq.cmp(&b.last_seen_seq))
                })
                .map(|f| f.key.clone());

            match victim {
                Some(key) => {
                    self.facts.remove(&key);
                    evicted.push(key);
                }
                None => break,
            }
        }
        evicted
    }
}

fn blend(old: f32, incoming: f32) -> f32 {
    let incoming = incoming.clamp(0.0, 1.0);
    (1.0 - (1.0 - old) * (1.0 - incoming)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_and_get() {
        let mut store = FactsStore::new(10);
        let outcome = store.upsert("venue", json!("Hall B"), 0.8, 3, &[3]);
        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.fact.confidence, 0.8);
        assert_eq!(store.get("venue").unwrap().last_seen_seq, 3);
    }

    #[test]
    fn test_blend_is_monotonic() {
        let mut store = FactsStore::new(10);
        store.upsert("speaker", json!("Ada"), 0.6, 1, &[1]);
        let c1 = store.get("speaker").unwrap().confidence;
        store.upsert("speaker", json!("Ada"), 0.3, 2, &[2]);
        let c2 = store.get("speaker").unwrap().confidence;
        store.upsert("speaker", json!("Ada"), 0.9, 3, &[3]);
        let c3 = store.get("speaker").unwrap().confidence;
        assert!(c2 >= c1);
        assert!(c3 >= c2);
        assert!(c3 <= 1.0);
        // noisy-OR: 1 - 0.4*0.7 = 0.72
        assert!((c2 - 0.72).abs() < 1e-6);
    }

    #[test]
    fn test_repeated_sources_accumulate_once() {
        let mut store = FactsStore::new(10);
        store.upsert("topic", json!("raptors"), 0.5, 1, &[1]);
        store.upsert("topic", json!("raptors"), 0.5, 2, &[1, 2]);
        assert_eq!(store.get("topic").unwrap().sources, vec![1, 2]);
    }

    #[test]
    fn test_eviction_picks_lowest_confidence() {
        // Spec scenario: capacity 2; a(.9), b(.5), c(.7) → b evicted.
        let mut store = FactsStore::new(2);
        assert!(store.upsert("a", json!(1), 0.9, 1, &[1]).evicted.is_empty());
        assert!(store.upsert("b", json!(2), 0.5, 2, &[2]).evicted.is_empty());
        let outcome = store.upsert("c", json!(3), 0.7, 3, &[3]);
        assert_eq!(outcome.evicted, vec!["b".to_string()]);
        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_some());
        assert!(store.get("c").is_some());
        assert!(store.get("b").is_none());
    }

    #[test]
    fn test_new_key_never_self_evicts() {
        let mut store = FactsStore::new(2);
        store.upsert("a", json!(1), 0.9, 1, &[1]);
        store.upsert("b", json!(2), 0.8, 2, &[2]);
        // Weakest fact in the store, but just written: someone else goes.
        let outcome = store.upsert("c", json!(3), 0.1, 3, &[3]);
        assert_eq!(outcome.evicted, vec!["b".to_string()]);
        assert!(store.get("c").is_some());
    }

    #[test]
    fn test_capacity_invariant_after_every_op() {
        let mut store = FactsStore::new(3);
        for i in 0..20 {
            store.upsert(
                &format!("k{}", i),
                json!(i),
                (i as f32) / 20.0,
                i,
                &[i],
            );
            assert!(store.len() <= 3);
        }
    }

    #[test]
    fn test_load_over_capacity_evicts() {
        let mut store = FactsStore::new(2);
        let records: Vec<FactRecord> = (0..5)
            .map(|i| FactRecord {
                event_id: uuid::Uuid::new_v4(),
                key: format!("k{}", i),
                value: json!(i),
                confidence: 0.1 * (i as f32 + 1.0),
                last_seen_seq: i,
                sources: vec![i],
                is_active: true,
                updated_at: chrono::Utc::now(),
            })
            .collect();
        let evicted = store.load(records);
        assert_eq!(store.len(), 2);
        assert_eq!(evicted.len(), 3);
        // The two highest-confidence rows survive.
        assert!(store.get("k3").is_some());
        assert!(store.get("k4").is_some());
    }

    #[test]
    fn test_eviction_tie_breaks_on_oldest_seq() {
        let mut store = FactsStore::new(2);
        store.upsert("old", json!(1), 0.5, 1, &[1]);
        store.upsert("new", json!(2), 0.5, 9, &[9]);
        let outcome = store.upsert("c", json!(3), 0.9, 10, &[10]);
        assert_eq!(outcome.evicted, vec!["old".to_string()]);
    }
}
