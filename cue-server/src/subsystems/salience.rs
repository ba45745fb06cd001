//! Salience scoring and emission rate limiting for the cards pipeline.
//!
//! Score shape:
//!
//!   score = base_weight * 2
//!         + first_mention_bonus      (concept not recently shown)
//!         + min(extra_mentions, cap)
//!         + question_cue_bonus       (concept line looks like a question)
//!         + glossary_bonus           (candidate came from the glossary)
//!         + fact_bonus               (candidate came from a stored fact)
//!         - recency penalty          (strong if the single most-recent card
//!                                     is this concept, weak if it is anywhere
//!                                     in the recent-card window)
//!         - suppression_penalty      (reserved, 0 by default)
//!
//! Emission requires `score > threshold` and the limiter to allow it.

use cue_core::config::{RateLimitConfig, SalienceConfig};
use cue_core::models::{GlossaryTerm, TranscriptChunk};
use cue_core::{CardsStore, FactsStore};
use regex::Regex;
use std::collections::HashMap;

/// Tracks recent card-emission timestamps for one event.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    history: Vec<i64>,
    pub last_trigger_ms: Option<i64>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            history: Vec::new(),
            last_trigger_ms: None,
            config,
        }
    }

    /// Whether an emission at `now_ms` would be allowed. The window cap is
    /// a burst bound on top of the minimum interval: one paced emission per
    /// interval passes, a window already holding more than `max_per_window`
    /// does not.
    pub fn allows(&self, now_ms: i64) -> bool {
        if let Some(last) = self.history.iter().max() {
            if now_ms - last < self.config.min_interval_ms {
                return false;
            }
        }
        let window_start = now_ms - self.config.window_ms;
        let in_window = self.history.iter().filter(|t| **t > window_start).count();
        in_window <= self.config.max_per_window
    }

    /// Record a successful emission and prune history past the window.
    pub fn record(&mut self, now_ms: i64) {
        self.history.push(now_ms);
        self.last_trigger_ms = Some(now_ms);
        let window_start = now_ms - self.config.window_ms;
        self.history.retain(|t| *t > window_start);
    }
}

/// A concept the cards pipeline might surface.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub concept_id: String,
    pub label: String,
    pub base_weight: f32,
    pub via_glossary: bool,
    pub via_fact: bool,
}

pub fn concept_id_for(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

// Capitalized words that are almost never concepts on their own.
const STOPWORDS: [&str; 12] = [
    "The", "This", "That", "These", "Those", "And", "But", "So", "Well", "Okay", "Yes", "No",
];

/// Candidates from the recent window: glossary matches, existing-fact-key
/// matches, and repeated capitalized tokens. Rule-based only.
pub fn extract_candidates(
    window: &[TranscriptChunk],
    glossary: &[GlossaryTerm],
    facts: &FactsStore,
    config: &SalienceConfig,
) -> Vec<Candidate> {
    let mut candidates: HashMap<String, Candidate> = HashMap::new();
    let joined = window
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let joined_lower = joined.to_lowercase();

    for term in glossary {
        if joined_lower.contains(&term.term.to_lowercase()) {
            let id = concept_id_for(&term.term);
            candidates
                .entry(id.clone())
                .or_insert_with(|| Candidate {
                    concept_id: id,
                    label: term.term.clone(),
                    base_weight: config.base_weight * term.weight,
                    via_glossary: true,
                    via_fact: false,
                })
                .via_glossary = true;
        }
    }

    for key in facts.keys() {
        let label = key.replace(['_', '-'], " ");
        if joined_lower.contains(&label.to_lowercase()) {
            let id = concept_id_for(&label);
            let entry = candidates.entry(id.clone()).or_insert_with(|| Candidate {
                concept_id: id,
                label,
                base_weight: config.base_weight,
                via_glossary: false,
                via_fact: true,
            });
            entry.via_fact = true;
        }
    }

    // Repeated capitalized tokens (proper-noun heuristic).
    if let Ok(re) = Regex::new(r"\b([A-Z][a-zA-Z]{2,})\b") {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for caps in re.captures_iter(&joined) {
            let word = caps[1].to_string();
            if STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            *counts.entry(word).or_insert(0) += 1;
        }
        for (word, count) in counts {
            if count < 2 {
                continue;
            }
            let id = concept_id_for(&word);
            candidates.entry(id.clone()).or_insert_with(|| Candidate {
                concept_id: id,
                label: word,
                base_weight: config.base_weight,
                via_glossary: false,
                via_fact: false,
            });
        }
    }

    let mut out: Vec<Candidate> = candidates.into_values().collect();
    out.sort_by(|a, b| a.concept_id.cmp(&b.concept_id));
    out
}

/// True when a window line mentioning the concept reads like a question.
pub fn question_cue(candidate: &Candidate, window: &[TranscriptChunk], config: &SalienceConfig) -> bool {
    let needle = candidate.label.to_lowercase();
    for chunk in window {
        let line = chunk.text.to_lowercase();
        if !line.contains(&needle) {
            continue;
        }
        if line.contains('?') {
            return true;
        }
        if config.interrogatives.iter().any(|w| {
            line.starts_with(w.as_str()) || line.contains(&format!(" {} ", w))
        }) {
            return true;
        }
    }
    false
}

pub fn score(
    candidate: &Candidate,
    window: &[TranscriptChunk],
    cards: &CardsStore,
    config: &SalienceConfig,
    freshness_ms: i64,
    now_ms: i64,
) -> f32 {
    let needle = candidate.label.to_lowercase();
    let mentions = window
        .iter()
        .filter(|c| c.text.to_lowercase().contains(&needle))
        .count() as u32;

    let mut score = candidate.base_weight * 2.0;

    if !cards.has_recent_concept(&candidate.concept_id, freshness_ms, now_ms) {
        score += config.first_mention_bonus;
    }

    let extra = mentions.saturating_sub(1).min(config.repeat_mention_cap);
    score += extra as f32;

    if question_cue(candidate, window, config) {
        score += config.question_cue_bonus;
    }
    if candidate.via_glossary {
        score += config.glossary_bonus;
    }
    if candidate.via_fact {
        score += config.fact_bonus;
    }

    let recent = cards.get_recent(config.recent_card_window);
    if recent
        .first()
        .map(|c| c.concept_id == candidate.concept_id)
        .unwrap_or(false)
    {
        score -= config.recency_penalty_last;
    } else if recent.iter().any(|c| c.concept_id == candidate.concept_id) {
        score -= config.recency_penalty_window;
    }

    score -= config.suppression_penalty;

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use cue_core::models::{CardRecord, CardType};

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            min_interval_ms: 30_000,
            window_ms: 120_000,
            max_per_window: 1,
        })
    }

    fn chunk(text: &str, seq: i64) -> TranscriptChunk {
        TranscriptChunk {
            seq,
            at_ms: seq * 1_000,
            speaker: None,
            text: text.to_string(),
            is_final: true,
            transcript_id: None,
        }
    }

    fn card(concept: &str, at_ms: i64) -> CardRecord {
        CardRecord {
            concept_id: concept.to_string(),
            concept_label: concept.to_string(),
            card_type: CardType::Text,
            source_seq: 1,
            created_at_ms: at_ms,
            title: None,
            body: None,
            label: None,
            image_ref: None,
        }
    }

    #[test]
    fn test_limiter_rejects_within_min_interval() {
        let mut limiter = limiter();
        assert!(limiter.allows(0));
        limiter.record(0);
        assert!(!limiter.allows(10_000));
    }

    #[test]
    fn test_limiter_allows_two_attempts_31s_apart() {
        let mut limiter = limiter();
        assert!(limiter.allows(0));
        limiter.record(0);
        assert!(limiter.allows(31_000));
    }

    #[test]
    fn test_limiter_window_cap() {
        // Three attempts 5s apart with max_per_window=1: only the first lands.
        let mut limiter = limiter();
        assert!(limiter.allows(0));
        limiter.record(0);
        assert!(!limiter.allows(5_000));
        assert!(!limiter.allows(10_000));
    }

    #[test]
    fn test_limiter_window_caps_paced_bursts() {
        let mut limiter = limiter();
        limiter.record(0);
        limiter.record(31_000);
        // Past min_interval, but the trailing window already holds two.
        assert!(!limiter.allows(62_000));
        // Once the window drains, emissions resume.
        assert!(limiter.allows(152_000));
    }

    #[test]
    fn test_limiter_prunes_history() {
        let mut limiter = limiter();
        limiter.record(0);
        limiter.record(130_000);
        assert_eq!(limiter.last_trigger_ms, Some(130_000));
        assert!(limiter.allows(251_000));
    }

    #[test]
    fn test_score_first_mention_and_repeats() {
        let config = SalienceConfig::default();
        let cards = CardsStore::new(10);
        let candidate = Candidate {
            concept_id: "apollo".to_string(),
            label: "Apollo".to_string(),
            base_weight: 1.0,
            via_glossary: false,
            via_fact: false,
        };
        let window = vec![
            chunk("Apollo launched in 1969.", 1),
            chunk("Apollo was a NASA program.", 2),
            chunk("Nothing here.", 3),
        ];
        // 2*1.0 + first(1.0) + extra mentions min(1,2)=1 = 4.0
        let s = score(&candidate, &window, &cards, &config, 300_000, 10_000);
        assert!((s - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_score_question_cue_and_glossary() {
        let config = SalienceConfig::default();
        let cards = CardsStore::new(10);
        let candidate = Candidate {
            concept_id: "fusion".to_string(),
            label: "fusion".to_string(),
            base_weight: 1.0,
            via_glossary: true,
            via_fact: false,
        };
        let window = vec![chunk("What is fusion?", 1)];
        // 2.0 + 1.0 first + 0 extra + 1.0 question + 0.5 glossary = 4.5
        let s = score(&candidate, &window, &cards, &config, 300_000, 10_000);
        assert!((s - 4.5).abs() < 1e-6);
    }

    #[test]
    fn test_score_recency_penalties() {
        let config = SalienceConfig::default();
        let mut cards = CardsStore::new(10);
        cards.add(card("apollo", 1_000));
        cards.add(card("gemini", 2_000));

        let window = vec![chunk("Apollo again", 3)];
        let apollo = Candidate {
            concept_id: "apollo".to_string(),
            label: "Apollo".to_string(),
            base_weight: 1.0,
            via_glossary: false,
            via_fact: false,
        };
        let gemini = Candidate {
            concept_id: "gemini".to_string(),
            label: "Gemini".to_string(),
            base_weight: 1.0,
            via_glossary: false,
            via_fact: false,
        };

        // Both are fresh (no first-mention bonus). Gemini is the most recent
        // card → strong penalty; Apollo is older in the window → weak.
        let s_apollo = score(&apollo, &window, &cards, &config, 300_000, 3_000);
        let s_gemini = score(&gemini, &window, &cards, &config, 300_000, 3_000);
        assert!((s_apollo - (2.0 - 1.5)).abs() < 1e-6);
        assert!((s_gemini - (2.0 - 3.0)).abs() < 1e-6);
    }

    #[test]
    fn test_extract_candidates_sources() {
        let config = SalienceConfig::default();
        let glossary = vec![GlossaryTerm {
            event_id: uuid::Uuid::new_v4(),
            term: "payload".to_string(),
            definition: String::new(),
            weight: 1.0,
        }];
        let mut facts = FactsStore::new(10);
        facts.upsert("booster", serde_json::json!("Saturn V"), 0.8, 1, &[1]);

        let window = vec![
            chunk("The payload sits on the booster.", 1),
            chunk("Saturn carried it. Saturn was huge.", 2),
        ];
        let candidates = extract_candidates(&window, &glossary, &facts, &config);
        let ids: Vec<&str> = candidates.iter().map(|c| c.concept_id.as_str()).collect();
        assert!(ids.contains(&"payload"));
        assert!(ids.contains(&"booster"));
        assert!(ids.contains(&"saturn"));

        let payload = candidates.iter().find(|c| c.concept_id == "payload").unwrap();
        assert!(payload.via_glossary);
        let booster = candidates.iter().find(|c| c.concept_id == "booster").unwrap();
        assert!(booster.via_fact);
    }
}
