use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// In-memory fact as held by the bounded store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub key: String,
    pub value: serde_json::Value,
    pub confidence: f32,
    pub last_seen_seq: i64,
    pub sources: Vec<i64>,
    pub is_active: bool,
}

/// Durable fact row. At most one active row per (event, key); eviction
/// flips `is_active` rather than deleting.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FactRecord {
    pub event_id: Uuid,
    pub key: String,
    pub value: serde_json::Value,
    pub confidence: f32,
    pub last_seen_seq: i64,
    pub sources: Vec<i64>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl FactRecord {
    pub fn into_fact(self) -> Fact {
        Fact {
            key: self.key,
            value: self.value,
            confidence: self.confidence,
            last_seen_seq: self.last_seen_seq,
            sources: self.sources,
            is_active: self.is_active,
        }
    }
}
