use super::agent::AgentType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CheckpointRow {
    pub event_id: Uuid,
    pub agent_type: AgentType,
    pub last_seq: i64,
    pub updated_at: DateTime<Utc>,
}

/// The durable checkpoints a runtime is rebuilt from. The transcript
/// counter is tracked in-memory only.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Checkpoints {
    pub cards: i64,
    pub facts: i64,
}
