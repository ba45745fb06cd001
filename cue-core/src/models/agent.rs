use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three per-event agent pipelines.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "agent_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Transcript,
    Cards,
    Facts,
}

impl AgentType {
    pub const ALL: [AgentType; 3] = [AgentType::Transcript, AgentType::Cards, AgentType::Facts];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Transcript => "transcript",
            AgentType::Cards => "cards",
            AgentType::Facts => "facts",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "agent_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    ContextComplete,
    Ready,
    Running,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AgentRow {
    pub event_id: Uuid,
    pub agent_id: Uuid,
    pub status: AgentStatus,
    pub display_name: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
