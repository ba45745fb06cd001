use super::agent::AgentType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Observable session lifecycle: closed → active ⇄ paused, error from
/// any state on provider failure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "session_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Closed,
    Active,
    Paused,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub agent_type: AgentType,
    pub state: SessionState,
    pub provider_session_id: Option<String>,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
