use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event-scoped glossary entry consulted by the salience policy.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GlossaryTerm {
    pub event_id: Uuid,
    pub term: String,
    pub definition: String,
    pub weight: f32,
}
