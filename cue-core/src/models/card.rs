use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "card_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    Text,
    TextVisual,
    Visual,
}

/// In-memory card as held by the FIFO history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    pub concept_id: String,
    pub concept_label: String,
    pub card_type: CardType,
    pub source_seq: i64,
    pub created_at_ms: i64,
    pub title: Option<String>,
    pub body: Option<String>,
    pub label: Option<String>,
    pub image_ref: Option<String>,
}

/// Durable card row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CardRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub concept_id: String,
    pub concept_label: String,
    pub card_type: CardType,
    pub source_seq: i64,
    pub title: Option<String>,
    pub body: Option<String>,
    pub label: Option<String>,
    pub image_ref: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl CardRow {
    pub fn into_record(self) -> CardRecord {
        CardRecord {
            concept_id: self.concept_id,
            concept_label: self.concept_label,
            card_type: self.card_type,
            source_seq: self.source_seq,
            created_at_ms: self.created_at.timestamp_millis(),
            title: self.title,
            body: self.body,
            label: self.label,
            image_ref: self.image_ref,
        }
    }
}
