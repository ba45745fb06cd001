use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable transcript row as stored and replayed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TranscriptRow {
    pub id: Uuid,
    pub event_id: Uuid,
    /// Assigned only once the chunk is finalized; stable across replays.
    pub seq: Option<i64>,
    pub at_ms: i64,
    pub speaker: Option<String>,
    pub text: String,
    pub is_final: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a transcript row.
#[derive(Debug, Clone)]
pub struct NewTranscript {
    pub event_id: Uuid,
    pub seq: Option<i64>,
    pub at_ms: i64,
    pub speaker: Option<String>,
    pub text: String,
    pub is_final: bool,
}

/// In-memory transcript chunk held by the ring buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub seq: i64,
    pub at_ms: i64,
    pub speaker: Option<String>,
    pub text: String,
    pub is_final: bool,
    pub transcript_id: Option<Uuid>,
}

impl TranscriptChunk {
    pub fn from_row(row: &TranscriptRow) -> Self {
        Self {
            seq: row.seq.unwrap_or(0),
            at_ms: row.at_ms,
            speaker: row.speaker.clone(),
            text: row.text.clone(),
            is_final: row.is_final,
            transcript_id: Some(row.id),
        }
    }
}
