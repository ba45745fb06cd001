//! Durable-store seam.
//!
//! `EventStore` is the row-level contract the orchestration core consumes:
//! CRUD for transcripts, facts, cards, checkpoints, agents, sessions,
//! glossary and agent outputs, plus a subscribe-to-inserts primitive for
//! the transcript change feed. Delivery is at-least-once; consumers guard
//! with the idempotent sequence check.
//!
//! Backends: `PgStore` (Postgres via sqlx, LISTEN/NOTIFY change feed) and
//! `MemoryStore` (in-process, used by tests and local development).

pub mod memory;
pub mod pg;

use crate::error::CueError;
use crate::models::{
    AgentRow, AgentStatus, AgentType, CardRecord, CardRow, Checkpoints, Fact, FactRecord,
    GlossaryTerm, NewTranscript, SessionRow, SessionState, TranscriptRow,
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[async_trait]
pub trait EventStore: Send + Sync {
    // --- transcripts ---

    async fn insert_transcript(&self, new: NewTranscript) -> Result<TranscriptRow, CueError>;

    /// Persist a late-assigned sequence number back to the row so it is
    /// stable across replays.
    async fn set_transcript_seq(&self, id: Uuid, seq: i64) -> Result<(), CueError>;

    /// Finalized rows with `seq > after_seq`, ascending, bounded by `limit`.
    async fn transcripts_after(
        &self,
        event_id: Uuid,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<TranscriptRow>, CueError>;

    // --- facts ---

    async fn upsert_fact(&self, event_id: Uuid, fact: &Fact) -> Result<(), CueError>;

    /// Soft-delete: flips `is_active` on the given keys in one batch.
    async fn deactivate_facts(&self, event_id: Uuid, keys: &[String]) -> Result<(), CueError>;

    async fn active_facts(&self, event_id: Uuid) -> Result<Vec<FactRecord>, CueError>;

    // --- cards ---

    async fn insert_card(&self, event_id: Uuid, card: &CardRecord) -> Result<Uuid, CueError>;

    /// Most recent active cards, newest first, bounded by `limit`.
    async fn active_cards(&self, event_id: Uuid, limit: i64) -> Result<Vec<CardRow>, CueError>;

    // --- checkpoints ---

    async fn load_checkpoints(&self, event_id: Uuid) -> Result<Checkpoints, CueError>;

    async fn save_checkpoint(
        &self,
        event_id: Uuid,
        agent_type: AgentType,
        last_seq: i64,
    ) -> Result<(), CueError>;

    // --- agents ---

    async fn fetch_agent(&self, event_id: Uuid) -> Result<Option<AgentRow>, CueError>;

    async fn set_agent_status(&self, event_id: Uuid, status: AgentStatus)
        -> Result<(), CueError>;

    /// Agents whose status indicates they were mid-run, for startup resume.
    async fn running_agents(&self, limit: i64) -> Result<Vec<AgentRow>, CueError>;

    // --- sessions ---

    async fn delete_sessions(&self, event_id: Uuid) -> Result<u64, CueError>;

    async fn insert_session(
        &self,
        event_id: Uuid,
        agent_type: AgentType,
        model: &str,
    ) -> Result<SessionRow, CueError>;

    async fn update_session_state(
        &self,
        id: Uuid,
        state: SessionState,
        provider_session_id: Option<&str>,
    ) -> Result<(), CueError>;

    async fn sessions_for_event(&self, event_id: Uuid) -> Result<Vec<SessionRow>, CueError>;

    // --- glossary / audit ---

    async fn glossary_for_event(&self, event_id: Uuid) -> Result<Vec<GlossaryTerm>, CueError>;

    async fn insert_agent_output(
        &self,
        event_id: Uuid,
        agent_type: AgentType,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), CueError>;

    // --- change feed ---

    /// Subscribe to transcript-row inserts across all events. At-least-once
    /// delivery; rows may arrive that this process wrote itself.
    async fn subscribe_transcripts(&self) -> Result<mpsc::Receiver<TranscriptRow>, CueError>;
}
