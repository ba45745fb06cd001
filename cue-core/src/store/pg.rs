//! Postgres backend for `EventStore`.
//!
//! Runtime-bound sqlx queries against the schema in
//! `cue-server/migrations`. The transcript change feed rides Postgres
//! LISTEN/NOTIFY: a trigger notifies `cue_transcript_inserts` with the row
//! id, and the subscriber fetches the full row (payloads are size-limited,
//! transcript text is not).

use crate::error::CueError;
use crate::models::{
    AgentRow, AgentStatus, AgentType, CardRecord, CardRow, CheckpointRow, Checkpoints, Fact,
    FactRecord, GlossaryTerm, NewTranscript, SessionRow, SessionState, TranscriptRow,
};
use crate::store::EventStore;
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

const FEED_CHANNEL: &str = "cue_transcript_inserts";
const FEED_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn insert_transcript(&self, new: NewTranscript) -> Result<TranscriptRow, CueError> {
        let row = sqlx::query_as::<_, TranscriptRow>(
            r#"
            INSERT INTO transcripts (event_id, seq, at_ms, speaker, text, is_final)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, event_id, seq, at_ms, speaker, text, is_final, created_at
            "#,
        )
        .bind(new.event_id)
        .bind(new.seq)
        .bind(new.at_ms)
        .bind(&new.speaker)
        .bind(&new.text)
        .bind(new.is_final)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn set_transcript_seq(&self, id: Uuid, seq: i64) -> Result<(), CueError> {
        sqlx::query("UPDATE transcripts SET seq = $1 WHERE id = $2 AND seq IS NULL")
            .bind(seq)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn transcripts_after(
        &self,
        event_id: Uuid,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<TranscriptRow>, CueError> {
        let rows = sqlx::query_as::<_, TranscriptRow>(
            r#"
            SELECT id, event_id, seq, at_ms, speaker, text, is_final, created_at
            FROM transcripts
            WHERE event_id = $1 AND is_final AND seq > $2
            ORDER BY seq ASC
            LIMIT $3
            "#,
        )
        .bind(event_id)
        .bind(after_seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn upsert_fact(&self, event_id: Uuid, fact: &Fact) -> Result<(), CueError> {
        sqlx::query(
            r#"
            INSERT INTO facts (event_id, key, value, confidence, last_seen_seq, sources, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, true)
            ON CONFLICT (event_id, key) DO UPDATE SET
                value = EXCLUDED.value,
                confidence = EXCLUDED.confidence,
                last_seen_seq = EXCLUDED.last_seen_seq,
                sources = EXCLUDED.sources,
                is_active = true,
                updated_at = NOW()
            "#,
        )
        .bind(event_id)
        .bind(&fact.key)
        .bind(&fact.value)
        .bind(fact.confidence)
        .bind(fact.last_seen_seq)
        .bind(&fact.sources)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn deactivate_facts(&self, event_id: Uuid, keys: &[String]) -> Result<(), CueError> {
        if keys.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE facts SET is_active = false, updated_at = NOW()
             WHERE event_id = $1 AND key = ANY($2)",
        )
        .bind(event_id)
        .bind(keys)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_facts(&self, event_id: Uuid) -> Result<Vec<FactRecord>, CueError> {
        let rows = sqlx::query_as::<_, FactRecord>(
            r#"
            SELECT event_id, key, value, confidence, last_seen_seq, sources, is_active, updated_at
            FROM facts
            WHERE event_id = $1 AND is_active
            ORDER BY updated_at ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_card(&self, event_id: Uuid, card: &CardRecord) -> Result<Uuid, CueError> {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO cards (
                event_id, concept_id, concept_label, card_type, source_seq,
                title, body, label, image_ref, is_active
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, true)
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(&card.concept_id)
        .bind(&card.concept_label)
        .bind(card.card_type)
        .bind(card.source_seq)
        .bind(&card.title)
        .bind(&card.body)
        .bind(&card.label)
        .bind(&card.image_ref)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn active_cards(&self, event_id: Uuid, limit: i64) -> Result<Vec<CardRow>, CueError> {
        let rows = sqlx::query_as::<_, CardRow>(
            r#"
            SELECT id, event_id, concept_id, concept_label, card_type, source_seq,
                   title, body, label, image_ref, is_active, created_at
            FROM cards
            WHERE event_id = $1 AND is_active
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(event_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn load_checkpoints(&self, event_id: Uuid) -> Result<Checkpoints, CueError> {
        let rows = sqlx::query_as::<_, CheckpointRow>(
            "SELECT event_id, agent_type, last_seq, updated_at
             FROM checkpoints WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        let mut checkpoints = Checkpoints::default();
        for row in rows {
            match row.agent_type {
                AgentType::Cards => checkpoints.cards = row.last_seq,
                AgentType::Facts => checkpoints.facts = row.last_seq,
                AgentType::Transcript => {}
            }
        }
        Ok(checkpoints)
    }

    async fn save_checkpoint(
        &self,
        event_id: Uuid,
        agent_type: AgentType,
        last_seq: i64,
    ) -> Result<(), CueError> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (event_id, agent_type, last_seq)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, agent_type) DO UPDATE SET
                last_seq = GREATEST(checkpoints.last_seq, EXCLUDED.last_seq),
                updated_at = NOW()
            "#,
        )
        .bind(event_id)
        .bind(agent_type)
        .bind(last_seq)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_agent(&self, event_id: Uuid) -> Result<Option<AgentRow>, CueError> {
        let row = sqlx::query_as::<_, AgentRow>(
            "SELECT event_id, agent_id, status, display_name, metadata, created_at, updated_at
             FROM agents WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_agent_status(
        &self,
        event_id: Uuid,
        status: AgentStatus,
    ) -> Result<(), CueError> {
        sqlx::query("UPDATE agents SET status = $1, updated_at = NOW() WHERE event_id = $2")
            .bind(status)
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn running_agents(&self, limit: i64) -> Result<Vec<AgentRow>, CueError> {
        let rows = sqlx::query_as::<_, AgentRow>(
            "SELECT event_id, agent_id, status, display_name, metadata, created_at, updated_at
             FROM agents WHERE status = 'running' ORDER BY updated_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_sessions(&self, event_id: Uuid) -> Result<u64, CueError> {
        let result = sqlx::query("DELETE FROM agent_sessions WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_session(
        &self,
        event_id: Uuid,
        agent_type: AgentType,
        model: &str,
    ) -> Result<SessionRow, CueError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO agent_sessions (event_id, agent_type, state, model)
            VALUES ($1, $2, 'closed', $3)
            RETURNING id, event_id, agent_type, state, provider_session_id, model,
                      created_at, updated_at
            "#,
        )
        .bind(event_id)
        .bind(agent_type)
        .bind(model)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_session_state(
        &self,
        id: Uuid,
        state: SessionState,
        provider_session_id: Option<&str>,
    ) -> Result<(), CueError> {
        sqlx::query(
            r#"
            UPDATE agent_sessions
            SET state = $1,
                provider_session_id = COALESCE($2, provider_session_id),
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(state)
        .bind(provider_session_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sessions_for_event(&self, event_id: Uuid) -> Result<Vec<SessionRow>, CueError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT id, event_id, agent_type, state, provider_session_id, model,
                    created_at, updated_at
             FROM agent_sessions WHERE event_id = $1 ORDER BY created_at ASC",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn glossary_for_event(&self, event_id: Uuid) -> Result<Vec<GlossaryTerm>, CueError> {
        let rows = sqlx::query_as::<_, GlossaryTerm>(
            "SELECT event_id, term, definition, weight
             FROM glossary WHERE event_id = $1 ORDER BY term ASC",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_agent_output(
        &self,
        event_id: Uuid,
        agent_type: AgentType,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), CueError> {
        sqlx::query(
            "INSERT INTO agent_outputs (event_id, agent_type, kind, payload)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(event_id)
        .bind(agent_type)
        .bind(kind)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn subscribe_transcripts(&self) -> Result<mpsc::Receiver<TranscriptRow>, CueError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(FEED_CHANNEL).await?;

        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let pool = self.pool.clone();

        tokio::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(error = %e, "Transcript feed listener error; reconnecting");
                        continue;
                    }
                };

                let id = match serde_json::from_str::<serde_json::Value>(notification.payload())
                    .ok()
                    .and_then(|v| v["id"].as_str().and_then(|s| Uuid::parse_str(s).ok()))
                {
                    Some(id) => id,
                    None => {
                        tracing::warn!(payload = notification.payload(), "Bad feed payload");
                        continue;
                    }
                };

                let row = sqlx::query_as::<_, TranscriptRow>(
                    "SELECT id, event_id, seq, at_ms, speaker, text, is_final, created_at
                     FROM transcripts WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&pool)
                .await;

                match row {
                    Ok(Some(row)) => {
                        if tx.send(row).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to fetch notified transcript row");
                    }
                }
            }
        });

        Ok(rx)
    }
}
