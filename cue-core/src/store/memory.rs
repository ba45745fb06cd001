//! In-process backend for `EventStore`.
//!
//! Backs local development and the integration test suites. The change
//! feed is a broadcast channel bridged into the per-subscriber mpsc the
//! trait promises, so the full insert → notify → replay-guard path is
//! exercised without Postgres.

use crate::error::CueError;
use crate::models::{
    AgentRow, AgentStatus, AgentType, CardRecord, CardRow, Checkpoints, Fact, FactRecord,
    GlossaryTerm, NewTranscript, SessionRow, SessionState, TranscriptRow,
};
use crate::store::EventStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, Mutex};
use uuid::Uuid;

const FEED_BUFFER: usize = 256;

#[derive(Default)]
struct Inner {
    transcripts: Vec<TranscriptRow>,
    facts: HashMap<(Uuid, String), FactRecord>,
    cards: Vec<CardRow>,
    checkpoints: HashMap<(Uuid, AgentType), i64>,
    agents: HashMap<Uuid, AgentRow>,
    sessions: Vec<SessionRow>,
    glossary: Vec<GlossaryTerm>,
    outputs: Vec<(Uuid, AgentType, String, serde_json::Value)>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    feed: broadcast::Sender<TranscriptRow>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_BUFFER);
        Self {
            inner: Mutex::new(Inner::default()),
            feed,
        }
    }

    /// Seed an agent record (tests/dev; production rows come from the
    /// blueprint pipeline upstream of this service).
    pub async fn put_agent(&self, event_id: Uuid, status: AgentStatus) -> AgentRow {
        let now = Utc::now();
        let row = AgentRow {
            event_id,
            agent_id: Uuid::new_v4(),
            status,
            display_name: "agent".to_string(),
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        self.inner
            .lock()
            .await
            .agents
            .insert(event_id, row.clone());
        row
    }

    pub async fn put_glossary_term(&self, event_id: Uuid, term: &str, weight: f32) {
        self.inner.lock().await.glossary.push(GlossaryTerm {
            event_id,
            term: term.to_string(),
            definition: String::new(),
            weight,
        });
    }

    pub async fn outputs_for_event(
        &self,
        event_id: Uuid,
    ) -> Vec<(AgentType, String, serde_json::Value)> {
        self.inner
            .lock()
            .await
            .outputs
            .iter()
            .filter(|(e, _, _, _)| *e == event_id)
            .map(|(_, t, k, p)| (*t, k.clone(), p.clone()))
            .collect()
    }

    pub async fn all_transcripts(&self, event_id: Uuid) -> Vec<TranscriptRow> {
        self.inner
            .lock()
            .await
            .transcripts
            .iter()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect()
    }

    pub async fn all_facts(&self, event_id: Uuid) -> Vec<FactRecord> {
        self.inner
            .lock()
            .await
            .facts
            .values()
            .filter(|f| f.event_id == event_id)
            .cloned()
            .collect()
    }

    pub async fn all_cards(&self, event_id: Uuid) -> Vec<CardRow> {
        self.inner
            .lock()
            .await
            .cards
            .iter()
            .filter(|c| c.event_id == event_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_transcript(&self, new: NewTranscript) -> Result<TranscriptRow, CueError> {
        let row = TranscriptRow {
            id: Uuid::new_v4(),
            event_id: new.event_id,
            seq: new.seq,
            at_ms: new.at_ms,
            speaker: new.speaker,
            text: new.text,
            is_final: new.is_final,
            created_at: Utc::now(),
        };
        self.inner.lock().await.transcripts.push(row.clone());
        // No subscribers is fine.
        let _ = self.feed.send(row.clone());
        Ok(row)
    }

    async fn set_transcript_seq(&self, id: Uuid, seq: i64) -> Result<(), CueError> {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner.transcripts.iter_mut().find(|t| t.id == id) {
            if row.seq.is_none() {
                row.seq = Some(seq);
            }
        }
        Ok(())
    }

    async fn transcripts_after(
        &self,
        event_id: Uuid,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<TranscriptRow>, CueError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<TranscriptRow> = inner
            .transcripts
            .iter()
            .filter(|t| {
                t.event_id == event_id
                    && t.is_final
                    && t.seq.map(|s| s > after_seq).unwrap_or(false)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.seq);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn upsert_fact(&self, event_id: Uuid, fact: &Fact) -> Result<(), CueError> {
        let record = FactRecord {
            event_id,
            key: fact.key.clone(),
            value: fact.value.clone(),
            confidence: fact.confidence,
            last_seen_seq: fact.last_seen_seq,
            sources: fact.sources.clone(),
            is_active: true,
            updated_at: Utc::now(),
        };
        self.inner
            .lock()
            .await
            .facts
            .insert((event_id, fact.key.clone()), record);
        Ok(())
    }

    async fn deactivate_facts(&self, event_id: Uuid, keys: &[String]) -> Result<(), CueError> {
        let mut inner = self.inner.lock().await;
        for key in keys {
            if let Some(record) = inner.facts.get_mut(&(event_id, key.clone())) {
                record.is_active = false;
                record.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn active_facts(&self, event_id: Uuid) -> Result<Vec<FactRecord>, CueError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<FactRecord> = inner
            .facts
            .values()
            .filter(|f| f.event_id == event_id && f.is_active)
            .cloned()
            .collect();
        rows.sort_by_key(|f| f.updated_at);
        Ok(rows)
    }

    async fn insert_card(&self, event_id: Uuid, card: &CardRecord) -> Result<Uuid, CueError> {
        let id = Uuid::new_v4();
        let row = CardRow {
            id,
            event_id,
            concept_id: card.concept_id.clone(),
            concept_label: card.concept_label.clone(),
            card_type: card.card_type,
            source_seq: card.source_seq,
            title: card.title.clone(),
            body: card.body.clone(),
            label: card.label.clone(),
            image_ref: card.image_ref.clone(),
            is_active: true,
            created_at: Utc::now(),
        };
        self.inner.lock().await.cards.push(row);
        Ok(id)
    }

    async fn active_cards(&self, event_id: Uuid, limit: i64) -> Result<Vec<CardRow>, CueError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<CardRow> = inner
            .cards
            .iter()
            .filter(|c| c.event_id == event_id && c.is_active)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn load_checkpoints(&self, event_id: Uuid) -> Result<Checkpoints, CueError> {
        let inner = self.inner.lock().await;
        Ok(Checkpoints {
            cards: *inner
                .checkpoints
                .get(&(event_id, AgentType::Cards))
                .unwrap_or(&0),
            facts: *inner
                .checkpoints
                .get(&(event_id, AgentType::Facts))
                .unwrap_or(&0),
        })
    }

    async fn save_checkpoint(
        &self,
        event_id: Uuid,
        agent_type: AgentType,
        last_seq: i64,
    ) -> Result<(), CueError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.checkpoints.entry((event_id, agent_type)).or_insert(0);
        *entry = (*entry).max(last_seq);
        Ok(())
    }

    async fn fetch_agent(&self, event_id: Uuid) -> Result<Option<AgentRow>, CueError> {
        Ok(self.inner.lock().await.agents.get(&event_id).cloned())
    }

    async fn set_agent_status(
        &self,
        event_id: Uuid,
        status: AgentStatus,
    ) -> Result<(), CueError> {
        let mut inner = self.inner.lock().await;
        if let Some(agent) = inner.agents.get_mut(&event_id) {
            agent.status = status;
            agent.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn running_agents(&self, limit: i64) -> Result<Vec<AgentRow>, CueError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<AgentRow> = inner
            .agents
            .values()
            .filter(|a| a.status == AgentStatus::Running)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn delete_sessions(&self, event_id: Uuid) -> Result<u64, CueError> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|s| s.event_id != event_id);
        Ok((before - inner.sessions.len()) as u64)
    }

    async fn insert_session(
        &self,
        event_id: Uuid,
        agent_type: AgentType,
        model: &str,
    ) -> Result<SessionRow, CueError> {
        let now = Utc::now();
        let row = SessionRow {
            id: Uuid::new_v4(),
            event_id,
            agent_type,
            state: SessionState::Closed,
            provider_session_id: None,
            model: model.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.inner.lock().await.sessions.push(row.clone());
        Ok(row)
    }

    async fn update_session_state(
        &self,
        id: Uuid,
        state: SessionState,
        provider_session_id: Option<&str>,
    ) -> Result<(), CueError> {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.iter_mut().find(|s| s.id == id) {
            session.state = state;
            if let Some(pid) = provider_session_id {
                session.provider_session_id = Some(pid.to_string());
            }
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn sessions_for_event(&self, event_id: Uuid) -> Result<Vec<SessionRow>, CueError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<SessionRow> = inner
            .sessions
            .iter()
            .filter(|s| s.event_id == event_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.created_at);
        Ok(rows)
    }

    async fn glossary_for_event(&self, event_id: Uuid) -> Result<Vec<GlossaryTerm>, CueError> {
        Ok(self
            .inner
            .lock()
            .await
            .glossary
            .iter()
            .filter(|g| g.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn insert_agent_output(
        &self,
        event_id: Uuid,
        agent_type: AgentType,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), CueError> {
        self.inner
            .lock()
            .await
            .outputs
            .push((event_id, agent_type, kind.to_string(), payload));
        Ok(())
    }

    async fn subscribe_transcripts(&self) -> Result<mpsc::Receiver<TranscriptRow>, CueError> {
        let mut feed = self.feed.subscribe();
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(row) => {
                        if tx.send(row).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Transcript feed subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_transcript(event_id: Uuid, seq: Option<i64>, text: &str) -> NewTranscript {
        NewTranscript {
            event_id,
            seq,
            at_ms: 0,
            speaker: None,
            text: text.to_string(),
            is_final: true,
        }
    }

    #[tokio::test]
    async fn test_transcripts_after_filters_and_orders() {
        let store = MemoryStore::new();
        let event_id = Uuid::new_v4();
        store
            .insert_transcript(new_transcript(event_id, Some(3), "three"))
            .await
            .unwrap();
        store
            .insert_transcript(new_transcript(event_id, Some(1), "one"))
            .await
            .unwrap();
        store
            .insert_transcript(new_transcript(event_id, Some(2), "two"))
            .await
            .unwrap();

        let rows = store.transcripts_after(event_id, 1, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].seq, Some(2));
        assert_eq!(rows[1].seq, Some(3));
    }

    #[tokio::test]
    async fn test_fact_deactivation_is_soft() {
        let store = MemoryStore::new();
        let event_id = Uuid::new_v4();
        let fact = Fact {
            key: "k".to_string(),
            value: json!(1),
            confidence: 0.5,
            last_seen_seq: 1,
            sources: vec![1],
            is_active: true,
        };
        store.upsert_fact(event_id, &fact).await.unwrap();
        store
            .deactivate_facts(event_id, &["k".to_string()])
            .await
            .unwrap();

        assert!(store.active_facts(event_id).await.unwrap().is_empty());
        // Row still there, just inactive.
        assert_eq!(store.all_facts(event_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_never_regresses() {
        let store = MemoryStore::new();
        let event_id = Uuid::new_v4();
        store
            .save_checkpoint(event_id, AgentType::Cards, 10)
            .await
            .unwrap();
        store
            .save_checkpoint(event_id, AgentType::Cards, 4)
            .await
            .unwrap();
        let checkpoints = store.load_checkpoints(event_id).await.unwrap();
        assert_eq!(checkpoints.cards, 10);
    }

    #[tokio::test]
    async fn test_feed_delivers_inserts() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe_transcripts().await.unwrap();
        let event_id = Uuid::new_v4();
        store
            .insert_transcript(new_transcript(event_id, Some(1), "hello"))
            .await
            .unwrap();
        let row = rx.recv().await.expect("feed row");
        assert_eq!(row.event_id, event_id);
        assert_eq!(row.seq, Some(1));
    }
}
