//! Shared harness for the integration suites: a scripted provider whose
//! sessions record what they receive, with test-driven event streams.

use async_trait::async_trait;
use bytes::Bytes;
use cue_core::config::{CueConfig, DatabaseConfig, FactsConfig, ProviderConfig, ServiceConfig};
use cue_core::models::AgentType;
use cue_core::provider::{
    AgentSession, OpenedSession, ProviderError, RealtimeProvider, SessionEvent, SessionSpec,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

pub fn test_config(debounce_ms: u64) -> CueConfig {
    CueConfig {
        service: ServiceConfig {
            log_level: "debug".to_string(),
        },
        database: DatabaseConfig {
            url: "postgresql://unused".to_string(),
            max_connections: 1,
        },
        provider: ProviderConfig {
            base_url: "http://unused".to_string(),
            api_key: None,
            transcript_model: "rt-transcribe-1".to_string(),
            cards_model: "rt-cards-1".to_string(),
            facts_model: "rt-facts-1".to_string(),
            max_retries: 1,
            retry_delay_ms: 10,
            poll_wait_seconds: 1,
        },
        ring: Default::default(),
        facts: FactsConfig {
            debounce_ms,
            ..Default::default()
        },
        cards: Default::default(),
        salience: Default::default(),
        rate_limit: Default::default(),
        runtime: Default::default(),
        metrics: Default::default(),
        http: Default::default(),
    }
}

pub struct ScriptedSession {
    pub event_id: Uuid,
    pub agent_type: AgentType,
    pub contexts: Mutex<Vec<String>>,
    pub audio: Mutex<Vec<Bytes>>,
    pub paused: AtomicBool,
    pub closed: AtomicBool,
    events: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
}

#[async_trait]
impl AgentSession for ScriptedSession {
    async fn append_audio(&self, audio: Bytes) -> Result<(), ProviderError> {
        self.audio.lock().await.push(audio);
        Ok(())
    }

    async fn append_context(&self, text: &str) -> Result<(), ProviderError> {
        self.contexts.lock().await.push(text.to_string());
        Ok(())
    }

    async fn pause(&self) -> Result<(), ProviderError> {
        self.paused.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), ProviderError> {
        self.paused
            .store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.lock().await.take()
    }
}

#[derive(Default)]
pub struct ScriptedProvider {
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
    senders: Mutex<Vec<(Uuid, AgentType, mpsc::Sender<SessionEvent>)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn session(
        &self,
        event_id: Uuid,
        agent_type: AgentType,
    ) -> Option<Arc<ScriptedSession>> {
        self.sessions
            .lock()
            .await
            .iter()
            .rev()
            .find(|s| s.event_id == event_id && s.agent_type == agent_type)
            .cloned()
    }

    /// Push a result into the newest matching session's event stream.
    pub async fn emit(&self, event_id: Uuid, agent_type: AgentType, event: SessionEvent) -> bool {
        let senders = self.senders.lock().await;
        if let Some((_, _, tx)) = senders
            .iter()
            .rev()
            .find(|(e, t, _)| *e == event_id && *t == agent_type)
        {
            return tx.send(event).await.is_ok();
        }
        false
    }
}

#[async_trait]
impl RealtimeProvider for ScriptedProvider {
    async fn open_session(&self, spec: &SessionSpec) -> Result<OpenedSession, ProviderError> {
        let (tx, rx) = mpsc::channel(64);
        let session = Arc::new(ScriptedSession {
            event_id: spec.event_id,
            agent_type: spec.agent_type,
            contexts: Mutex::new(Vec::new()),
            audio: Mutex::new(Vec::new()),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events: Mutex::new(Some(rx)),
        });

        self.sessions.lock().await.push(session.clone());
        let mut senders = self.senders.lock().await;
        senders.push((spec.event_id, spec.agent_type, tx));
        let n = senders.len();

        Ok(OpenedSession {
            provider_session_id: format!("scripted-{}-{}", spec.agent_type, n),
            session,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
