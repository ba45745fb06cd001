//! Realtime agent-session provider seam.
//!
//! Provides a `RealtimeProvider` trait for opening per-agent-type sessions
//! against an external conversational AI service, and an `AgentSession`
//! trait for the per-session verbs (append input, pause/resume/close) plus
//! asynchronous result delivery. The provider may return zero or many
//! results per input; consumers must tolerate connection loss without
//! crashing the runtime.

use crate::models::{AgentType, CardType};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Provider-side errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },

    #[error("Session {0} is closed")]
    SessionClosed(String),
}

/// Parameters for opening one agent-type session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSpec {
    pub event_id: uuid::Uuid,
    pub agent_type: AgentType,
    pub model: String,
    pub instructions: String,
}

/// Card as drafted by the cards agent, before validation/normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardDraft {
    pub kind: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub label: Option<String>,
    pub image_ref: Option<String>,
    pub concept_id: Option<String>,
    pub concept_label: Option<String>,
    pub card_type: Option<CardType>,
}

/// Fact as extracted by the facts agent, before blending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactDraft {
    pub key: Option<String>,
    pub value: Option<serde_json::Value>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total_tokens: u64,
}

/// Asynchronous results delivered by a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Transcript {
        text: String,
        at_ms: Option<i64>,
        is_final: bool,
    },
    Card(CardDraft),
    Facts {
        facts: Vec<FactDraft>,
    },
    Usage(TokenUsage),
    Closed {
        reason: String,
    },
}

/// A successfully opened session: the provider-assigned id plus a handle.
pub struct OpenedSession {
    pub provider_session_id: String,
    pub session: Arc<dyn AgentSession>,
}

#[async_trait]
pub trait RealtimeProvider: Send + Sync {
    async fn open_session(&self, spec: &SessionSpec) -> Result<OpenedSession, ProviderError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[async_trait]
pub trait AgentSession: Send + Sync {
    async fn append_audio(&self, audio: Bytes) -> Result<(), ProviderError>;

    async fn append_context(&self, text: &str) -> Result<(), ProviderError>;

    async fn pause(&self) -> Result<(), ProviderError>;

    async fn resume(&self) -> Result<(), ProviderError>;

    async fn close(&self) -> Result<(), ProviderError>;

    /// Take the session's event stream. Yields `Some` exactly once; the
    /// caller owns the receiver from then on. Handler attachment relies on
    /// this to stay idempotent.
    async fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>>;
}
