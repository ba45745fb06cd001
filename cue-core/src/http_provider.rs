//! HTTP backend for the realtime provider seam.
//!
//! Talks to a provider speaking a small session API:
//! - `POST /v1/agent-sessions` — open a session, returns `{ "session_id" }`
//! - `POST /v1/agent-sessions/{id}/audio` — raw audio bytes
//! - `POST /v1/agent-sessions/{id}/context` — structured text context
//! - `POST /v1/agent-sessions/{id}/pause|resume|close`
//! - `GET  /v1/agent-sessions/{id}/events?wait={s}` — long-poll for results
//!
//! Results are forwarded into a bounded mpsc channel by a per-session poll
//! task; a lost connection is retried with a delay rather than tearing the
//! session down.

use crate::config::ProviderConfig;
use crate::provider::{
    AgentSession, OpenedSession, ProviderError, RealtimeProvider, SessionEvent, SessionSpec,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    config: ProviderConfig,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OpenSessionResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<SessionEvent>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: u16,
    message: String,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.poll_wait_seconds + 10))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Create a provider with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: ProviderConfig,
        base_url: String,
    ) -> Result<Self, ProviderError> {
        let mut config = config;
        config.base_url = base_url;
        Self::new(config)
    }

    async fn open_once(&self, spec: &SessionSpec) -> Result<String, ProviderError> {
        let url = format!("{}/v1/agent-sessions", self.base_url);
        let mut request = self.client.post(&url).json(spec);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);
            let (code, message) = detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Provider open-session error");
            return Err(ProviderError::Api { code, message });
        }

        let opened: OpenSessionResponse = response.json().await?;
        Ok(opened.session_id)
    }
}

#[async_trait]
impl RealtimeProvider for HttpProvider {
    async fn open_session(&self, spec: &SessionSpec) -> Result<OpenedSession, ProviderError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let session_id = match Retry::spawn(retry_strategy, || self.open_once(spec)).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All open-session retry attempts failed"
                );
                return Err(ProviderError::RetryExhausted {
                    attempts: self.config.max_retries,
                });
            }
        };

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let poller = spawn_event_poller(
            self.client.clone(),
            self.base_url.clone(),
            self.config.api_key.clone(),
            session_id.clone(),
            self.config.poll_wait_seconds,
            self.config.retry_delay_ms,
            tx,
        );

        let session = Arc::new(HttpAgentSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.config.api_key.clone(),
            session_id: session_id.clone(),
            events: Mutex::new(Some(rx)),
            poller,
        });

        Ok(OpenedSession {
            provider_session_id: session_id,
            session,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn spawn_event_poller(
    client: Client,
    base_url: String,
    api_key: Option<String>,
    session_id: String,
    poll_wait_seconds: u64,
    retry_delay_ms: u64,
    tx: mpsc::Sender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let url = format!(
            "{}/v1/agent-sessions/{}/events?wait={}",
            base_url, session_id, poll_wait_seconds
        );

        loop {
            let mut request = client.get(&url);
            if let Some(key) = &api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) if response.status().as_u16() == 410 => {
                    let _ = tx
                        .send(SessionEvent::Closed {
                            reason: "provider closed session".to_string(),
                        })
                        .await;
                    break;
                }
                Ok(response) if response.status().is_success() => {
                    match response.json::<EventsResponse>().await {
                        Ok(batch) => {
                            for event in batch.events {
                                if tx.send(event).await.is_err() {
                                    // Receiver gone: runtime was torn down.
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(session = %session_id, error = %e, "Bad event batch from provider");
                        }
                    }
                }
                Ok(response) => {
                    tracing::warn!(
                        session = %session_id,
                        status = response.status().as_u16(),
                        "Provider event poll returned error status"
                    );
                    tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
                }
                Err(e) => {
                    tracing::warn!(session = %session_id, error = %e, "Provider event poll failed; retrying");
                    tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
                }
            }

            if tx.is_closed() {
                return;
            }
        }
    })
}

pub struct HttpAgentSession {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    session_id: String,
    events: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    poller: JoinHandle<()>,
}

impl HttpAgentSession {
    async fn post_action(&self, action: &str) -> Result<(), ProviderError> {
        let url = format!(
            "{}/v1/agent-sessions/{}/{}",
            self.base_url, self.session_id, action
        );
        let mut request = self.client.post(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 410 {
            return Err(ProviderError::SessionClosed(self.session_id.clone()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                code: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AgentSession for HttpAgentSession {
    async fn append_audio(&self, audio: Bytes) -> Result<(), ProviderError> {
        let url = format!(
            "{}/v1/agent-sessions/{}/audio",
            self.base_url, self.session_id
        );
        let mut request = self
            .client
            .post(&url)
            .header("content-type", "application/octet-stream")
            .body(audio);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 410 {
            return Err(ProviderError::SessionClosed(self.session_id.clone()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                code: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    async fn append_context(&self, text: &str) -> Result<(), ProviderError> {
        let url = format!(
            "{}/v1/agent-sessions/{}/context",
            self.base_url, self.session_id
        );
        let mut request = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "text": text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 410 {
            return Err(ProviderError::SessionClosed(self.session_id.clone()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                code: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), ProviderError> {
        self.post_action("pause").await
    }

    async fn resume(&self) -> Result<(), ProviderError> {
        self.post_action("resume").await
    }

    async fn close(&self) -> Result<(), ProviderError> {
        let result = self.post_action("close").await;
        self.poller.abort();
        result
    }

    async fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.lock().await.take()
    }
}
