//! Status service: assembles per-event snapshots (session states, runtime
//! counters, recent logs, token metrics) and pushes them to the configured
//! sink on a fixed cadence while an event runs. Pushes are fire-and-forget.

use crate::subsystems::metrics::TokenMetrics;
use crate::subsystems::{runtime, AppContext};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cue_core::models::{AgentStatus, AgentType, SessionState};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusEntry {
    pub agent_type: AgentType,
    pub state: SessionState,
    pub provider_session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub event_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub agent_status: Option<AgentStatus>,
    pub sessions: Vec<SessionStatusEntry>,
    pub transcript_last_seq: i64,
    pub cards_last_seq: i64,
    pub facts_last_seq: i64,
    pub ring_len: usize,
    pub facts_len: usize,
    pub cards_len: usize,
    pub cards_triggers: u64,
    pub facts_passes: u64,
    pub recent_logs: Vec<String>,
    pub tokens: HashMap<AgentType, TokenMetrics>,
}

/// Telemetry sink for periodic snapshot pushes.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn push(&self, snapshot: &StatusSnapshot);
}

/// Default sink: structured log lines.
pub struct TracingSink;

#[async_trait]
impl StatusSink for TracingSink {
    async fn push(&self, snapshot: &StatusSnapshot) {
        tracing::info!(
            event = %snapshot.event_id,
            transcript_seq = snapshot.transcript_last_seq,
            cards_seq = snapshot.cards_last_seq,
            facts_seq = snapshot.facts_last_seq,
            cards = snapshot.cards_len,
            facts = snapshot.facts_len,
            "status"
        );
    }
}

pub async fn build_snapshot(ctx: &Arc<AppContext>, event_id: Uuid) -> Result<StatusSnapshot> {
    let agent = ctx.store.fetch_agent(event_id).await?;
    let rows = ctx.store.sessions_for_event(event_id).await?;
    let sessions = rows
        .into_iter()
        .map(|r| SessionStatusEntry {
            agent_type: r.agent_type,
            state: r.state,
            provider_session_id: r.provider_session_id,
        })
        .collect();

    let mut snapshot = StatusSnapshot {
        event_id,
        generated_at: Utc::now(),
        agent_status: agent.map(|a| a.status),
        sessions,
        transcript_last_seq: 0,
        cards_last_seq: 0,
        facts_last_seq: 0,
        ring_len: 0,
        facts_len: 0,
        cards_len: 0,
        cards_triggers: 0,
        facts_passes: 0,
        recent_logs: Vec::new(),
        tokens: ctx.metrics.snapshot_event(event_id),
    };

    if let Some(rt_arc) = runtime::get_runtime(ctx, event_id) {
        let rt = rt_arc.lock().await;
        snapshot.transcript_last_seq = rt.transcript_last_seq;
        snapshot.cards_last_seq = rt.cards_last_seq;
        snapshot.facts_last_seq = rt.facts_last_seq;
        snapshot.ring_len = rt.ring.len();
        snapshot.facts_len = rt.facts.len();
        snapshot.cards_len = rt.cards.len();
        snapshot.cards_triggers = rt.cards_triggers;
        snapshot.facts_passes = rt.facts_passes;
        snapshot.recent_logs = rt.recent_logs();
    }

    Ok(snapshot)
}

/// Periodic push loop for one event. Stops on its own when the runtime is
/// discarded; aborted explicitly on pause/teardown.
pub fn spawn_status_push(ctx: Arc<AppContext>, event_id: Uuid) -> JoinHandle<()> {
    let interval = std::time::Duration::from_millis(ctx.config.runtime.status_push_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if runtime::get_runtime(&ctx, event_id).is_none() {
                break;
            }
            match build_snapshot(&ctx, event_id).await {
                Ok(snapshot) => ctx.status_sink.push(&snapshot).await,
                Err(e) => {
                    tracing::warn!(event = %event_id, error = %e, "Status snapshot failed");
                }
            }
        }
    })
}
