//! Per-event runtime state and the process-wide registry.
//!
//! One `EventRuntime` exists per live event, owned by the registry as
//! `Arc<Mutex<_>>`: every mutation for an event is serialized behind its
//! own lock while independent events progress in parallel. Nothing here is
//! persisted whole — a runtime is rebuilt from checkpoints plus durable
//! facts/cards, then caught up by replay.

use crate::subsystems::{best_effort, checkpoint, salience::RateLimiter, AppContext};
use anyhow::{Context, Result};
use cue_core::models::{AgentType, GlossaryTerm, TranscriptChunk};
use cue_core::{AgentSession, CardsStore, CueError, FactsStore, RingBuffer};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Live session handle for one agent type, plus its durable row id.
pub struct SessionBinding {
    pub session: Arc<dyn AgentSession>,
    pub provider_session_id: String,
    pub row_id: Uuid,
}

/// Per-chunk metadata stashed by `append_audio`, attached to the next
/// transcription result.
#[derive(Debug, Clone, Default)]
pub struct PendingChunkMeta {
    pub speaker: Option<String>,
    pub encoding: Option<String>,
    pub sample_rate: Option<u32>,
}

pub struct EventRuntime {
    pub event_id: Uuid,
    pub agent_id: Uuid,

    // Monotonic: highest sequence each pipeline has consumed.
    pub transcript_last_seq: i64,
    pub cards_last_seq: i64,
    pub facts_last_seq: i64,

    pub ring: RingBuffer,
    pub facts: FactsStore,
    pub cards: CardsStore,

    pub sessions: HashMap<AgentType, SessionBinding>,
    pub enabled_agents: HashMap<AgentType, bool>,
    pub attached_sessions: HashSet<String>,

    pub glossary: Vec<GlossaryTerm>,
    pub rate_limiter: RateLimiter,
    pub pending_audio_meta: Option<PendingChunkMeta>,

    pub debounce: Option<JoinHandle<()>>,
    pub status_push: Option<JoinHandle<()>>,

    // Counters surfaced in status snapshots.
    pub cards_triggers: u64,
    pub facts_passes: u64,

    recent_logs: VecDeque<String>,
    log_capacity: usize,
}

impl EventRuntime {
    /// Advance all three counters to at least `seq`. Never decreases.
    pub fn advance_seqs(&mut self, seq: i64) {
        self.transcript_last_seq = self.transcript_last_seq.max(seq);
        self.cards_last_seq = self.cards_last_seq.max(seq);
        self.facts_last_seq = self.facts_last_seq.max(seq);
    }

    pub fn max_seq(&self) -> i64 {
        self.transcript_last_seq
            .max(self.cards_last_seq)
            .max(self.facts_last_seq)
    }

    pub fn agent_enabled(&self, agent_type: AgentType) -> bool {
        *self.enabled_agents.get(&agent_type).unwrap_or(&true)
    }

    /// Bounded in-memory log, surfaced in status snapshots.
    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(event = %self.event_id, "{}", line);
        self.recent_logs.push_back(line);
        while self.recent_logs.len() > self.log_capacity {
            self.recent_logs.pop_front();
        }
    }

    pub fn recent_logs(&self) -> Vec<String> {
        self.recent_logs.iter().cloned().collect()
    }

    /// Push a chunk into the window without any downstream effect.
    pub fn remember_chunk(&mut self, chunk: TranscriptChunk) {
        self.ring.push(chunk);
    }
}

/// Build a runtime from durable state. Fatal if the event has no agent
/// record; nothing is registered on failure.
pub async fn create_runtime(
    ctx: &Arc<AppContext>,
    event_id: Uuid,
) -> Result<Arc<Mutex<EventRuntime>>> {
    let agent = ctx
        .store
        .fetch_agent(event_id)
        .await?
        .ok_or(CueError::MissingAgent(event_id))?;

    let checkpoints = checkpoint::load(ctx, event_id)
        .await
        .context("loading checkpoints")?;
    let glossary = ctx
        .store
        .glossary_for_event(event_id)
        .await
        .context("loading glossary")?;

    // A rebuilt runtime starts from clean telemetry.
    ctx.metrics.clear_event(event_id);

    let mut facts = FactsStore::new(ctx.config.facts.capacity);
    let fact_rows = ctx.store.active_facts(event_id).await?;
    let evicted = facts.load(fact_rows);
    if !evicted.is_empty() {
        // Hydration may hand us more active rows than capacity; the losers
        // are marked inactive durably, not silently kept over capacity.
        best_effort(
            "deactivating facts evicted during hydration",
            ctx.store.deactivate_facts(event_id, &evicted).await,
        );
    }

    let mut cards = CardsStore::new(ctx.config.cards.capacity);
    let card_rows = ctx
        .store
        .active_cards(event_id, ctx.config.cards.capacity as i64)
        .await?;
    // Rows come newest-first; hydrate oldest-first so FIFO order holds.
    for row in card_rows.into_iter().rev() {
        cards.add(row.into_record());
    }

    let cards_last_seq = checkpoints.cards.max(cards.max_source_seq().unwrap_or(0));
    let facts_last_seq = checkpoints.facts;

    let runtime = EventRuntime {
        event_id,
        agent_id: agent.agent_id,
        transcript_last_seq: cards_last_seq.max(facts_last_seq),
        cards_last_seq,
        facts_last_seq,
        ring: RingBuffer::new(ctx.config.ring.capacity, ctx.config.ring.max_age_ms),
        facts,
        cards,
        sessions: HashMap::new(),
        enabled_agents: HashMap::new(),
        attached_sessions: HashSet::new(),
        glossary,
        rate_limiter: RateLimiter::new(ctx.config.rate_limit.clone()),
        pending_audio_meta: None,
        debounce: None,
        status_push: None,
        cards_triggers: 0,
        facts_passes: 0,
        recent_logs: VecDeque::new(),
        log_capacity: ctx.config.runtime.recent_log_capacity,
    };

    tracing::info!(
        event = %event_id,
        cards_seq = runtime.cards_last_seq,
        facts_seq = runtime.facts_last_seq,
        "Runtime created"
    );

    let runtime = Arc::new(Mutex::new(runtime));
    // A concurrent ensure may have won the race; keep whichever landed.
    let entry = ctx
        .runtimes
        .entry(event_id)
        .or_insert_with(|| runtime.clone());
    Ok(entry.value().clone())
}

/// Get the registered runtime, or build (and replay) one.
pub async fn ensure_runtime(
    ctx: &Arc<AppContext>,
    event_id: Uuid,
) -> Result<Arc<Mutex<EventRuntime>>> {
    if let Some(existing) = ctx.runtimes.get(&event_id) {
        return Ok(existing.clone());
    }
    let runtime = create_runtime(ctx, event_id).await?;
    {
        let mut rt = runtime.lock().await;
        replay_transcripts(ctx, &mut rt).await?;
    }
    Ok(runtime)
}

pub fn get_runtime(ctx: &AppContext, event_id: Uuid) -> Option<Arc<Mutex<EventRuntime>>> {
    ctx.runtimes.get(&event_id).map(|r| r.value().clone())
}

/// Drop a runtime from the registry, cancelling its timers first.
pub async fn remove_runtime(ctx: &Arc<AppContext>, event_id: Uuid) {
    if let Some((_, runtime)) = ctx.runtimes.remove(&event_id) {
        let mut rt = runtime.lock().await;
        crate::subsystems::processor::cleanup(&mut rt);
        if let Some(handle) = rt.status_push.take() {
            handle.abort();
        }
        tracing::info!(event = %event_id, "Runtime removed");
    }
}

/// Catch up on rows this process has not seen: repopulates the window and
/// advances counters. Replay never re-triggers card/fact generation.
pub async fn replay_transcripts(ctx: &Arc<AppContext>, rt: &mut EventRuntime) -> Result<()> {
    let after = rt.max_seq();
    let rows = ctx
        .store
        .transcripts_after(rt.event_id, after, ctx.config.runtime.replay_limit)
        .await?;

    let replayed = rows.len();
    for row in rows {
        let chunk = TranscriptChunk::from_row(&row);
        let seq = chunk.seq;
        rt.remember_chunk(chunk);
        rt.advance_seqs(seq);
    }

    if replayed > 0 {
        rt.log(format!("replayed {} transcript rows after seq {}", replayed, after));
    }
    Ok(())
}

/// Startup pass: rebuild runtimes for agents that were mid-run. Per-event
/// failures are logged and skipped so one bad event cannot block the rest.
pub async fn resume_existing_events(ctx: &Arc<AppContext>, limit: i64) -> Result<usize> {
    let agents = ctx.store.running_agents(limit).await?;
    let mut resumed = 0;

    for agent in agents {
        match ensure_runtime(ctx, agent.event_id).await {
            Ok(_) => {
                resumed += 1;
                tracing::info!(event = %agent.event_id, "Resumed mid-run event");
            }
            Err(e) => {
                tracing::error!(event = %agent.event_id, error = %e, "Failed to resume event");
            }
        }
    }

    Ok(resumed)
}
