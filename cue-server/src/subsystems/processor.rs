//! Event processor: turns finalized transcript chunks into durable cards
//! and facts, and owns the fan-out timing (synchronous cards pass,
//! debounced facts pass).

use crate::subsystems::{
    best_effort, checkpoint, ingest, now_ms, runtime::EventRuntime, salience, AppContext,
};
use cue_core::models::{
    AgentType, CardRecord, CardType, SessionState, TranscriptChunk, TranscriptRow,
};
use cue_core::provider::{CardDraft, FactDraft, SessionEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

// Window terms suggesting the audience is looking at something.
const VISUAL_CUES: [&str; 7] = ["diagram", "chart", "graph", "map", "image", "picture", "slide"];

/// Normalize a durable row into a chunk and process it.
pub async fn handle_transcript(
    ctx: &Arc<AppContext>,
    rt_arc: &Arc<Mutex<EventRuntime>>,
    rt: &mut EventRuntime,
    row: &TranscriptRow,
) {
    let chunk = TranscriptChunk::from_row(row);
    process_transcript_chunk(ctx, rt_arc, rt, chunk).await;
}

/// Core per-chunk path. Interim chunks only populate the window; final
/// chunks advance counters, run the cards pass, and (re)arm the facts
/// debounce.
pub async fn process_transcript_chunk(
    ctx: &Arc<AppContext>,
    rt_arc: &Arc<Mutex<EventRuntime>>,
    rt: &mut EventRuntime,
    mut chunk: TranscriptChunk,
) {
    if chunk.is_final && chunk.seq <= 0 {
        // Late assignment, derived from the cards checkpoint; persisted back
        // so the number is stable across replays.
        chunk.seq = rt.cards_last_seq + 1;
        if let Some(id) = chunk.transcript_id {
            best_effort(
                "persisting late-assigned transcript seq",
                ctx.store.set_transcript_seq(id, chunk.seq).await,
            );
        }
    }

    rt.remember_chunk(chunk.clone());

    if !chunk.is_final {
        return;
    }

    rt.advance_seqs(chunk.seq);

    run_cards_pipeline(ctx, rt, &chunk).await;
    best_effort(
        "saving cards checkpoint",
        checkpoint::save(ctx, rt.event_id, AgentType::Cards, rt.cards_last_seq).await,
    );

    schedule_facts_debounce(ctx, rt_arc, rt);
}

/// Salience-gated cards trigger for one final chunk.
async fn run_cards_pipeline(ctx: &Arc<AppContext>, rt: &mut EventRuntime, chunk: &TranscriptChunk) {
    if !rt.agent_enabled(AgentType::Cards) {
        return;
    }

    let window = rt.ring.snapshot();
    let candidates =
        salience::extract_candidates(&window, &rt.glossary, &rt.facts, &ctx.config.salience);
    if candidates.is_empty() {
        return;
    }

    let now = now_ms();
    let freshness = ctx.config.cards.freshness_ms;
    let mut best: Option<(f32, &salience::Candidate)> = None;
    for candidate in &candidates {
        let s = salience::score(
            candidate,
            &window,
            &rt.cards,
            &ctx.config.salience,
            freshness,
            now,
        );
        if best.map(|(b, _)| s > b).unwrap_or(true) {
            best = Some((s, candidate));
        }
    }

    let Some((score, candidate)) = best else {
        return;
    };
    if score <= ctx.config.salience.threshold {
        return;
    }
    if !rt.rate_limiter.allows(now) {
        rt.log(format!(
            "card trigger for '{}' suppressed by rate limiter",
            candidate.label
        ));
        return;
    }

    rt.rate_limiter.record(now);
    rt.cards_triggers += 1;

    // Provisional record: keeps freshness and recency penalties honest
    // within this run. The drafted card itself lands in durable storage.
    rt.cards.add(CardRecord {
        concept_id: candidate.concept_id.clone(),
        concept_label: candidate.label.clone(),
        card_type: CardType::Text,
        source_seq: chunk.seq,
        created_at_ms: now,
        title: None,
        body: None,
        label: None,
        image_ref: None,
    });

    if let Some(binding) = rt.sessions.get(&AgentType::Cards) {
        let context = format!(
            "Focus concept: {} (score {:.2})\n{}",
            candidate.label,
            score,
            window_text(&window)
        );
        best_effort(
            "forwarding card trigger to cards session",
            binding.session.append_context(&context).await,
        );
    }

    rt.log(format!(
        "card trigger: '{}' scored {:.2} at seq {}",
        candidate.label, score, chunk.seq
    ));
}

/// Cancel-and-reschedule: each final chunk restarts the quiet-period timer
/// under the event lock, so bursts collapse into one facts pass scheduled
/// `debounce_ms` after the last chunk.
fn schedule_facts_debounce(
    ctx: &Arc<AppContext>,
    rt_arc: &Arc<Mutex<EventRuntime>>,
    rt: &mut EventRuntime,
) {
    if let Some(handle) = rt.debounce.take() {
        handle.abort();
    }

    let ctx = ctx.clone();
    let rt_arc = rt_arc.clone();
    let debounce = Duration::from_millis(ctx.config.facts.debounce_ms);

    rt.debounce = Some(tokio::spawn(async move {
        tokio::time::sleep(debounce).await;
        let mut rt = rt_arc.lock().await;
        rt.debounce = None;
        run_facts_pass(&ctx, &mut rt).await;
    }));
}

/// Debounced facts pass: hand the current window to the facts agent and
/// checkpoint how far the facts pipeline has consumed.
pub async fn run_facts_pass(ctx: &Arc<AppContext>, rt: &mut EventRuntime) {
    if !rt.agent_enabled(AgentType::Facts) {
        return;
    }

    rt.facts_passes += 1;

    let window = rt.ring.snapshot();
    if let Some(binding) = rt.sessions.get(&AgentType::Facts) {
        let context = format!(
            "Extract key facts from this transcript window:\n{}",
            window_text(&window)
        );
        best_effort(
            "forwarding facts window to facts session",
            binding.session.append_context(&context).await,
        );
    }

    best_effort(
        "saving facts checkpoint",
        checkpoint::save(ctx, rt.event_id, AgentType::Facts, rt.facts_last_seq).await,
    );

    rt.log(format!("facts pass at seq {}", rt.facts_last_seq));
}

fn window_text(window: &[TranscriptChunk]) -> String {
    window
        .iter()
        .filter(|c| c.is_final)
        .map(|c| match &c.speaker {
            Some(speaker) => format!("{}: {}", speaker, c.text),
            None => c.text.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wire each bound session's event stream into the response handlers.
/// Idempotent per provider session id: a stream is consumed at most once.
pub async fn attach_session_handlers(
    ctx: &Arc<AppContext>,
    rt_arc: &Arc<Mutex<EventRuntime>>,
    rt: &mut EventRuntime,
) {
    let bindings: Vec<(AgentType, String, Uuid)> = rt
        .sessions
        .iter()
        .map(|(t, b)| (*t, b.provider_session_id.clone(), b.row_id))
        .collect();

    for (agent_type, provider_session_id, row_id) in bindings {
        if rt.attached_sessions.contains(&provider_session_id) {
            continue;
        }

        let Some(binding) = rt.sessions.get(&agent_type) else {
            continue;
        };
        let Some(mut events) = binding.session.take_events().await else {
            // Stream already consumed elsewhere; treat as attached.
            rt.attached_sessions.insert(provider_session_id);
            continue;
        };

        rt.attached_sessions.insert(provider_session_id.clone());

        let ctx = ctx.clone();
        let rt_arc = rt_arc.clone();
        let event_id = rt.event_id;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::Transcript {
                        text,
                        at_ms,
                        is_final,
                    } => {
                        ingest::handle_realtime_transcript(
                            &ctx, &rt_arc, event_id, text, at_ms, is_final,
                        )
                        .await;
                    }
                    SessionEvent::Card(draft) => {
                        let mut rt = rt_arc.lock().await;
                        handle_card_response(&ctx, &mut rt, draft).await;
                    }
                    SessionEvent::Facts { facts } => {
                        let mut rt = rt_arc.lock().await;
                        handle_facts_response(&ctx, &mut rt, facts).await;
                    }
                    SessionEvent::Usage(usage) => {
                        ctx.metrics.record(event_id, agent_type, usage.total_tokens);
                    }
                    SessionEvent::Closed { reason } => {
                        tracing::warn!(
                            event = %event_id,
                            agent = %agent_type,
                            reason = %reason,
                            "Provider closed session"
                        );
                        best_effort(
                            "marking session row errored",
                            ctx.store
                                .update_session_state(row_id, SessionState::Error, None)
                                .await,
                        );
                        let mut rt = rt_arc.lock().await;
                        rt.sessions.remove(&agent_type);
                        rt.attached_sessions.remove(&provider_session_id);
                        rt.log(format!("{} session closed: {}", agent_type, reason));
                        break;
                    }
                }
            }
        });
    }
}

/// Validate, classify and persist one drafted card. New cards flow to
/// durable storage; the in-memory history only refills at hydration.
pub async fn handle_card_response(ctx: &Arc<AppContext>, rt: &mut EventRuntime, draft: CardDraft) {
    let Some(kind) = draft.kind.clone() else {
        rt.log("card draft dropped: missing kind");
        return;
    };
    let Some(title) = draft.title.clone() else {
        rt.log("card draft dropped: missing title");
        return;
    };

    let card_type = draft
        .card_type
        .unwrap_or_else(|| classify_card_type(&rt.ring.snapshot(), &draft));

    // Per-type required fields: visual cards carry a label, never a body.
    let (label, body) = match card_type {
        CardType::Visual => (draft.label.clone().or_else(|| Some(title.clone())), None),
        CardType::TextVisual => (
            draft.label.clone().or_else(|| Some(title.clone())),
            draft.body.clone(),
        ),
        CardType::Text => (draft.label.clone(), draft.body.clone()),
    };

    let concept_label = draft
        .concept_label
        .clone()
        .unwrap_or_else(|| title.clone());
    let concept_id = draft
        .concept_id
        .clone()
        .unwrap_or_else(|| salience::concept_id_for(&concept_label));

    let record = CardRecord {
        concept_id,
        concept_label,
        card_type,
        source_seq: rt.cards_last_seq,
        created_at_ms: now_ms(),
        title: Some(title.clone()),
        body,
        label,
        image_ref: draft.image_ref.clone(),
    };

    best_effort(
        "persisting card row",
        ctx.store.insert_card(rt.event_id, &record).await,
    );
    best_effort(
        "persisting card agent output",
        ctx.store
            .insert_agent_output(
                rt.event_id,
                AgentType::Cards,
                "card",
                serde_json::json!({
                    "kind": kind,
                    "card": record,
                }),
            )
            .await,
    );

    rt.log(format!("card persisted: '{}'", title));
}

/// Upsert each keyed fact, persist the blended result, and deactivate any
/// evicted keys in one batch. A single bad row never aborts the batch.
pub async fn handle_facts_response(
    ctx: &Arc<AppContext>,
    rt: &mut EventRuntime,
    drafts: Vec<FactDraft>,
) {
    let mut all_evicted: Vec<String> = Vec::new();
    let seq = rt.facts_last_seq;

    for draft in drafts {
        let Some(key) = draft.key else {
            continue;
        };
        let Some(value) = draft.value else {
            continue;
        };
        let confidence = draft
            .confidence
            .unwrap_or(ctx.config.facts.default_confidence);

        let outcome = rt.facts.upsert(&key, value, confidence, seq, &[seq]);
        all_evicted.extend(outcome.evicted);

        // The store's blended confidence is what gets persisted, not the
        // raw draft value.
        if best_effort(
            "persisting fact row",
            ctx.store.upsert_fact(rt.event_id, &outcome.fact).await,
        )
        .is_some()
        {
            best_effort(
                "persisting fact agent output",
                ctx.store
                    .insert_agent_output(
                        rt.event_id,
                        AgentType::Facts,
                        "facts",
                        serde_json::json!({
                            "key": outcome.fact.key,
                            "value": outcome.fact.value,
                            "confidence": outcome.fact.confidence,
                        }),
                    )
                    .await,
            );
        }
    }

    if !all_evicted.is_empty() {
        best_effort(
            "deactivating evicted facts",
            ctx.store.deactivate_facts(rt.event_id, &all_evicted).await,
        );
        rt.log(format!("evicted {} facts", all_evicted.len()));
    }
}

/// Transcript-aware classifier for drafts that arrive without a type.
fn classify_card_type(window: &[TranscriptChunk], draft: &CardDraft) -> CardType {
    if draft.image_ref.is_some() {
        return if draft.body.is_none() {
            CardType::Visual
        } else {
            CardType::TextVisual
        };
    }
    let visual_context = window.iter().any(|c| {
        let line = c.text.to_lowercase();
        VISUAL_CUES.iter().any(|cue| line.contains(cue))
    });
    if visual_context {
        CardType::TextVisual
    } else {
        CardType::Text
    }
}

/// Cancel the debounce timer and clear attachment markers. Sessions are
/// left alone; closing them is the lifecycle's job.
pub fn cleanup(rt: &mut EventRuntime) {
    if let Some(handle) = rt.debounce.take() {
        handle.abort();
    }
    rt.attached_sessions.clear();
}
