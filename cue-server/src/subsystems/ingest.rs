//! Transcript ingestion: accepts incoming audio, turns provider
//! transcription results into sequenced durable rows, and absorbs
//! transcript inserts observed through the change feed.

use crate::subsystems::runtime::{EventRuntime, PendingChunkMeta};
use crate::subsystems::{best_effort, lifecycle, now_ms, processor, runtime, AppContext};
use anyhow::{Context, Result};
use bytes::Bytes;
use cue_core::models::{AgentType, NewTranscript, TranscriptChunk, TranscriptRow};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Forward an audio chunk to the event's transcript session, creating the
/// runtime and the session on first use. Per-chunk metadata is stashed and
/// attached to the next transcription result.
pub async fn append_audio(
    ctx: &Arc<AppContext>,
    event_id: Uuid,
    audio: Bytes,
    meta: PendingChunkMeta,
) -> Result<()> {
    let rt_arc = runtime::ensure_runtime(ctx, event_id).await?;
    let mut rt = rt_arc.lock().await;

    if !rt.sessions.contains_key(&AgentType::Transcript) {
        lifecycle::open_and_bind(ctx, &mut rt, AgentType::Transcript)
            .await
            .context("opening transcript session")?;
        processor::attach_session_handlers(ctx, &rt_arc, &mut rt).await;
    }

    rt.pending_audio_meta = Some(meta);

    let Some(binding) = rt.sessions.get(&AgentType::Transcript) else {
        anyhow::bail!("transcript session missing for event {}", event_id);
    };
    binding
        .session
        .append_audio(audio)
        .await
        .context("forwarding audio to transcript session")?;

    Ok(())
}

/// A transcription result arrived from the provider: sequence it, persist
/// it, and hand it to the processor. Interim fragments stay in-memory.
pub async fn handle_realtime_transcript(
    ctx: &Arc<AppContext>,
    rt_arc: &Arc<Mutex<EventRuntime>>,
    event_id: Uuid,
    text: String,
    at_ms: Option<i64>,
    is_final: bool,
) {
    let mut rt = rt_arc.lock().await;

    let at_ms = at_ms.unwrap_or_else(now_ms);
    let meta = rt.pending_audio_meta.take().unwrap_or_default();

    if !is_final {
        let chunk = TranscriptChunk {
            seq: 0,
            at_ms,
            speaker: meta.speaker,
            text,
            is_final: false,
            transcript_id: None,
        };
        processor::process_transcript_chunk(ctx, rt_arc, &mut rt, chunk).await;
        return;
    }

    let seq = rt.transcript_last_seq + 1;
    let row = best_effort(
        "persisting transcript row",
        ctx.store
            .insert_transcript(NewTranscript {
                event_id,
                seq: Some(seq),
                at_ms,
                speaker: meta.speaker.clone(),
                text: text.clone(),
                is_final: true,
            })
            .await,
    );

    let chunk = TranscriptChunk {
        seq,
        at_ms,
        speaker: meta.speaker,
        text,
        is_final: true,
        transcript_id: row.map(|r| r.id),
    };
    processor::process_transcript_chunk(ctx, rt_arc, &mut rt, chunk).await;
}

/// A transcript row appeared in durable storage (possibly written by
/// another process instance). No-ops without a local runtime, and on rows
/// whose sequence has already been consumed — the idempotent replay guard
/// that makes at-least-once feed delivery safe.
pub async fn handle_transcript_insert(ctx: &Arc<AppContext>, row: TranscriptRow) {
    let Some(rt_arc) = runtime::get_runtime(ctx, row.event_id) else {
        return;
    };
    let Some(seq) = row.seq else {
        return;
    };

    let mut rt = rt_arc.lock().await;
    if seq <= rt.transcript_last_seq {
        return;
    }

    processor::handle_transcript(ctx, &rt_arc, &mut rt, &row).await;
}
