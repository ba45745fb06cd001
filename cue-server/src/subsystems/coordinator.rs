//! Session coordinator: the operator-facing verbs, composing the runtime
//! manager, session lifecycle, and event processor.
//!
//! Start and resume share one path: both must reconcile "what sessions
//! exist vs. what should exist". Provider failures along the start path
//! are logged, not propagated — best-effort connect, report status
//! regardless.

use crate::subsystems::{
    best_effort, lifecycle, processor, runtime, status, AppContext,
};
use anyhow::{bail, Result};
use chrono::Utc;
use cue_core::models::{AgentStatus, AgentType, SessionRow, SessionState};
use cue_core::CueError;
use std::sync::Arc;
use uuid::Uuid;

/// Replace any stale session rows for an idle event with fresh `closed`
/// rows, one per agent type, each carrying its computed model.
pub async fn create_agent_sessions_for_event(
    ctx: &Arc<AppContext>,
    event_id: Uuid,
) -> Result<Vec<SessionRow>> {
    let agent = ctx
        .store
        .fetch_agent(event_id)
        .await?
        .ok_or(CueError::MissingAgent(event_id))?;

    if !matches!(
        agent.status,
        AgentStatus::ContextComplete | AgentStatus::Ready
    ) {
        bail!(
            "agent for event {} is {:?}; sessions can only be created from an idle stage",
            event_id,
            agent.status
        );
    }

    let deleted = ctx.store.delete_sessions(event_id).await?;
    if deleted > 0 {
        tracing::info!(event = %event_id, deleted, "Removed stale session rows");
    }

    let mut rows = Vec::with_capacity(AgentType::ALL.len());
    for agent_type in AgentType::ALL {
        let model = lifecycle::model_for(&ctx.config.provider, agent_type);
        rows.push(ctx.store.insert_session(event_id, agent_type, model).await?);
    }

    tracing::info!(event = %event_id, "Created fresh session rows");
    Ok(rows)
}

/// Idempotent start: already-running events return immediately; paused
/// sessions are resumed (handles recreated first when missing); everything
/// else gets fresh sessions. Handlers are (re)attached, the agent is
/// marked running, and the periodic status push begins.
pub async fn start_event(ctx: &Arc<AppContext>, event_id: Uuid) -> Result<()> {
    let rt_arc = runtime::ensure_runtime(ctx, event_id).await?;
    let mut rt = rt_arc.lock().await;

    let enabled: Vec<AgentType> = AgentType::ALL
        .iter()
        .copied()
        .filter(|t| rt.agent_enabled(*t))
        .collect();

    if enabled.iter().all(|t| rt.sessions.contains_key(t)) && rt.status_push.is_some() {
        tracing::debug!(event = %event_id, "Start requested but event is already running");
        return Ok(());
    }

    let rows = ctx.store.sessions_for_event(event_id).await?;

    for agent_type in enabled {
        if rt.sessions.contains_key(&agent_type) {
            continue;
        }

        let paused = rows
            .iter()
            .any(|r| r.agent_type == agent_type && r.state == SessionState::Paused);

        // Either way a handle must exist first; a paused session then gets
        // an explicit resume so the provider picks up where it left off.
        if best_effort(
            "connecting agent session",
            lifecycle::open_and_bind(ctx, &mut rt, agent_type).await,
        )
        .is_none()
        {
            continue;
        }
        if paused {
            if let Some(binding) = rt.sessions.get(&agent_type) {
                best_effort(
                    "resuming paused session",
                    binding.session.resume().await,
                );
            }
        }
    }

    processor::attach_session_handlers(ctx, &rt_arc, &mut rt).await;

    // Status transition applies even if some connects failed above.
    best_effort(
        "marking agent running",
        ctx.store
            .set_agent_status(event_id, AgentStatus::Running)
            .await,
    );

    if rt.status_push.is_none() {
        rt.status_push = Some(status::spawn_status_push(ctx.clone(), event_id));
    }

    rt.log("event started");
    Ok(())
}

/// Pre-live validation entry point: only proceeds against session rows
/// created moments ago, so a stale blueprint cannot be "tested" by
/// accident.
pub async fn start_sessions_for_testing(ctx: &Arc<AppContext>, event_id: Uuid) -> Result<()> {
    let max_age = ctx.config.runtime.testing_session_max_age_seconds;
    let rows = ctx.store.sessions_for_event(event_id).await?;
    let cutoff = Utc::now() - chrono::Duration::seconds(max_age);
    let fresh = rows.iter().filter(|r| r.created_at > cutoff).count();

    if fresh == 0 {
        bail!(
            "no session rows newer than {}s exist for event {}; \
             create sessions first, then start the test run",
            max_age,
            event_id
        );
    }

    start_event(ctx, event_id).await
}

/// Best-effort pause: flush metrics for all three agent types, cancel the
/// event's timers, then pause sessions. Failures are logged, never thrown
/// — pausing happens in shutdown-adjacent flows.
pub async fn pause_event(ctx: &Arc<AppContext>, event_id: Uuid) -> Result<()> {
    let Some(rt_arc) = runtime::get_runtime(ctx, event_id) else {
        tracing::debug!(event = %event_id, "Pause requested for event with no runtime");
        return Ok(());
    };
    let mut rt = rt_arc.lock().await;

    // Flush before touching sessions so a cancelled run reads as "paused",
    // not silently truncated.
    for (agent_type, metrics) in ctx.metrics.flush(event_id) {
        best_effort(
            "persisting metrics flush",
            ctx.store
                .insert_agent_output(
                    event_id,
                    agent_type,
                    "metrics",
                    serde_json::to_value(&metrics).unwrap_or_default(),
                )
                .await,
        );
    }

    if let Some(handle) = rt.debounce.take() {
        handle.abort();
    }
    if let Some(handle) = rt.status_push.take() {
        handle.abort();
    }

    lifecycle::pause_bound_sessions(ctx, &mut rt).await;
    rt.sessions.clear();
    rt.attached_sessions.clear();

    best_effort(
        "marking agent ready",
        ctx.store
            .set_agent_status(event_id, AgentStatus::Ready)
            .await,
    );

    rt.log("event paused");
    Ok(())
}

/// Resume and start share one code path.
pub async fn resume_event(ctx: &Arc<AppContext>, event_id: Uuid) -> Result<()> {
    start_event(ctx, event_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::status::TracingSink;
    use crate::subsystems::testing::{test_config, ScriptedProvider};
    use cue_core::{EventStore, MemoryStore};
    use std::sync::atomic::Ordering;

    async fn setup(
        status: AgentStatus,
    ) -> (Arc<MemoryStore>, Arc<ScriptedProvider>, Arc<AppContext>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(ScriptedProvider::new());
        let event_id = Uuid::new_v4();
        store.put_agent(event_id, status).await;
        let ctx = AppContext::new(
            test_config(25_000),
            store.clone(),
            provider.clone(),
            Arc::new(TracingSink),
        );
        (store, provider, ctx, event_id)
    }

    async fn teardown(ctx: &Arc<AppContext>, event_id: Uuid) {
        runtime::remove_runtime(ctx, event_id).await;
    }

    #[tokio::test]
    async fn test_create_sessions_requires_idle_agent() {
        let (_store, _provider, ctx, event_id) = setup(AgentStatus::Running).await;
        let result = create_agent_sessions_for_event(&ctx, event_id).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("idle stage"));
    }

    #[tokio::test]
    async fn test_create_sessions_replaces_stale_rows() {
        let (store, _provider, ctx, event_id) = setup(AgentStatus::ContextComplete).await;
        store
            .insert_session(event_id, AgentType::Cards, "old-model")
            .await
            .unwrap();

        let rows = create_agent_sessions_for_event(&ctx, event_id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.state == SessionState::Closed));

        let stored = store.sessions_for_event(event_id).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|r| r.model != "old-model"));
    }

    #[tokio::test]
    async fn test_start_event_connects_and_marks_running() {
        let (store, provider, ctx, event_id) = setup(AgentStatus::Ready).await;
        create_agent_sessions_for_event(&ctx, event_id).await.unwrap();

        start_event(&ctx, event_id).await.unwrap();

        assert_eq!(provider.open_count().await, 3);
        let agent = store.fetch_agent(event_id).await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Running);
        let rows = store.sessions_for_event(event_id).await.unwrap();
        assert!(rows.iter().all(|r| r.state == SessionState::Active));

        let rt_arc = runtime::get_runtime(&ctx, event_id).unwrap();
        {
            let rt = rt_arc.lock().await;
            assert_eq!(rt.sessions.len(), 3);
            assert!(rt.status_push.is_some());
        }
        teardown(&ctx, event_id).await;
    }

    #[tokio::test]
    async fn test_start_event_is_idempotent() {
        let (_store, provider, ctx, event_id) = setup(AgentStatus::Ready).await;
        start_event(&ctx, event_id).await.unwrap();
        start_event(&ctx, event_id).await.unwrap();
        assert_eq!(provider.open_count().await, 3);
        teardown(&ctx, event_id).await;
    }

    #[tokio::test]
    async fn test_pause_then_resume_reconnects() {
        let (store, provider, ctx, event_id) = setup(AgentStatus::Ready).await;
        start_event(&ctx, event_id).await.unwrap();

        pause_event(&ctx, event_id).await.unwrap();
        let rows = store.sessions_for_event(event_id).await.unwrap();
        assert!(rows.iter().all(|r| r.state == SessionState::Paused));
        let agent = store.fetch_agent(event_id).await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Ready);
        // Metrics were flushed for all three agent types.
        let outputs = store.outputs_for_event(event_id).await;
        assert_eq!(outputs.iter().filter(|(_, k, _)| k == "metrics").count(), 3);

        resume_event(&ctx, event_id).await.unwrap();
        let rows = store.sessions_for_event(event_id).await.unwrap();
        assert!(rows.iter().all(|r| r.state == SessionState::Active));
        // Fresh handles were created and the old ones resumed.
        assert_eq!(provider.open_count().await, 6);
        let session = provider.session(event_id, AgentType::Cards).await.unwrap();
        assert!(!session.paused.load(Ordering::SeqCst));
        teardown(&ctx, event_id).await;
    }

    #[tokio::test]
    async fn test_pause_without_runtime_is_noop() {
        let (_store, _provider, ctx, event_id) = setup(AgentStatus::Ready).await;
        pause_event(&ctx, event_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_testing_start_requires_fresh_rows() {
        let (_store, _provider, ctx, event_id) = setup(AgentStatus::Ready).await;

        let result = start_sessions_for_testing(&ctx, event_id).await;
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("no session rows newer than"));

        create_agent_sessions_for_event(&ctx, event_id).await.unwrap();
        start_sessions_for_testing(&ctx, event_id).await.unwrap();
        teardown(&ctx, event_id).await;
    }
}
