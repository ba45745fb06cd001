//! Session lifecycle primitives: open provider sessions and bind them to
//! the runtime, and move bound sessions through pause/resume/close with
//! their durable rows kept in step. State transitions are logged with a
//! reason; higher-level sequencing lives in the coordinator.

use crate::subsystems::runtime::{EventRuntime, SessionBinding};
use crate::subsystems::{best_effort, AppContext};
use anyhow::Result;
use cue_core::config::ProviderConfig;
use cue_core::models::{AgentType, SessionState};
use cue_core::provider::SessionSpec;
use std::sync::Arc;

pub fn model_for(config: &ProviderConfig, agent_type: AgentType) -> &str {
    match agent_type {
        AgentType::Transcript => &config.transcript_model,
        AgentType::Cards => &config.cards_model,
        AgentType::Facts => &config.facts_model,
    }
}

fn instructions_for(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::Transcript => "Transcribe incoming speech. Mark final segments.",
        AgentType::Cards => {
            "Draft a short highlight card for the focus concept in the given transcript window."
        }
        AgentType::Facts => {
            "Extract key/value facts from the given transcript window with confidence scores."
        }
    }
}

/// Open a provider session for one agent type and bind it to the runtime.
/// Reuses the event's existing session row when one exists for the type,
/// otherwise inserts a fresh one; either way the row ends up `active` with
/// the provider-assigned id.
pub async fn open_and_bind(
    ctx: &Arc<AppContext>,
    rt: &mut EventRuntime,
    agent_type: AgentType,
) -> Result<()> {
    let spec = SessionSpec {
        event_id: rt.event_id,
        agent_type,
        model: model_for(&ctx.config.provider, agent_type).to_string(),
        instructions: instructions_for(agent_type).to_string(),
    };
    let opened = ctx.provider.open_session(&spec).await?;

    let rows = ctx.store.sessions_for_event(rt.event_id).await?;
    let row_id = match rows.iter().find(|r| r.agent_type == agent_type) {
        Some(row) => row.id,
        None => {
            ctx.store
                .insert_session(rt.event_id, agent_type, &spec.model)
                .await?
                .id
        }
    };
    ctx.store
        .update_session_state(
            row_id,
            SessionState::Active,
            Some(&opened.provider_session_id),
        )
        .await?;

    rt.log(format!(
        "{} session active ({})",
        agent_type, opened.provider_session_id
    ));
    rt.sessions.insert(
        agent_type,
        SessionBinding {
            session: opened.session,
            provider_session_id: opened.provider_session_id,
            row_id,
        },
    );

    Ok(())
}

/// Best-effort pause of every bound session; rows move to `paused`.
pub async fn pause_bound_sessions(ctx: &Arc<AppContext>, rt: &mut EventRuntime) {
    let bindings: Vec<(AgentType, uuid::Uuid)> =
        rt.sessions.iter().map(|(t, b)| (*t, b.row_id)).collect();

    for (agent_type, row_id) in bindings {
        if let Some(binding) = rt.sessions.get(&agent_type) {
            best_effort(
                "pausing provider session",
                binding.session.pause().await,
            );
        }
        best_effort(
            "marking session row paused",
            ctx.store
                .update_session_state(row_id, SessionState::Paused, None)
                .await,
        );
        rt.log(format!("{} session paused (operator pause)", agent_type));
    }
}

/// Best-effort resume of every bound session; rows move back to `active`.
pub async fn resume_bound_sessions(ctx: &Arc<AppContext>, rt: &mut EventRuntime) {
    let bindings: Vec<(AgentType, uuid::Uuid)> =
        rt.sessions.iter().map(|(t, b)| (*t, b.row_id)).collect();

    for (agent_type, row_id) in bindings {
        if let Some(binding) = rt.sessions.get(&agent_type) {
            best_effort(
                "resuming provider session",
                binding.session.resume().await,
            );
        }
        best_effort(
            "marking session row active",
            ctx.store
                .update_session_state(row_id, SessionState::Active, None)
                .await,
        );
        rt.log(format!("{} session resumed", agent_type));
    }
}

/// Close and unbind every session; rows move to `closed`.
pub async fn close_bound_sessions(ctx: &Arc<AppContext>, rt: &mut EventRuntime) {
    let bindings: Vec<(AgentType, SessionBinding)> = rt.sessions.drain().collect();
    rt.attached_sessions.clear();

    for (agent_type, binding) in bindings {
        best_effort("closing provider session", binding.session.close().await);
        best_effort(
            "marking session row closed",
            ctx.store
                .update_session_state(binding.row_id, SessionState::Closed, None)
                .await,
        );
        rt.log(format!("{} session closed (teardown)", agent_type));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::runtime::create_runtime;
    use crate::subsystems::status::TracingSink;
    use crate::subsystems::testing::{test_config, ScriptedProvider};
    use cue_core::models::AgentStatus;
    use cue_core::{EventStore, MemoryStore};
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    async fn setup() -> (Arc<MemoryStore>, Arc<ScriptedProvider>, Arc<AppContext>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(ScriptedProvider::new());
        let event_id = Uuid::new_v4();
        store.put_agent(event_id, AgentStatus::Ready).await;
        let ctx = AppContext::new(
            test_config(25_000),
            store.clone(),
            provider.clone(),
            Arc::new(TracingSink),
        );
        (store, provider, ctx, event_id)
    }

    #[tokio::test]
    async fn test_open_and_bind_creates_active_row() {
        let (store, _provider, ctx, event_id) = setup().await;
        let rt_arc = create_runtime(&ctx, event_id).await.unwrap();
        let mut rt = rt_arc.lock().await;

        open_and_bind(&ctx, &mut rt, AgentType::Cards).await.unwrap();

        assert!(rt.sessions.contains_key(&AgentType::Cards));
        let rows = store.sessions_for_event(event_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, SessionState::Active);
        assert!(rows[0].provider_session_id.is_some());
        assert_eq!(rows[0].model, "rt-cards-1");
    }

    #[tokio::test]
    async fn test_open_and_bind_reuses_existing_row() {
        let (store, _provider, ctx, event_id) = setup().await;
        let existing = store
            .insert_session(event_id, AgentType::Facts, "rt-facts-1")
            .await
            .unwrap();

        let rt_arc = create_runtime(&ctx, event_id).await.unwrap();
        let mut rt = rt_arc.lock().await;
        open_and_bind(&ctx, &mut rt, AgentType::Facts).await.unwrap();

        let rows = store.sessions_for_event(event_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, existing.id);
        assert_eq!(rows[0].state, SessionState::Active);
    }

    #[tokio::test]
    async fn test_pause_and_resume_round_trip() {
        let (store, provider, ctx, event_id) = setup().await;
        let rt_arc = create_runtime(&ctx, event_id).await.unwrap();
        let mut rt = rt_arc.lock().await;
        open_and_bind(&ctx, &mut rt, AgentType::Cards).await.unwrap();

        pause_bound_sessions(&ctx, &mut rt).await;
        let session = provider.session(event_id, AgentType::Cards).await.unwrap();
        assert!(session.paused.load(Ordering::SeqCst));
        let rows = store.sessions_for_event(event_id).await.unwrap();
        assert_eq!(rows[0].state, SessionState::Paused);

        resume_bound_sessions(&ctx, &mut rt).await;
        assert!(!session.paused.load(Ordering::SeqCst));
        let rows = store.sessions_for_event(event_id).await.unwrap();
        assert_eq!(rows[0].state, SessionState::Active);
    }

    #[tokio::test]
    async fn test_close_unbinds_everything() {
        let (store, provider, ctx, event_id) = setup().await;
        let rt_arc = create_runtime(&ctx, event_id).await.unwrap();
        let mut rt = rt_arc.lock().await;
        open_and_bind(&ctx, &mut rt, AgentType::Cards).await.unwrap();
        open_and_bind(&ctx, &mut rt, AgentType::Facts).await.unwrap();

        close_bound_sessions(&ctx, &mut rt).await;

        assert!(rt.sessions.is_empty());
        assert!(rt.attached_sessions.is_empty());
        let session = provider.session(event_id, AgentType::Cards).await.unwrap();
        assert!(session.closed.load(Ordering::SeqCst));
        let rows = store.sessions_for_event(event_id).await.unwrap();
        assert!(rows.iter().all(|r| r.state == SessionState::Closed));
    }
}
