//! HTTP control surface.
//!
//! Host-process glue around the orchestration core: thin axum handlers
//! that delegate to pure inner functions, which are directly testable
//! without axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health                     — service liveness + live runtime count
//! - GET  /version                    — server version info
//! - POST /events/:id/sessions        — create fresh session rows
//! - POST /events/:id/sessions/test   — validate sessions before a live run
//! - POST /events/:id/start           — start (or resume) an event
//! - POST /events/:id/pause           — pause an event
//! - POST /events/:id/resume          — resume an event
//! - POST /events/:id/audio           — raw audio bytes (x-speaker header)
//! - GET  /events/:id/status          — on-demand status snapshot

use crate::subsystems::runtime::PendingChunkMeta;
use crate::subsystems::{coordinator, ingest, status, AppContext};
use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/events/:id/sessions", post(create_sessions_handler))
        .route("/events/:id/sessions/test", post(test_sessions_handler))
        .route("/events/:id/start", post(start_handler))
        .route("/events/:id/pause", post(pause_handler))
        .route("/events/:id/resume", post(resume_handler))
        .route("/events/:id/audio", post(audio_handler))
        .route("/events/:id/status", get(status_handler))
        .with_state(ctx)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    ctx: Arc<AppContext>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.http.host, ctx.config.http.port);
    let app = build_router(ctx);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Cue HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn health_inner(ctx: &Arc<AppContext>) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "provider": ctx.provider.name(),
            "live_runtimes": ctx.runtimes.len(),
        }),
    )
}

pub async fn start_inner(ctx: &Arc<AppContext>, event_id: Uuid) -> (StatusCode, serde_json::Value) {
    match coordinator::start_event(ctx, event_id).await {
        Ok(()) => (StatusCode::OK, serde_json::json!({"started": true})),
        Err(e) => error_body(e),
    }
}

pub async fn pause_inner(ctx: &Arc<AppContext>, event_id: Uuid) -> (StatusCode, serde_json::Value) {
    match coordinator::pause_event(ctx, event_id).await {
        Ok(()) => (StatusCode::OK, serde_json::json!({"paused": true})),
        Err(e) => error_body(e),
    }
}

pub async fn resume_inner(
    ctx: &Arc<AppContext>,
    event_id: Uuid,
) -> (StatusCode, serde_json::Value) {
    match coordinator::resume_event(ctx, event_id).await {
        Ok(()) => (StatusCode::OK, serde_json::json!({"resumed": true})),
        Err(e) => error_body(e),
    }
}

pub async fn create_sessions_inner(
    ctx: &Arc<AppContext>,
    event_id: Uuid,
) -> (StatusCode, serde_json::Value) {
    match coordinator::create_agent_sessions_for_event(ctx, event_id).await {
        Ok(rows) => (
            StatusCode::OK,
            serde_json::json!({"created": rows.len(), "sessions": rows}),
        ),
        Err(e) => error_body(e),
    }
}

pub async fn test_sessions_inner(
    ctx: &Arc<AppContext>,
    event_id: Uuid,
) -> (StatusCode, serde_json::Value) {
    match coordinator::start_sessions_for_testing(ctx, event_id).await {
        Ok(()) => (StatusCode::OK, serde_json::json!({"started": true})),
        Err(e) => error_body(e),
    }
}

pub async fn audio_inner(
    ctx: &Arc<AppContext>,
    event_id: Uuid,
    audio: Bytes,
    meta: PendingChunkMeta,
) -> (StatusCode, serde_json::Value) {
    if audio.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            serde_json::json!({"error": "empty audio payload", "status": "error"}),
        );
    }
    match ingest::append_audio(ctx, event_id, audio, meta).await {
        Ok(()) => (StatusCode::ACCEPTED, serde_json::json!({"accepted": true})),
        Err(e) => error_body(e),
    }
}

pub async fn status_inner(
    ctx: &Arc<AppContext>,
    event_id: Uuid,
) -> (StatusCode, serde_json::Value) {
    match status::build_snapshot(ctx, event_id).await {
        Ok(snapshot) => (
            StatusCode::OK,
            serde_json::to_value(&snapshot).unwrap_or_default(),
        ),
        Err(e) => error_body(e),
    }
}

fn error_body(e: anyhow::Error) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        serde_json::json!({"error": e.to_string(), "status": "error"}),
    )
}

// ============================================================================
// Thin axum handlers
// ============================================================================

async fn health_handler(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let (code, body) = health_inner(&ctx).await;
    (code, Json(body))
}

async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "cue-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn create_sessions_handler(
    State(ctx): State<Arc<AppContext>>,
    Path(event_id): Path<Uuid>,
) -> impl IntoResponse {
    let (code, body) = create_sessions_inner(&ctx, event_id).await;
    (code, Json(body))
}

async fn test_sessions_handler(
    State(ctx): State<Arc<AppContext>>,
    Path(event_id): Path<Uuid>,
) -> impl IntoResponse {
    let (code, body) = test_sessions_inner(&ctx, event_id).await;
    (code, Json(body))
}

async fn start_handler(
    State(ctx): State<Arc<AppContext>>,
    Path(event_id): Path<Uuid>,
) -> impl IntoResponse {
    let (code, body) = start_inner(&ctx, event_id).await;
    (code, Json(body))
}

async fn pause_handler(
    State(ctx): State<Arc<AppContext>>,
    Path(event_id): Path<Uuid>,
) -> impl IntoResponse {
    let (code, body) = pause_inner(&ctx, event_id).await;
    (code, Json(body))
}

async fn resume_handler(
    State(ctx): State<Arc<AppContext>>,
    Path(event_id): Path<Uuid>,
) -> impl IntoResponse {
    let (code, body) = resume_inner(&ctx, event_id).await;
    (code, Json(body))
}

async fn audio_handler(
    State(ctx): State<Arc<AppContext>>,
    Path(event_id): Path<Uuid>,
    headers: HeaderMap,
    audio: Bytes,
) -> impl IntoResponse {
    let meta = PendingChunkMeta {
        speaker: header_string(&headers, "x-speaker"),
        encoding: header_string(&headers, "x-encoding"),
        sample_rate: header_string(&headers, "x-sample-rate").and_then(|s| s.parse().ok()),
    };
    let (code, body) = audio_inner(&ctx, event_id, audio, meta).await;
    (code, Json(body))
}

async fn status_handler(
    State(ctx): State<Arc<AppContext>>,
    Path(event_id): Path<Uuid>,
) -> impl IntoResponse {
    let (code, body) = status_inner(&ctx, event_id).await;
    (code, Json(body))
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::runtime;
    use crate::subsystems::status::TracingSink;
    use crate::subsystems::testing::{test_config, ScriptedProvider};
    use cue_core::models::AgentStatus;
    use cue_core::MemoryStore;

    async fn setup(status: AgentStatus) -> (Arc<AppContext>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let event_id = Uuid::new_v4();
        store.put_agent(event_id, status).await;
        let ctx = AppContext::new(
            test_config(25_000),
            store,
            Arc::new(ScriptedProvider::new()),
            Arc::new(TracingSink),
        );
        (ctx, event_id)
    }

    #[tokio::test]
    async fn test_health_inner_reports_runtimes() {
        let (ctx, event_id) = setup(AgentStatus::Ready).await;
        let (code, body) = health_inner(&ctx).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["live_runtimes"], 0);

        runtime::ensure_runtime(&ctx, event_id).await.unwrap();
        let (_, body) = health_inner(&ctx).await;
        assert_eq!(body["live_runtimes"], 1);
    }

    #[tokio::test]
    async fn test_start_then_status_inner() {
        let (ctx, event_id) = setup(AgentStatus::Ready).await;
        let (code, _) = start_inner(&ctx, event_id).await;
        assert_eq!(code, StatusCode::OK);

        let (code, body) = status_inner(&ctx, event_id).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["agent_status"], "running");
        assert_eq!(body["sessions"].as_array().unwrap().len(), 3);
        runtime::remove_runtime(&ctx, event_id).await;
    }

    #[tokio::test]
    async fn test_start_unknown_event_surfaces_error() {
        let (ctx, _) = setup(AgentStatus::Ready).await;
        let (code, body) = start_inner(&ctx, Uuid::new_v4()).await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("No agent record"));
    }

    #[tokio::test]
    async fn test_audio_inner_rejects_empty_payload() {
        let (ctx, event_id) = setup(AgentStatus::Ready).await;
        let (code, _) = audio_inner(
            &ctx,
            event_id,
            Bytes::new(),
            PendingChunkMeta::default(),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }
}
