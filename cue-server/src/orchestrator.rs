//! Top-level wiring: rebuild mid-run events at startup, drain the
//! transcript change feed, and pause live runtimes on shutdown so durable
//! state reads as "paused", not silently truncated.

use crate::subsystems::{best_effort, coordinator, ingest, runtime, AppContext};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;

pub async fn run(ctx: Arc<AppContext>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let resumed = runtime::resume_existing_events(&ctx, ctx.config.runtime.resume_limit).await?;
    if resumed > 0 {
        tracing::info!(resumed, "Rebuilt runtimes for mid-run events");
    }

    let mut feed = ctx.store.subscribe_transcripts().await?;
    tracing::info!("Subscribed to transcript change feed");

    loop {
        tokio::select! {
            row = feed.recv() => {
                match row {
                    Some(row) => ingest::handle_transcript_insert(&ctx, row).await,
                    None => {
                        tracing::error!("Transcript change feed closed");
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down orchestrator...");
                break;
            }
        }
    }

    // Flush and pause whatever is still live.
    let event_ids: Vec<uuid::Uuid> = ctx.runtimes.iter().map(|e| *e.key()).collect();
    for event_id in event_ids {
        best_effort(
            "pausing event during shutdown",
            coordinator::pause_event(&ctx, event_id).await,
        );
        runtime::remove_runtime(&ctx, event_id).await;
    }

    Ok(())
}
