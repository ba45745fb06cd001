//! Durable checkpoint bookkeeping: `(event, agent type) → last_seq`,
//! loaded once at runtime creation and saved as pipelines consume. Only
//! the cards and facts checkpoints are persisted; the transcript counter
//! lives in-memory and is reseeded from the other two plus replay.

use crate::subsystems::AppContext;
use cue_core::models::{AgentType, Checkpoints};
use cue_core::CueError;
use std::sync::Arc;
use uuid::Uuid;

pub async fn load(ctx: &Arc<AppContext>, event_id: Uuid) -> Result<Checkpoints, CueError> {
    let checkpoints = ctx.store.load_checkpoints(event_id).await?;
    tracing::debug!(
        event = %event_id,
        cards = checkpoints.cards,
        facts = checkpoints.facts,
        "Checkpoints loaded"
    );
    Ok(checkpoints)
}

pub async fn save(
    ctx: &Arc<AppContext>,
    event_id: Uuid,
    agent_type: AgentType,
    last_seq: i64,
) -> Result<(), CueError> {
    ctx.store
        .save_checkpoint(event_id, agent_type, last_seq)
        .await
}
