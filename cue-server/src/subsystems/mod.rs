//! Orchestration subsystems.
//!
//! Each submodule is a set of free functions over the shared `AppContext`;
//! per-event state lives in `runtime::EventRuntime`, locked per event.

pub mod checkpoint;
pub mod coordinator;
pub mod ingest;
pub mod lifecycle;
pub mod metrics;
pub mod processor;
pub mod runtime;
pub mod salience;
pub mod status;

#[cfg(test)]
pub mod testing;

use cue_core::{CueConfig, EventStore, RealtimeProvider};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Process-wide wiring shared by every subsystem. The runtime registry is
/// guarded per key; each `EventRuntime` has its own lock so independent
/// events progress in parallel.
pub struct AppContext {
    pub config: CueConfig,
    pub store: Arc<dyn EventStore>,
    pub provider: Arc<dyn RealtimeProvider>,
    pub runtimes: DashMap<Uuid, Arc<Mutex<runtime::EventRuntime>>>,
    pub metrics: metrics::MetricsCollector,
    pub status_sink: Arc<dyn status::StatusSink>,
}

impl AppContext {
    pub fn new(
        config: CueConfig,
        store: Arc<dyn EventStore>,
        provider: Arc<dyn RealtimeProvider>,
        status_sink: Arc<dyn status::StatusSink>,
    ) -> Arc<Self> {
        let metrics = metrics::MetricsCollector::new(config.metrics.clone());
        Arc::new(Self {
            config,
            store,
            provider,
            runtimes: DashMap::new(),
            metrics,
            status_sink,
        })
    }
}

/// Uniform policy for recoverable external-call failures: log with context
/// and carry on. Applied at the boundary of provider and persistence I/O
/// so the surrounding operation never aborts on a partial failure.
pub fn best_effort<T, E: std::fmt::Display>(context: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, "{} failed", context);
            None
        }
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
