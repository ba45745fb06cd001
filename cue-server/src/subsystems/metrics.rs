//! Token-usage metrics per (event, agent type): running total, count, max,
//! and warning/critical threshold-crossing counts. Cleared whenever a
//! runtime is rebuilt; flushed durably on pause.

use cue_core::config::MetricsConfig;
use cue_core::models::AgentType;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TokenMetrics {
    pub total: u64,
    pub count: u64,
    pub max: u64,
    pub warnings: u64,
    pub criticals: u64,
}

pub struct MetricsCollector {
    table: DashMap<(Uuid, AgentType), TokenMetrics>,
    config: MetricsConfig,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            table: DashMap::new(),
            config,
        }
    }

    pub fn record(&self, event_id: Uuid, agent_type: AgentType, tokens: u64) {
        let mut entry = self.table.entry((event_id, agent_type)).or_default();
        entry.total += tokens;
        entry.count += 1;
        entry.max = entry.max.max(tokens);
        if tokens >= self.config.token_critical_threshold {
            entry.criticals += 1;
            tracing::warn!(
                event = %event_id,
                agent = %agent_type,
                tokens,
                "Token usage crossed critical threshold"
            );
        } else if tokens >= self.config.token_warning_threshold {
            entry.warnings += 1;
        }
    }

    pub fn clear_event(&self, event_id: Uuid) {
        self.table.retain(|(event, _), _| *event != event_id);
    }

    pub fn snapshot_event(&self, event_id: Uuid) -> HashMap<AgentType, TokenMetrics> {
        AgentType::ALL
            .iter()
            .map(|t| {
                let metrics = self
                    .table
                    .get(&(event_id, *t))
                    .map(|m| *m)
                    .unwrap_or_default();
                (*t, metrics)
            })
            .collect()
    }

    /// Current metrics for all three agent types, for durable flushing.
    pub fn flush(&self, event_id: Uuid) -> Vec<(AgentType, TokenMetrics)> {
        AgentType::ALL
            .iter()
            .map(|t| {
                let metrics = self
                    .table
                    .get(&(event_id, *t))
                    .map(|m| *m)
                    .unwrap_or_default();
                (*t, metrics)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(MetricsConfig {
            token_warning_threshold: 100,
            token_critical_threshold: 200,
        })
    }

    #[test]
    fn test_record_accumulates() {
        let metrics = collector();
        let event_id = Uuid::new_v4();
        metrics.record(event_id, AgentType::Cards, 50);
        metrics.record(event_id, AgentType::Cards, 150);
        metrics.record(event_id, AgentType::Cards, 250);

        let snapshot = metrics.snapshot_event(event_id);
        let cards = &snapshot[&AgentType::Cards];
        assert_eq!(cards.total, 450);
        assert_eq!(cards.count, 3);
        assert_eq!(cards.max, 250);
        assert_eq!(cards.warnings, 1);
        assert_eq!(cards.criticals, 1);
    }

    #[test]
    fn test_events_are_isolated() {
        let metrics = collector();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        metrics.record(a, AgentType::Facts, 10);
        metrics.record(b, AgentType::Facts, 20);

        metrics.clear_event(a);
        assert_eq!(metrics.snapshot_event(a)[&AgentType::Facts].total, 0);
        assert_eq!(metrics.snapshot_event(b)[&AgentType::Facts].total, 20);
    }

    #[test]
    fn test_flush_covers_all_agent_types() {
        let metrics = collector();
        let event_id = Uuid::new_v4();
        metrics.record(event_id, AgentType::Transcript, 5);

        let flushed = metrics.flush(event_id);
        assert_eq!(flushed.len(), 3);
        assert!(flushed
            .iter()
            .any(|(t, m)| *t == AgentType::Transcript && m.total == 5));
        assert!(flushed
            .iter()
            .any(|(t, m)| *t == AgentType::Cards && m.total == 0));
    }
}
