//! Interval recording on leaf mode transitions

use crate::monitor::ChangeConsumer;
use crate::store::{AssetGraphStore, EventValue, IntervalRecord, ValueChangeEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Persists an interval record whenever a watched mode attribute transitions
/// into the target mode
///
/// Records are checked in immediately, one at a time; transitions into any
/// other mode are ignored.
pub struct ModeTransitionRecorder {
    graph: Arc<dyn AssetGraphStore>,
    target_mode: String,
}

impl ModeTransitionRecorder {
    pub fn new(graph: Arc<dyn AssetGraphStore>, target_mode: &str) -> Self {
        Self {
            graph,
            target_mode: target_mode.to_string(),
        }
    }
}

#[async_trait]
impl ChangeConsumer for ModeTransitionRecorder {
    async fn on_event(&self, event: ValueChangeEvent) {
        let EventValue::Status(mode) = &event.value else {
            return;
        };
        if !mode.eq_ignore_ascii_case(&self.target_mode) {
            return;
        }

        let start = DateTime::<Utc>::from_timestamp(event.timestamp, 0)
            .unwrap_or_else(Utc::now);
        // The record name carries the configured mode spelling, not whatever
        // casing the event arrived with
        let record = IntervalRecord {
            name: format!(
                "{}_{}_{}",
                event.node_name,
                start.format("%Y_%m_%d_%H_%M"),
                self.target_mode
            ),
            node: event.node,
            node_name: event.node_name.clone(),
            mode: mode.clone(),
            start: event.timestamp,
            end: Utc::now().timestamp(),
        };

        log::info!("recording interval {}", record.name);
        if let Err(e) = self.graph.create_interval(record).await {
            log::warn!("interval for {} could not be persisted: {}", event.node_name, e);
        }
    }
}
