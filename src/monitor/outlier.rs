//! Threshold outlier detection on live rollup values

use crate::monitor::ChangeConsumer;
use crate::rollup::OutlierReporter;
use crate::store::{AssetGraphStore, EventValue, ValueChangeEvent, THRESHOLD};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Compares each numeric event against the node's own threshold attribute
/// and reports every exceedance
pub struct OutlierDetector {
    graph: Arc<dyn AssetGraphStore>,
    reporter: Arc<OutlierReporter>,
}

impl OutlierDetector {
    pub fn new(graph: Arc<dyn AssetGraphStore>, reporter: Arc<OutlierReporter>) -> Self {
        Self { graph, reporter }
    }
}

#[async_trait]
impl ChangeConsumer for OutlierDetector {
    async fn on_event(&self, event: ValueChangeEvent) {
        let EventValue::Number(value) = event.value else {
            return;
        };

        let node = match self.graph.get_node(event.node).await {
            Ok(node) => node,
            Err(e) => {
                log::warn!("could not load node {} for outlier check: {}", event.node, e);
                return;
            }
        };

        let Some(threshold) = node.scalar(THRESHOLD) else {
            log::debug!("node {} has no {} attribute", node.name, THRESHOLD);
            return;
        };

        if value > threshold {
            let timestamp = DateTime::<Utc>::from_timestamp(event.timestamp, 0)
                .unwrap_or_else(Utc::now);
            if let Err(e) = self.reporter.record(&node.name, timestamp) {
                log::warn!("recording outlier for {} failed: {}", node.name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AttributeValue, MemoryGraphStore, NodeId, TemplateDef, ROLLUP_SUM};
    use chrono::TimeZone;

    async fn detector_with_branch(
    ) -> (OutlierDetector, Arc<OutlierReporter>, NodeId, tempfile::TempDir) {
        let graph = Arc::new(MemoryGraphStore::new());
        graph.register_template(TemplateDef {
            name: "Branch".to_string(),
            base: None,
            attributes: vec![(THRESHOLD.to_string(), AttributeValue::Scalar(1000.0))],
        });
        let root = graph.ensure_container_root("BranchElements").await.unwrap();
        let branch = graph
            .create_node(root.id, "Branch00000001", "Branch")
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
        let reporter = Arc::new(OutlierReporter::new(dir.path(), now));

        (
            OutlierDetector::new(graph, reporter.clone()),
            reporter,
            branch.id,
            dir,
        )
    }

    fn event(node: NodeId, value: f64) -> ValueChangeEvent {
        ValueChangeEvent {
            node,
            node_name: "Branch00000001".to_string(),
            attribute: ROLLUP_SUM.to_string(),
            timestamp: 1_709_649_000,
            value: EventValue::Number(value),
        }
    }

    #[tokio::test]
    async fn test_value_over_threshold_is_reported() {
        let (detector, reporter, branch, _dir) = detector_with_branch().await;

        detector.on_event(event(branch, 1200.0)).await;

        let contents = std::fs::read_to_string(reporter.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Found outlier in Branch element Branch00000001 at "));
    }

    #[tokio::test]
    async fn test_value_under_threshold_is_quiet() {
        let (detector, reporter, branch, _dir) = detector_with_branch().await;

        detector.on_event(event(branch, 900.0)).await;
        detector.on_event(event(branch, 1000.0)).await;

        assert!(!reporter.path().exists());
    }

    #[tokio::test]
    async fn test_status_events_are_ignored() {
        let (detector, reporter, branch, _dir) = detector_with_branch().await;

        detector
            .on_event(ValueChangeEvent {
                node: branch,
                node_name: "Branch00000001".to_string(),
                attribute: ROLLUP_SUM.to_string(),
                timestamp: 0,
                value: EventValue::Status("Bad".to_string()),
            })
            .await;

        assert!(!reporter.path().exists());
    }
}
