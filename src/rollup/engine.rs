//! Rollup pass: chunked hierarchy walk, bottom-up summation and fluctuation
//! reporting
//!
//! A pass walks the hierarchy from its well-known root, accumulating each
//! top-level subtree's leaf value series. Whenever the accumulated
//! attributes reach the flush threshold the chunk is processed end to end:
//! points resolved, hourly totals fetched, every non-leaf node's rollup
//! written bottom-up from its subtree, and per-leaf fluctuation indexes
//! appended to the report. Bulk store traffic is chunked and fanned out
//! under a bounded degree of parallelism; a stop request discards the
//! accumulated chunk and keeps earlier flushed work.

use crate::config::Settings;
use crate::rollup::report::FluctuationReport;
use crate::rollup::window::{RollupWindow, HOUR_SECS};
use crate::rollup::RollupError;
use crate::shutdown::StopSignal;
use crate::store::{
    AssetGraphStore, AttrRef, AttributeValue, Node, NodeId, PagingConfig, StoreError,
    TimeSeriesStore, HIERARCHY_ROOT, LEAF_VALUE, ROLLUP_SUM,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const SUMMARY_MAX_WAIT: Duration = Duration::from_secs(60);

/// Progress report for one rollup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub chunks_flushed: usize,
    pub leaf_attributes_processed: usize,
    pub nodes_written: usize,
    pub report_rows: usize,
}

struct PassState {
    window: RollupWindow,
    now: DateTime<Utc>,
    paging: PagingConfig,
    report: FluctuationReport,
    // accumulated top-level subtrees awaiting a flush
    batch: Vec<(Node, Vec<AttrRef>)>,
    batch_attrs: usize,
    summary: PassSummary,
}

pub struct RollupEngine {
    graph: Arc<dyn AssetGraphStore>,
    series: Arc<dyn TimeSeriesStore>,
    settings: Settings,
    stop: StopSignal,
}

impl RollupEngine {
    pub fn new(
        graph: Arc<dyn AssetGraphStore>,
        series: Arc<dyn TimeSeriesStore>,
        settings: Settings,
        stop: StopSignal,
    ) -> Self {
        Self {
            graph,
            series,
            settings,
            stop,
        }
    }

    fn paging(&self) -> PagingConfig {
        PagingConfig::new(self.settings.page_size, SUMMARY_MAX_WAIT)
    }

    /// One full pass over the hierarchy
    ///
    /// Subtrees accumulate until `chunk_size * max_parallel` leaf attributes
    /// are buffered, then the chunk is flushed; a final flush drains the
    /// remainder. A stop request between subtrees discards the unflushed
    /// chunk and aborts the pass.
    pub async fn run_rollup_pass(&self, now: DateTime<Utc>) -> Result<PassSummary, RollupError> {
        let window = RollupWindow::trailing(now, self.settings.rollup_hours as usize);
        log::info!(
            "starting rollup pass over {} hourly buckets ending at {}",
            window.len(),
            now.format("%Y-%m-%d %H:%M")
        );

        let root = self
            .graph
            .find_container_root(HIERARCHY_ROOT)
            .await?
            .ok_or_else(|| StoreError::NotFound(HIERARCHY_ROOT.to_string()))?;
        let tops = self.graph.children_of(root.id).await?;

        let mut pass = PassState {
            window,
            now,
            paging: self.paging(),
            report: FluctuationReport::new(&self.settings.report_dir, now),
            batch: Vec::new(),
            batch_attrs: 0,
            summary: PassSummary::default(),
        };

        let depth = self.settings.levels.len() - 1;
        let mut visited: HashSet<NodeId> = HashSet::new();
        for top in tops {
            if self.stop.is_stopped() {
                pass.paging.record_error(StoreError::Cancelled);
                return Err(StoreError::Cancelled.into());
            }

            let mut attrs = Vec::new();
            if let Err(e) = self
                .collect_leaf_attributes(&top, depth, &mut visited, &mut attrs)
                .await
            {
                log::warn!(
                    "collecting leaf series under {} failed, skipping the subtree: {}",
                    top.name,
                    e
                );
                continue;
            }

            pass.summary.leaf_attributes_processed += attrs.len();
            pass.batch_attrs += attrs.len();
            pass.batch.push((top, attrs));
            if pass.batch_attrs >= self.settings.flush_threshold() {
                self.flush(&mut pass).await?;
            }
        }
        if !pass.batch.is_empty() {
            self.flush(&mut pass).await?;
        }

        log::info!(
            "rollup pass finished: {} leaf attributes in {} flushes, {} rollups written, {} report rows",
            pass.summary.leaf_attributes_processed,
            pass.summary.chunks_flushed,
            pass.summary.nodes_written,
            pass.summary.report_rows
        );
        Ok(pass.summary)
    }

    /// Depth-first descent collecting resolved leaf value series
    ///
    /// A node already visited on this pass is skipped with a warning, which
    /// both dedupes shared subtrees and breaks relationship cycles.
    fn collect_leaf_attributes<'a>(
        &'a self,
        node: &'a Node,
        depth: usize,
        visited: &'a mut HashSet<NodeId>,
        out: &'a mut Vec<AttrRef>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            if !visited.insert(node.id) {
                log::warn!(
                    "node {} reached twice during hierarchy walk, skipping",
                    node.name
                );
                return Ok(());
            }

            if depth == 0 {
                match node.attributes.get(LEAF_VALUE) {
                    Some(AttributeValue::Series(binding)) if binding.resolved => {
                        if let Some(attr) = node.series_ref(LEAF_VALUE) {
                            out.push(attr);
                        }
                    }
                    Some(AttributeValue::Series(_)) => {
                        log::warn!("leaf {} has an unresolved value series, skipping", node.name);
                    }
                    _ => {}
                }
                return Ok(());
            }

            for child in self.graph.weak_children(node.id).await? {
                self.collect_leaf_attributes(&child, depth - 1, &mut *visited, &mut *out)
                    .await?;
            }
            Ok(())
        })
    }

    /// Process one accumulated chunk end to end
    async fn flush(&self, pass: &mut PassState) -> Result<(), RollupError> {
        let batch = std::mem::take(&mut pass.batch);
        pass.batch_attrs = 0;
        let attrs: Vec<AttrRef> = batch
            .iter()
            .flat_map(|(_, attrs)| attrs.iter().cloned())
            .collect();
        log::debug!(
            "flushing a chunk of {} subtrees / {} leaf attributes",
            batch.len(),
            attrs.len()
        );

        self.resolve_points(&attrs, &pass.paging).await?;
        pass.summary.nodes_written += self
            .perform_rollup(&batch, &pass.window, &pass.paging)
            .await?;
        let rows = self
            .compute_fluctuation_index(&attrs, pass.now, &pass.report, &pass.paging)
            .await?;
        pass.summary.report_rows += rows.len();
        pass.summary.chunks_flushed += 1;
        Ok(())
    }

    /// Resolve the chunk's attributes against their underlying points,
    /// round-robin partitioned and fanned out under the parallelism bound
    pub async fn resolve_points(
        &self,
        attrs: &[AttrRef],
        paging: &PagingConfig,
    ) -> Result<(), RollupError> {
        if self.stop.is_stopped() {
            paging.record_error(StoreError::Cancelled);
            return Err(StoreError::Cancelled.into());
        }

        let chunks = round_robin_chunks(attrs, self.settings.chunk_size);
        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallel));
        let mut tasks: JoinSet<Result<(), StoreError>> = JoinSet::new();
        for chunk in chunks {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| StoreError::Query(format!("semaphore closed: {}", e)))?;
            let series = self.series.clone();
            tasks.spawn(async move {
                let _permit = permit;
                series.resolve_points(&chunk).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|e| StoreError::Query(format!("resolve task failed: {}", e)))??;
        }
        Ok(())
    }

    /// Write every non-leaf rollup in the batch, bottom-up per subtree
    ///
    /// Leaf hourly totals are fetched once for the whole chunk; each parent's
    /// series is then summed in memory from its children, so a node two
    /// levels up aggregates exactly what its children were just assigned.
    pub async fn perform_rollup(
        &self,
        batch: &[(Node, Vec<AttrRef>)],
        window: &RollupWindow,
        paging: &PagingConfig,
    ) -> Result<usize, RollupError> {
        let attrs: Vec<AttrRef> = batch
            .iter()
            .flat_map(|(_, attrs)| attrs.iter().cloned())
            .collect();
        let summaries = self.windowed_summaries(&attrs, window, paging).await?;

        let depth = self.settings.levels.len() - 1;
        let mut written = 0;
        for (top, _) in batch {
            self.sum_subtree(top, depth, window, &summaries, &mut written)
                .await?;
        }
        Ok(written)
    }

    /// Recursive bottom-up summation under one node
    ///
    /// Returns the node's full-window series so the caller can fold it into
    /// the next level up. Write failures are logged per node and do not stop
    /// the walk; failures loading children would corrupt the aggregate and
    /// are propagated.
    fn sum_subtree<'a>(
        &'a self,
        node: &'a Node,
        depth: usize,
        window: &'a RollupWindow,
        summaries: &'a HashMap<NodeId, Vec<(i64, Option<f64>)>>,
        written: &'a mut usize,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<(i64, Option<f64>)>>, RollupError>> + Send + 'a>>
    {
        Box::pin(async move {
            if depth == 0 {
                // Leaves not part of this chunk contribute nothing
                return Ok(summaries.get(&node.id).cloned());
            }

            let children = self.graph.weak_children(node.id).await.map_err(|e| {
                log::error!("loading children of {} during rollup failed: {}", node.name, e);
                e
            })?;

            let mut child_series = Vec::with_capacity(children.len());
            for child in &children {
                if let Some(series) = self
                    .sum_subtree(child, depth - 1, window, summaries, &mut *written)
                    .await?
                {
                    child_series.push((child.name.clone(), series));
                }
            }

            let rollup = window.sum_child_series(&child_series);
            let points: Vec<(i64, f64)> = rollup
                .iter()
                .filter_map(|(stamp, value)| value.map(|v| (*stamp, v)))
                .collect();
            if !points.is_empty() {
                match node.series_ref(ROLLUP_SUM) {
                    Some(target) => match self.series.replace_values(&target, &points).await {
                        Ok(()) => *written += 1,
                        Err(e) => {
                            // One failed write must not sink the whole pass
                            log::warn!("rollup write for {} failed: {}", node.name, e);
                        }
                    },
                    None => log::warn!("node {} has no {} series", node.name, ROLLUP_SUM),
                }
            }
            Ok(Some(rollup))
        })
    }

    /// Windowed summaries for a group of attributes, paged round-robin and
    /// queried with bounded parallelism
    async fn windowed_summaries(
        &self,
        attrs: &[AttrRef],
        window: &RollupWindow,
        paging: &PagingConfig,
    ) -> Result<HashMap<NodeId, Vec<(i64, Option<f64>)>>, RollupError> {
        let chunks = round_robin_chunks(attrs, self.settings.page_size);
        let range = window.range();

        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallel));
        let mut tasks: JoinSet<Result<HashMap<NodeId, Vec<(i64, Option<f64>)>>, StoreError>> =
            JoinSet::new();
        for chunk in chunks {
            if self.stop.is_stopped() {
                paging.record_error(StoreError::Cancelled);
                return Err(StoreError::Cancelled.into());
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| StoreError::Query(format!("semaphore closed: {}", e)))?;
            let series = self.series.clone();
            let paging = paging.clone();
            tasks.spawn(async move {
                let _permit = permit;
                series
                    .windowed_summary(&chunk, range, HOUR_SECS, &paging)
                    .await
            });
        }

        let mut merged = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let partial =
                joined.map_err(|e| StoreError::Query(format!("summary task failed: {}", e)))??;
            merged.extend(partial);
        }
        Ok(merged)
    }

    /// Fluctuation index per leaf over the configured number of days,
    /// sorted by name and appended to the pass's report file
    pub async fn compute_fluctuation_index(
        &self,
        attrs: &[AttrRef],
        now: DateTime<Utc>,
        report: &FluctuationReport,
        paging: &PagingConfig,
    ) -> Result<Vec<(String, f64)>, RollupError> {
        let days = self.settings.fluctuation_days as usize;
        let range = RollupWindow::trailing(now, days * 24).range();

        let chunks = round_robin_chunks(attrs, self.settings.page_size);
        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallel));
        let mut tasks: JoinSet<Result<HashMap<NodeId, Option<f64>>, StoreError>> = JoinSet::new();
        for chunk in chunks {
            if self.stop.is_stopped() {
                paging.record_error(StoreError::Cancelled);
                return Err(StoreError::Cancelled.into());
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| StoreError::Query(format!("semaphore closed: {}", e)))?;
            let series = self.series.clone();
            let paging = paging.clone();
            tasks.spawn(async move {
                let _permit = permit;
                series.single_summary(&chunk, range, &paging).await
            });
        }

        let mut spans: HashMap<NodeId, Option<f64>> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let partial =
                joined.map_err(|e| StoreError::Query(format!("summary task failed: {}", e)))??;
            spans.extend(partial);
        }

        // One row per leaf with a good range, sorted by name
        let mut rows: Vec<(String, f64)> = attrs
            .iter()
            .filter_map(|attr| {
                spans
                    .get(&attr.node)
                    .copied()
                    .flatten()
                    .map(|span| (attr.node_name.clone(), span / days as f64))
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        report.append(&rows)?;
        log::info!(
            "wrote {} fluctuation rows to {}",
            rows.len(),
            report.path().display()
        );
        Ok(rows)
    }
}

/// Split into `len / page + 1` round-robin lists so parallel queries stay
/// balanced even when attribute counts vary widely
fn round_robin_chunks(items: &[AttrRef], page: usize) -> Vec<Vec<AttrRef>> {
    let lists = items.len() / page + 1;
    let mut chunks = vec![Vec::new(); lists];
    for (i, item) in items.iter().enumerate() {
        chunks[i % lists].push(item.clone());
    }
    chunks.retain(|c| !c.is_empty());
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        MemoryGraphStore, MemoryTimeSeriesStore, SeriesBinding, TemplateDef, THRESHOLD,
    };
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap()
    }

    fn templates(store: &MemoryGraphStore) {
        store.register_template(TemplateDef {
            name: "Leaf".to_string(),
            base: None,
            attributes: Vec::new(),
        });
        store.register_template(TemplateDef {
            name: "Branch".to_string(),
            base: None,
            attributes: vec![
                (
                    ROLLUP_SUM.to_string(),
                    AttributeValue::Series(SeriesBinding::template_default("%Node%.Rollup_Sum")),
                ),
                (THRESHOLD.to_string(), AttributeValue::Scalar(1000.0)),
            ],
        });
        store.register_template(TemplateDef {
            name: "SubTree".to_string(),
            base: None,
            attributes: vec![(
                ROLLUP_SUM.to_string(),
                AttributeValue::Series(SeriesBinding::template_default("%Node%.Rollup_Sum")),
            )],
        });
    }

    fn resolved_value(name: &str) -> Vec<(String, AttributeValue)> {
        vec![(
            LEAF_VALUE.to_string(),
            AttributeValue::Series(SeriesBinding {
                config: format!("{}.Value", name),
                resolved: true,
            }),
        )]
    }

    struct World {
        graph: Arc<MemoryGraphStore>,
        series: Arc<MemoryTimeSeriesStore>,
        engine: RollupEngine,
        stop: StopSignal,
        leaves: Vec<Node>,
        branches: Vec<Node>,
        subtrees: Vec<Node>,
        _report_dir: tempfile::TempDir,
    }

    /// One branch per subtree, `leaves_per_subtree[i]` leaves under each
    async fn world_multi(leaves_per_subtree: &[usize]) -> World {
        let graph = Arc::new(MemoryGraphStore::new());
        templates(&graph);

        let root = graph.ensure_container_root(HIERARCHY_ROOT).await.unwrap();
        let branch_root = graph.ensure_container_root("BranchElements").await.unwrap();

        let mut leaves = Vec::new();
        let mut branches = Vec::new();
        let mut subtrees = Vec::new();
        let mut leaf_no = 0;
        for (i, count) in leaves_per_subtree.iter().enumerate() {
            let subtree = graph
                .create_node(root.id, &format!("SubTree{:08}", i + 1), "SubTree")
                .await
                .unwrap();
            let branch = graph
                .create_node(branch_root.id, &format!("Branch{:08}", i + 1), "Branch")
                .await
                .unwrap();
            graph
                .resolve_bindings(&[subtree.id, branch.id])
                .await
                .unwrap();
            graph.add_child(subtree.id, branch.id).await.unwrap();

            for _ in 0..*count {
                let name = format!("Leaf{:04}", leaf_no);
                leaf_no += 1;
                let id = graph.seed_leaf(&name, "Leaf", resolved_value(&name));
                graph.add_child(branch.id, id).await.unwrap();
                leaves.push(graph.get_node(id).await.unwrap());
            }

            subtrees.push(graph.get_node(subtree.id).await.unwrap());
            branches.push(graph.get_node(branch.id).await.unwrap());
        }

        let report_dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::for_tests(&["Leaf", "Branch", "SubTree"]);
        settings.report_dir = report_dir.path().to_path_buf();

        let series = Arc::new(MemoryTimeSeriesStore::new());
        let stop = StopSignal::new();
        let engine = RollupEngine::new(graph.clone(), series.clone(), settings, stop.clone());

        World {
            graph,
            series,
            engine,
            stop,
            leaves,
            branches,
            subtrees,
            _report_dir: report_dir,
        }
    }

    async fn world(leaf_count: usize) -> World {
        world_multi(&[leaf_count]).await
    }

    /// Chunk covering a single-subtree world
    fn batch_of(w: &World) -> Vec<(Node, Vec<AttrRef>)> {
        let attrs = w
            .leaves
            .iter()
            .filter_map(|l| l.series_ref(LEAF_VALUE))
            .collect();
        vec![(w.subtrees[0].clone(), attrs)]
    }

    #[tokio::test]
    async fn test_rollup_cascades_bottom_up() {
        let w = world(2).await;
        let end = now().timestamp();

        // Two leaves, values in the last two hours
        let a = w.leaves[0].series_ref(LEAF_VALUE).unwrap();
        let b = w.leaves[1].series_ref(LEAF_VALUE).unwrap();
        w.series.write_value(&a, end - 4000, 2.0);
        w.series.write_value(&b, end - 4000, 3.0);
        w.series.write_value(&a, end - 100, 10.0);

        let window = RollupWindow::trailing(now(), 336);
        let written = w
            .engine
            .perform_rollup(&batch_of(&w), &window, &w.engine.paging())
            .await
            .unwrap();
        assert_eq!(written, 2);

        let branch_series = w
            .series
            .series_of(&w.branches[0].series_ref(ROLLUP_SUM).unwrap());
        assert_eq!(branch_series, vec![(end - 3600, 5.0), (end, 10.0)]);

        // The subtree aggregates what the branch was just assigned
        let subtree_series = w
            .series
            .series_of(&w.subtrees[0].series_ref(ROLLUP_SUM).unwrap());
        assert_eq!(subtree_series, vec![(end - 3600, 5.0), (end, 10.0)]);
    }

    #[tokio::test]
    async fn test_empty_buckets_are_not_written_as_zero() {
        let w = world(1).await;
        let end = now().timestamp();

        let a = w.leaves[0].series_ref(LEAF_VALUE).unwrap();
        w.series.write_value(&a, end - 100, 7.0);

        let window = RollupWindow::trailing(now(), 336);
        w.engine
            .perform_rollup(&batch_of(&w), &window, &w.engine.paging())
            .await
            .unwrap();

        // Only the one populated hour lands in the rollup series
        let branch_series = w
            .series
            .series_of(&w.branches[0].series_ref(ROLLUP_SUM).unwrap());
        assert_eq!(branch_series, vec![(end, 7.0)]);
    }

    #[tokio::test]
    async fn test_flush_at_threshold_and_final_drain() {
        // flush_threshold is 8 under test settings: three subtrees of 5
        // leaves flush once mid-walk (10 >= 8) and once at the end (5)
        let w = world_multi(&[5, 5, 5]).await;
        let summary = w.engine.run_rollup_pass(now()).await.unwrap();
        assert_eq!(summary.leaf_attributes_processed, 15);
        assert_eq!(summary.chunks_flushed, 2);
    }

    #[tokio::test]
    async fn test_small_pass_flushes_once() {
        let w = world(3).await;
        let summary = w.engine.run_rollup_pass(now()).await.unwrap();
        assert_eq!(summary.leaf_attributes_processed, 3);
        assert_eq!(summary.chunks_flushed, 1);
    }

    #[tokio::test]
    async fn test_shared_subtrees_are_walked_once() {
        let w = world(2).await;

        // Attach the first leaf to a second branch in the same subtree
        let branch_root = w
            .graph
            .ensure_container_root("BranchElements")
            .await
            .unwrap();
        let other = w
            .graph
            .create_node(branch_root.id, "Branch00000099", "Branch")
            .await
            .unwrap();
        w.graph
            .add_child(w.subtrees[0].id, other.id)
            .await
            .unwrap();
        w.graph.add_child(other.id, w.leaves[0].id).await.unwrap();

        let summary = w.engine.run_rollup_pass(now()).await.unwrap();
        assert_eq!(
            summary.leaf_attributes_processed, 2,
            "a leaf reachable twice must be counted once"
        );
    }

    #[tokio::test]
    async fn test_stop_discards_the_accumulated_chunk() {
        let w = world(9).await;
        w.stop.stop();

        let err = w.engine.run_rollup_pass(now()).await.unwrap_err();
        assert!(matches!(err, RollupError::Store(StoreError::Cancelled)));
        assert_eq!(w.series.replace_calls(), 0);
    }

    #[tokio::test]
    async fn test_fluctuation_index_divides_span_by_days() {
        let w = world(2).await;
        let end = now().timestamp();

        // First leaf sees {2, 9, 5} inside the 7-day window: span 7, index 1.
        // The second leaf has no values and must produce no row.
        let a = w.leaves[0].series_ref(LEAF_VALUE).unwrap();
        w.series.write_value(&a, end - 3 * 86_400, 2.0);
        w.series.write_value(&a, end - 2 * 86_400, 9.0);
        w.series.write_value(&a, end - 86_400, 5.0);

        let attrs: Vec<AttrRef> = w
            .leaves
            .iter()
            .filter_map(|l| l.series_ref(LEAF_VALUE))
            .collect();
        let report = FluctuationReport::new(&w.engine.settings.report_dir, now());
        let rows = w
            .engine
            .compute_fluctuation_index(&attrs, now(), &report, &w.engine.paging())
            .await
            .unwrap();
        assert_eq!(rows, vec![("Leaf0000".to_string(), 1.0)]);

        let contents = std::fs::read_to_string(report.path()).unwrap();
        assert_eq!(contents, "Name, Fluctuation Index\nLeaf0000, 1\n");
    }

    #[tokio::test]
    async fn test_full_pass_summary_counts() {
        let w = world(2).await;
        let end = now().timestamp();
        for leaf in &w.leaves {
            let attr = leaf.series_ref(LEAF_VALUE).unwrap();
            w.series.write_value(&attr, end - 100, 1.0);
        }

        let summary = w.engine.run_rollup_pass(now()).await.unwrap();
        assert_eq!(summary.leaf_attributes_processed, 2);
        assert_eq!(summary.chunks_flushed, 1);
        assert_eq!(summary.nodes_written, 2);
        assert_eq!(summary.report_rows, 2);
    }

    #[test]
    fn test_round_robin_chunk_balance() {
        let attrs: Vec<AttrRef> = (0..5)
            .map(|i| AttrRef {
                node: i,
                node_name: format!("N{}", i),
                attribute: LEAF_VALUE.to_string(),
            })
            .collect();

        let chunks = round_robin_chunks(&attrs, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 2);
        assert_eq!(chunks[2].len(), 1);
    }
}
