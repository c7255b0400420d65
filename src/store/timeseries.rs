//! Time-series store interface and in-memory implementation
//!
//! Holds per-node named series points and serves the bulk operations the
//! rollup engine depends on: point resolution, paged windowed summaries,
//! range summaries, bulk replace-by-timestamp writes, and a live
//! value-change subscription stream drained by the observation monitors.

use crate::store::types::{
    AttrRef, EventValue, NodeId, StoreError, SubscriptionId, ValueChangeEvent,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Paging configuration handed to every bulk query
///
/// Carries a recorded error slot: when a query is cooperatively cancelled the
/// caller records the cancellation here and surfaces it, aborting only the
/// in-flight pass. Committed work from earlier chunks is retained.
#[derive(Clone)]
pub struct PagingConfig {
    pub page_size: usize,
    pub max_wait: Duration,
    error: Arc<Mutex<Option<StoreError>>>,
}

impl PagingConfig {
    pub fn new(page_size: usize, max_wait: Duration) -> Self {
        Self {
            page_size,
            max_wait,
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn record_error(&self, error: StoreError) {
        let mut slot = self.error.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(error);
    }

    pub fn recorded_error(&self) -> Option<StoreError> {
        self.error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Bind the underlying points for a group of attributes (idempotent)
    async fn resolve_points(&self, attributes: &[AttrRef]) -> Result<(), StoreError>;

    /// Bucketed totals over `(start, end]` per attribute; a bucket with no
    /// event is reported as `None`, never zero. Each series has one entry per
    /// bucket, timestamped at the bucket end.
    async fn windowed_summary(
        &self,
        attributes: &[AttrRef],
        range: (i64, i64),
        bucket_secs: i64,
        paging: &PagingConfig,
    ) -> Result<HashMap<NodeId, Vec<(i64, Option<f64>)>>, StoreError>;

    /// Range (max - min) over `(start, end]` per attribute; `None` when the
    /// window holds no good value.
    async fn single_summary(
        &self,
        attributes: &[AttrRef],
        range: (i64, i64),
        paging: &PagingConfig,
    ) -> Result<HashMap<NodeId, Option<f64>>, StoreError>;

    /// Bulk replace-by-timestamp on one attribute's series
    async fn replace_values(
        &self,
        attribute: &AttrRef,
        series: &[(i64, f64)],
    ) -> Result<(), StoreError>;

    /// Register for live value-change events on the given attributes
    async fn subscribe(&self, attributes: &[AttrRef]) -> Result<SubscriptionId, StoreError>;

    /// Drain currently available events, in arrival order
    async fn drain_events(
        &self,
        subscription: SubscriptionId,
    ) -> Result<Vec<ValueChangeEvent>, StoreError>;

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), StoreError>;
}

fn point_key(attr: &AttrRef) -> (NodeId, String) {
    (attr.node, attr.attribute.clone())
}

struct Subscription {
    keys: HashSet<(NodeId, String)>,
    queue: VecDeque<ValueChangeEvent>,
}

#[derive(Default)]
struct TsState {
    points: HashMap<(NodeId, String), BTreeMap<i64, f64>>,
    resolved: HashSet<(NodeId, String)>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    next_subscription: SubscriptionId,
    replace_calls: usize,
}

impl TsState {
    fn push_event(&mut self, attr: &AttrRef, timestamp: i64, value: EventValue) {
        let key = point_key(attr);
        for sub in self.subscriptions.values_mut() {
            if sub.keys.contains(&key) {
                sub.queue.push_back(ValueChangeEvent {
                    node: attr.node,
                    node_name: attr.node_name.clone(),
                    attribute: attr.attribute.clone(),
                    timestamp,
                    value: value.clone(),
                });
            }
        }
    }
}

/// In-memory time-series store
pub struct MemoryTimeSeriesStore {
    state: Mutex<TsState>,
}

impl Default for MemoryTimeSeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTimeSeriesStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TsState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one raw measurement and fan it out to subscribers
    pub fn write_value(&self, attr: &AttrRef, timestamp: i64, value: f64) {
        let mut state = self.lock();
        state
            .points
            .entry(point_key(attr))
            .or_default()
            .insert(timestamp, value);
        state.push_event(attr, timestamp, EventValue::Number(value));
    }

    /// Record a status transition (delivered to subscribers, not stored as a
    /// numeric point)
    pub fn write_status(&self, attr: &AttrRef, timestamp: i64, status: &str) {
        let mut state = self.lock();
        state.push_event(attr, timestamp, EventValue::Status(status.to_string()));
    }

    /// Number of bulk replace operations performed (test instrumentation)
    pub fn replace_calls(&self) -> usize {
        self.lock().replace_calls
    }

    /// Stored series for one attribute (test instrumentation)
    pub fn series_of(&self, attr: &AttrRef) -> Vec<(i64, f64)> {
        self.lock()
            .points
            .get(&point_key(attr))
            .map(|series| series.iter().map(|(t, v)| (*t, *v)).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryTimeSeriesStore {
    async fn resolve_points(&self, attributes: &[AttrRef]) -> Result<(), StoreError> {
        let mut state = self.lock();
        for attr in attributes {
            let key = point_key(attr);
            state.points.entry(key.clone()).or_default();
            state.resolved.insert(key);
        }
        Ok(())
    }

    async fn windowed_summary(
        &self,
        attributes: &[AttrRef],
        range: (i64, i64),
        bucket_secs: i64,
        _paging: &PagingConfig,
    ) -> Result<HashMap<NodeId, Vec<(i64, Option<f64>)>>, StoreError> {
        if bucket_secs <= 0 || range.1 <= range.0 {
            return Err(StoreError::Query(format!(
                "invalid summary window {:?} / {}s",
                range, bucket_secs
            )));
        }

        let state = self.lock();
        let buckets = ((range.1 - range.0) / bucket_secs) as usize;
        let mut results = HashMap::new();

        for attr in attributes {
            let series = state.points.get(&point_key(attr));
            let mut summary = Vec::with_capacity(buckets);
            for i in 0..buckets {
                let bucket_start = range.0 + i as i64 * bucket_secs;
                let bucket_end = bucket_start + bucket_secs;
                // Event-weighted total over (bucket_start, bucket_end]
                let total = series.and_then(|s| {
                    let mut sum = 0.0;
                    let mut any = false;
                    for (_, v) in s.range(bucket_start + 1..=bucket_end) {
                        sum += v;
                        any = true;
                    }
                    any.then_some(sum)
                });
                summary.push((bucket_end, total));
            }
            results.insert(attr.node, summary);
        }

        Ok(results)
    }

    async fn single_summary(
        &self,
        attributes: &[AttrRef],
        range: (i64, i64),
        _paging: &PagingConfig,
    ) -> Result<HashMap<NodeId, Option<f64>>, StoreError> {
        let state = self.lock();
        let mut results = HashMap::new();

        for attr in attributes {
            let span = state.points.get(&point_key(attr)).and_then(|series| {
                let mut min = f64::INFINITY;
                let mut max = f64::NEG_INFINITY;
                let mut any = false;
                for (_, v) in series.range(range.0 + 1..=range.1) {
                    min = min.min(*v);
                    max = max.max(*v);
                    any = true;
                }
                any.then_some(max - min)
            });
            results.insert(attr.node, span);
        }

        Ok(results)
    }

    async fn replace_values(
        &self,
        attribute: &AttrRef,
        series: &[(i64, f64)],
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.replace_calls += 1;
        {
            let point = state.points.entry(point_key(attribute)).or_default();
            for (timestamp, value) in series {
                point.insert(*timestamp, *value);
            }
        }
        // Replaced values are live updates too: subscribers to aggregated
        // attributes see them the same way they see raw measurements.
        for (timestamp, value) in series {
            state.push_event(attribute, *timestamp, EventValue::Number(*value));
        }
        Ok(())
    }

    async fn subscribe(&self, attributes: &[AttrRef]) -> Result<SubscriptionId, StoreError> {
        let mut state = self.lock();
        state.next_subscription += 1;
        let id = state.next_subscription;
        state.subscriptions.insert(
            id,
            Subscription {
                keys: attributes.iter().map(point_key).collect(),
                queue: VecDeque::new(),
            },
        );
        Ok(id)
    }

    async fn drain_events(
        &self,
        subscription: SubscriptionId,
    ) -> Result<Vec<ValueChangeEvent>, StoreError> {
        let mut state = self.lock();
        let sub = state
            .subscriptions
            .get_mut(&subscription)
            .ok_or_else(|| StoreError::NotFound(format!("subscription {}", subscription)))?;
        Ok(sub.queue.drain(..).collect())
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), StoreError> {
        self.lock().subscriptions.remove(&subscription);
        Ok(())
    }
}
