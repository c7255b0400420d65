//! External store interfaces (asset graph + time series) and the in-memory
//! implementations used by tests and the demo wiring

pub mod graph;
pub mod timeseries;
pub mod types;

pub use graph::{find_all_nodes, AssetGraphStore, MemoryGraphStore, TemplateDef};
pub use timeseries::{MemoryTimeSeriesStore, PagingConfig, TimeSeriesStore};
pub use types::{
    container_root_name, AttrRef, AttributeValue, ChangeCursor, ChangedItem, EventValue,
    IntervalRecord, Node, NodeId, SeriesBinding, StoreError, SubscriptionId, ValueChangeEvent,
    CONTAINER_SUFFIX, HIERARCHY_ROOT, LEAF_MODE, LEAF_VALUE, ROLLUP_SUM, THRESHOLD,
};
