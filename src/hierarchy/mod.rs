//! Tree construction from flat leaf records

pub mod container;
pub mod synchronizer;

pub use container::ContainerIndex;
pub use synchronizer::{HierarchySynchronizer, SyncState};
