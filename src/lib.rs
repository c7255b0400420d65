//! Hierarchy synchronization and rollup analytics for large asset
//! populations
//!
//! Two halves share this crate:
//! - the hierarchy synchronizer builds an N-level tree from flat leaf
//!   records and keeps it repaired as leaves appear or re-key
//! - the rollup engine sums leaf time series bottom-up through the tree,
//!   reports per-branch fluctuation indexes, and watches live values for
//!   threshold outliers and mode transitions
//!
//! Both run against the store interfaces in [`store`]; the in-memory
//! implementations back the tests and the binaries' demo wiring.

pub mod config;
pub mod hierarchy;
pub mod monitor;
pub mod rollup;
pub mod shutdown;
pub mod store;

pub use config::{ConfigError, Settings};
pub use shutdown::StopSignal;
