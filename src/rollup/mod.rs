//! Chunked bottom-up rollups, fluctuation indexes and report output

pub mod engine;
pub mod report;
pub mod window;

pub use engine::{PassSummary, RollupEngine};
pub use report::{FluctuationReport, OutlierReporter};
pub use window::RollupWindow;

use crate::store::StoreError;

#[derive(Debug)]
pub enum RollupError {
    Store(StoreError),
    Report(std::io::Error),
}

impl std::fmt::Display for RollupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollupError::Store(e) => write!(f, "store error: {}", e),
            RollupError::Report(e) => write!(f, "report output failed: {}", e),
        }
    }
}

impl std::error::Error for RollupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RollupError::Store(e) => Some(e),
            RollupError::Report(e) => Some(e),
        }
    }
}

impl From<StoreError> for RollupError {
    fn from(e: StoreError) -> Self {
        RollupError::Store(e)
    }
}

impl From<std::io::Error> for RollupError {
    fn from(e: std::io::Error) -> Self {
        RollupError::Report(e)
    }
}
