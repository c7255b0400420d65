//! Shared cooperative cancellation signal
//!
//! One `StopSignal` is cloned into every long-running activity (synchronizer
//! loop, subscription pumps, rollup driver). Workers observe it at chunk and
//! loop boundaries; nothing is ever aborted mid-operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
