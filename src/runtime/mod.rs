//! Worker threads and process-wide shutdown signalling.

pub mod threading;

pub use threading::{
    IngestCommand, LedgerWorkerPool, RoleMetrics, RoleSendError, RoleSender, SummariserCommand,
    WorkerPoolMetrics, WorkerRole,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide "shutting down" flag, polled by bulk loops.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
