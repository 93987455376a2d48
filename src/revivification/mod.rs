//! Record revivification
//!
//! Retired records are reused only once no thread can still be reading them. The
//! [`FreeRecordPool`] parks them with the epoch they were freed in, and a single
//! [`BumpEpochWorker`] advances the epoch so those entries become safe.

mod bump_worker;
mod free_pool;

pub use bump_worker::{
    BumpEpochWorker, BumpScan, WorkerConfig, WorkerState, DEFAULT_BUMP_INTERVAL,
    DEFAULT_MAX_COUNT_FOR_BUMP,
};
pub use free_pool::{
    FreeBins, FreePoolConfig, FreeRecord, FreeRecordPool, DEFAULT_BIN_COUNT,
    DEFAULT_SLOTS_PER_BIN, MIN_BIN_RECORD_SIZE,
};

use std::sync::Arc;

use crate::epoch::LightEpoch;

/// Worker and pool settings together
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclamationConfig {
    /// Bump worker tuning
    pub worker: WorkerConfig,
    /// Free pool sizing
    pub pool: FreePoolConfig,
}

impl ReclamationConfig {
    /// Build a free pool with these settings
    pub fn build_pool(&self, epoch: Arc<LightEpoch>) -> FreeRecordPool {
        FreeRecordPool::new(epoch, self.pool, self.worker)
    }
}
