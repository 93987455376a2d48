//! oxitier - Epoch protection, tiered segment storage and disk-chain resolution
//!
//! The storage layer under a hybrid-log key-value engine:
//! - **Epochs**: lightweight protection that defers reclamation until every thread has
//!   moved past the epoch in which something was retired
//! - **Tiered device**: a stack of segment devices, hottest first, where every write goes to
//!   all tiers and bounded tiers evict their oldest segments
//! - **Resolution**: walks on-disk hash chains from the newest address for a key to the
//!   record that matches it
//! - **Revivification**: a free record pool whose entries become reusable once an epoch bump
//!   makes them safe
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use oxitier::prelude::*;
//!
//! let epoch = Arc::new(LightEpoch::new());
//! let device = Arc::new(MemoryDevice::new("log", 1 << 20, Capacity::Unspecified));
//! let pipeline = ResolutionPipeline::<u64, u64>::new(
//!     epoch.clone(),
//!     device,
//!     None,
//!     PipelineConfig::default(),
//! )?;
//!
//! let outcome = pipeline.resolve(42, start_address).await;
//! ```

#![warn(missing_docs)]

pub mod address;
pub mod buffer_pool;
pub mod codec;
pub mod config;
pub mod device;
pub mod epoch;
pub mod record;
pub mod resolve;
pub mod revivification;
pub mod stats;
pub mod status;

// Re-exports for convenience
pub use address::{Address, AtomicAddress};
pub use config::{ConfigError, OxitierConfig};
pub use device::{StorageDevice, TieredStorageDevice};
pub use epoch::{EpochGuard, LightEpoch};
pub use record::RecordInfo;
pub use resolve::{ReadOutcome, ResolutionPipeline};
pub use revivification::{BumpEpochWorker, FreeRecordPool};
pub use status::Status;

/// Constants used throughout the library
pub mod constants {
    /// Size of a cache line in bytes
    pub const CACHE_LINE_BYTES: usize = 64;

    /// Default number of per-thread epoch slots
    pub const MAX_THREADS: usize = 128;
}

/// Utility for size literals (e.g., 1_GiB)
pub mod size {
    /// 1 KiB in bytes
    pub const KIB: u64 = 1024;
    /// 1 MiB in bytes
    pub const MIB: u64 = 1024 * KIB;
    /// 1 GiB in bytes
    pub const GIB: u64 = 1024 * MIB;
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::address::{Address, AtomicAddress};
    pub use crate::codec::{PersistKey, PersistValue};
    pub use crate::device::{
        Capacity, FileSegmentDevice, IoDispatcher, MemoryDevice, StorageDevice,
        SyncStorageDevice, TieredStorageDevice,
    };
    pub use crate::epoch::{EpochGuard, LightEpoch};
    pub use crate::record::RecordInfo;
    pub use crate::resolve::{Completion, PipelineConfig, ReadOutcome, ResolutionPipeline};
    pub use crate::revivification::{FreeRecordPool, ReclamationConfig};
    pub use crate::status::Status;
}
