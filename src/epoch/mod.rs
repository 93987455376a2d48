//! Epoch-based protection and deferred reclamation
//!
//! A [`LightEpoch`] is created once per store and shared by every component that reads
//! reclaimable memory or segments (the resolution pipeline, the tiered device and the
//! reclamation worker). Threads protect themselves before touching shared state and refresh
//! periodically; deferred actions run once all protected threads have moved past the epoch
//! the action was registered against.

mod light_epoch;

pub use light_epoch::{
    get_thread_id, EpochConfig, EpochGuard, LightEpoch, DEFAULT_DRAIN_LIST_SIZE, UNPROTECTED,
};
