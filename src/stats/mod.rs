//! Statistics counters
//!
//! Each component owns one counter set and exposes it through a `stats()` accessor.

pub mod metrics;

pub use metrics::{
    PipelineStats, PipelineStatsSnapshot, ReclaimStats, ReclaimStatsSnapshot, TierStats,
    TierStatsSnapshot,
};
