//! Statistics metrics definitions
//!
//! Counters are relaxed atomics; snapshots are plain serializable copies.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for the record resolution pipeline
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Primary reads issued (one per hop, plus short-read retries)
    pub reads_issued: AtomicU64,
    /// Reads reissued because the first buffer was too small
    pub short_read_retries: AtomicU64,
    /// Secondary reads against the object log
    pub object_reads: AtomicU64,
    /// Chain hops to an older record after a key mismatch
    pub hops: AtomicU64,
    /// Contexts delivered with a matching record (value or tombstone)
    pub found: AtomicU64,
    /// Contexts delivered as not found
    pub not_found: AtomicU64,
    /// Contexts delivered with an error
    pub failed: AtomicU64,
    /// Times an issuer had to wait for admission
    pub admission_waits: AtomicU64,
}

impl PipelineStats {
    /// Create new pipeline stats
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.reads_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_short_read(&self) {
        self.short_read_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_object_read(&self) {
        self.object_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hop(&self) {
        self.hops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_admission_wait(&self) {
        self.admission_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_found(&self) {
        self.found.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            reads_issued: self.reads_issued.load(Ordering::Relaxed),
            short_read_retries: self.short_read_retries.load(Ordering::Relaxed),
            object_reads: self.object_reads.load(Ordering::Relaxed),
            hops: self.hops.load(Ordering::Relaxed),
            found: self.found.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            admission_waits: self.admission_waits.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct PipelineStatsSnapshot {
    pub reads_issued: u64,
    pub short_read_retries: u64,
    pub object_reads: u64,
    pub hops: u64,
    pub found: u64,
    pub not_found: u64,
    pub failed: u64,
    pub admission_waits: u64,
}

impl PipelineStatsSnapshot {
    /// Contexts delivered in any way
    pub fn completed(&self) -> u64 {
        self.found + self.not_found + self.failed
    }
}

/// Counters for the tiered device
#[derive(Debug, Default)]
pub struct TierStats {
    /// Writes accepted
    pub writes: AtomicU64,
    /// Reads routed to a tier
    pub reads: AtomicU64,
    /// Reads for a segment no tier holds
    pub misses: AtomicU64,
    /// Boundary raises won (one deferred deletion each)
    pub evictions: AtomicU64,
    /// Segments handed to deferred deletion
    pub evicted_segments: AtomicU64,
}

impl TierStats {
    /// Create new tier stats
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, hit: bool) {
        if hit {
            self.reads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_eviction(&self, segments: u64) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.evicted_segments.fetch_add(segments, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> TierStatsSnapshot {
        TierStatsSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            evicted_segments: self.evicted_segments.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TierStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct TierStatsSnapshot {
    pub writes: u64,
    pub reads: u64,
    pub misses: u64,
    pub evictions: u64,
    pub evicted_segments: u64,
}

/// Counters for record reclamation
#[derive(Debug, Default)]
pub struct ReclaimStats {
    /// Epoch bumps performed by the worker
    pub bumps: AtomicU64,
    /// Worker threads launched
    pub worker_launches: AtomicU64,
    /// Records added to the free pool
    pub frees: AtomicU64,
    /// Frees rejected because the bin was full
    pub rejected_frees: AtomicU64,
    /// Records taken for reuse
    pub takes: AtomicU64,
    /// Most bumps observed running at once
    pub peak_concurrent_bumps: AtomicU64,
}

impl ReclaimStats {
    /// Create new reclamation stats
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_bump(&self) {
        self.bumps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_launch(&self) {
        self.worker_launches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_free(&self, accepted: bool) {
        if accepted {
            self.frees.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_frees.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_take(&self) {
        self.takes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_concurrent_bumps(&self, concurrent: usize) {
        self.peak_concurrent_bumps
            .fetch_max(concurrent as u64, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> ReclaimStatsSnapshot {
        ReclaimStatsSnapshot {
            bumps: self.bumps.load(Ordering::Relaxed),
            worker_launches: self.worker_launches.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            rejected_frees: self.rejected_frees.load(Ordering::Relaxed),
            takes: self.takes.load(Ordering::Relaxed),
            peak_concurrent_bumps: self.peak_concurrent_bumps.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReclaimStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct ReclaimStatsSnapshot {
    pub bumps: u64,
    pub worker_launches: u64,
    pub frees: u64,
    pub rejected_frees: u64,
    pub takes: u64,
    pub peak_concurrent_bumps: u64,
}
