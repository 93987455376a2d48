//! Tiered storage device
//!
//! Presents an ordered list of devices (hottest first) as one device. Writes go to every tier
//! that covers the target segment; the caller is notified once all tiers up to and including
//! the commit point have finished. Bounded tiers retain only the newest `capacity` segments:
//! when the tail advances, each such tier's boundary is raised and the segments that fall out
//! are deleted once every protected thread has moved past the current epoch.
//!
//! Invariants:
//! - the tail never decreases, and neither does any tier boundary;
//! - boundaries are non-increasing from hot to cold, so the hottest tier whose boundary is
//!   `<=` a segment is the hottest tier holding it;
//! - right after an eviction a bounded tier spans exactly its capacity.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer_pool::PooledBuffer;
use crate::device::{Capacity, DeleteCallback, IoCallback, ReadCallback, StorageDevice};
use crate::epoch::LightEpoch;
use crate::stats::TierStats;

/// Errors raised when assembling or restoring a tiered device
#[derive(Debug, Error)]
pub enum TierError {
    /// No tiers were supplied
    #[error("a tiered device needs at least one tier")]
    NoTiers,
    /// Commit point is not a tier index
    #[error("commit point {commit_point} is out of range for {tiers} tiers")]
    CommitPointOutOfRange {
        /// Requested commit point
        commit_point: usize,
        /// Number of tiers
        tiers: usize,
    },
    /// Tiers disagree on segment size
    #[error("tier {tier} has segment size {found}, expected {expected}")]
    SegmentSizeMismatch {
        /// Offending tier
        tier: usize,
        /// Segment size of tier 0
        expected: u64,
        /// Segment size of the offending tier
        found: u64,
    },
    /// An unbounded tier is followed by another tier
    #[error("tier {tier} has unspecified capacity but is not the last tier")]
    UnboundedTierNotLast {
        /// Offending tier
        tier: usize,
    },
    /// A colder tier is smaller than a hotter one
    #[error("tier {tier} is smaller than the tier before it")]
    CapacityDecreasing {
        /// Offending tier
        tier: usize,
    },
    /// Persisted boundaries do not describe this device
    #[error("persisted boundaries do not match the tier layout: {0}")]
    BoundaryMismatch(String),
    /// Reading or writing the boundary file failed
    #[error("boundary file I/O failed: {0}")]
    Io(#[from] io::Error),
    /// The boundary file is not valid JSON
    #[error("boundary file is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted tail and per-tier boundaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBoundaries {
    /// One past the highest segment ever written
    pub tail: u64,
    /// Lowest resident segment per tier, hottest first
    pub boundaries: Vec<u64>,
}

impl TierBoundaries {
    /// Write as JSON
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<(), TierError> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Read from JSON
    pub fn read_from_path(path: impl AsRef<Path>) -> Result<Self, TierError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

struct Tier {
    device: Arc<dyn StorageDevice>,
    capacity: Capacity,
    /// Lowest segment this tier still holds
    boundary: AtomicU64,
}

/// Shared completion state for the tiers at or before the commit point
struct WriteCountdown {
    remaining: AtomicUsize,
    len: usize,
    first_error: Mutex<Option<io::Error>>,
    callback: Mutex<Option<IoCallback>>,
}

impl WriteCountdown {
    fn new(participants: usize, len: usize, callback: IoCallback) -> Self {
        Self {
            remaining: AtomicUsize::new(participants),
            len,
            first_error: Mutex::new(None),
            callback: Mutex::new(Some(callback)),
        }
    }

    fn complete(&self, result: io::Result<usize>) {
        if let Err(err) = result {
            let mut first = self.first_error.lock();
            if first.is_none() {
                *first = Some(err);
            }
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let result = match self.first_error.lock().take() {
                Some(err) => Err(err),
                None => Ok(self.len),
            };
            if let Some(callback) = self.callback.lock().take() {
                callback(result);
            }
        }
    }
}

/// Shared completion state for a multi-tier delete
struct DeleteCountdown {
    remaining: AtomicUsize,
    first_error: Mutex<Option<io::Error>>,
    callback: Mutex<Option<DeleteCallback>>,
}

impl DeleteCountdown {
    fn complete(&self, result: io::Result<()>) {
        if let Err(err) = result {
            self.first_error.lock().get_or_insert(err);
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let result = match self.first_error.lock().take() {
                Some(err) => Err(err),
                None => Ok(()),
            };
            if let Some(callback) = self.callback.lock().take() {
                callback(result);
            }
        }
    }
}

/// A stack of devices acting as one
pub struct TieredStorageDevice {
    epoch: Arc<LightEpoch>,
    tiers: Vec<Tier>,
    commit_point: usize,
    segment_size: u64,
    /// One past the highest segment ever written
    tail: AtomicU64,
    closed: AtomicBool,
    stats: TierStats,
}

impl TieredStorageDevice {
    /// Assemble a tiered device from `tiers`, hottest first.
    pub fn new(
        epoch: Arc<LightEpoch>,
        commit_point: usize,
        tiers: Vec<Arc<dyn StorageDevice>>,
    ) -> Result<Self, TierError> {
        let first = tiers.first().ok_or(TierError::NoTiers)?;
        if commit_point >= tiers.len() {
            return Err(TierError::CommitPointOutOfRange {
                commit_point,
                tiers: tiers.len(),
            });
        }

        let segment_size = first.segment_size();
        let mut previous: Option<u64> = None;
        for (i, device) in tiers.iter().enumerate() {
            let found = device.segment_size();
            if found != segment_size {
                return Err(TierError::SegmentSizeMismatch {
                    tier: i,
                    expected: segment_size,
                    found,
                });
            }
            match device.capacity() {
                Capacity::Unspecified if i + 1 != tiers.len() => {
                    return Err(TierError::UnboundedTierNotLast { tier: i });
                }
                Capacity::Unspecified => {}
                Capacity::Segments(cap) => {
                    if previous.is_some_and(|p| cap < p) {
                        return Err(TierError::CapacityDecreasing { tier: i });
                    }
                    previous = Some(cap);
                }
            }
        }

        let tiers = tiers
            .into_iter()
            .map(|device| Tier {
                capacity: device.capacity(),
                device,
                boundary: AtomicU64::new(0),
            })
            .collect();

        Ok(Self {
            epoch,
            tiers,
            commit_point,
            segment_size,
            tail: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            stats: TierStats::new(),
        })
    }

    /// Number of tiers
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// Index of the tier whose completion defines durability
    pub fn commit_point(&self) -> usize {
        self.commit_point
    }

    /// One past the highest segment ever written
    pub fn tail_segment(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    /// Lowest resident segment per tier, hottest first
    pub fn tier_boundaries(&self) -> Vec<u64> {
        self.tiers
            .iter()
            .map(|t| t.boundary.load(Ordering::Acquire))
            .collect()
    }

    /// Device at tier `index`
    pub fn tier(&self, index: usize) -> Option<&Arc<dyn StorageDevice>> {
        self.tiers.get(index).map(|t| &t.device)
    }

    /// Tier counters
    pub fn stats(&self) -> &TierStats {
        &self.stats
    }

    /// Snapshot the tail and boundaries for persistence
    pub fn checkpoint_boundaries(&self) -> TierBoundaries {
        TierBoundaries {
            tail: self.tail_segment(),
            boundaries: self.tier_boundaries(),
        }
    }

    /// Install persisted boundaries. Call before the device serves I/O.
    pub fn restore_boundaries(&self, saved: &TierBoundaries) -> Result<(), TierError> {
        if saved.boundaries.len() != self.tiers.len() {
            return Err(TierError::BoundaryMismatch(format!(
                "{} boundaries for {} tiers",
                saved.boundaries.len(),
                self.tiers.len()
            )));
        }
        if saved.boundaries.windows(2).any(|w| w[0] < w[1]) {
            return Err(TierError::BoundaryMismatch(
                "boundaries must not increase from hot to cold".to_string(),
            ));
        }
        for (i, (tier, &boundary)) in self.tiers.iter().zip(&saved.boundaries).enumerate() {
            if boundary > saved.tail {
                return Err(TierError::BoundaryMismatch(format!(
                    "tier {i} boundary {boundary} is past tail {}",
                    saved.tail
                )));
            }
            if let Some(cap) = tier.capacity.segments() {
                if saved.tail - boundary > cap {
                    return Err(TierError::BoundaryMismatch(format!(
                        "tier {i} would span {} segments but holds {cap}",
                        saved.tail - boundary
                    )));
                }
            }
        }

        self.tail.store(saved.tail, Ordering::Release);
        for (tier, &boundary) in self.tiers.iter().zip(&saved.boundaries) {
            tier.boundary.store(boundary, Ordering::Release);
        }
        tracing::debug!(tail = saved.tail, boundaries = ?saved.boundaries, "restored tier boundaries");
        Ok(())
    }

    /// Hottest tier holding `segment`
    fn closest_tier_containing(&self, segment: u64) -> Option<usize> {
        self.tiers
            .iter()
            .position(|t| t.boundary.load(Ordering::Acquire) <= segment)
    }

    /// Raise the tail past `segment` and evict from every tier that now spans more than its
    /// capacity.
    fn update_device_range(&self, segment: u64) {
        let new_tail = segment + 1;
        if self.tail.fetch_max(new_tail, Ordering::AcqRel) >= new_tail {
            return;
        }

        for (index, tier) in self.tiers.iter().enumerate() {
            let Some(capacity) = tier.capacity.segments() else {
                continue;
            };
            let target = new_tail.saturating_sub(capacity);
            let mut old = tier.boundary.load(Ordering::Acquire);
            while old < target {
                match tier.boundary.compare_exchange_weak(
                    old,
                    target,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        self.schedule_eviction(index, tier, old, target);
                        break;
                    }
                    Err(current) => old = current,
                }
            }
        }
    }

    fn schedule_eviction(&self, index: usize, tier: &Tier, from: u64, to: u64) {
        self.stats.record_eviction(to - from);
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                tier = index,
                from,
                to,
                device = %tier.device.identity(),
                "evicting segments"
            );
        }
        let device = tier.device.clone();
        self.epoch
            .bump_with_action(move || device.delete_segment_range(from, to));
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "tiered device is closed")
}

impl StorageDevice for TieredStorageDevice {
    fn identity(&self) -> String {
        let tiers: Vec<String> = self.tiers.iter().map(|t| t.device.identity()).collect();
        format!(
            "{}; commit point: {} at tier {}",
            tiers.join(", "),
            self.tiers[self.commit_point].device.identity(),
            self.commit_point
        )
    }

    fn capacity(&self) -> Capacity {
        self.tiers
            .iter()
            .try_fold(0u64, |sum, t| t.capacity.segments().map(|c| sum + c))
            .map_or(Capacity::Unspecified, Capacity::Segments)
    }

    fn segment_size(&self) -> u64 {
        self.segment_size
    }

    fn sector_size(&self) -> usize {
        self.tiers
            .iter()
            .map(|t| t.device.sector_size())
            .max()
            .unwrap_or(512)
    }

    fn read_async(&self, segment: u64, offset: u64, buf: PooledBuffer, callback: ReadCallback) {
        if self.closed.load(Ordering::Acquire) {
            callback(buf, Err(closed_error()));
            return;
        }

        match self.closest_tier_containing(segment) {
            Some(index) => {
                self.stats.record_read(true);
                self.tiers[index]
                    .device
                    .read_async(segment, offset, buf, callback);
            }
            None => {
                self.stats.record_read(false);
                debug_assert!(false, "segment {segment} is held by no tier");
                tracing::warn!(segment, "read of a segment held by no tier");
                callback(
                    buf,
                    Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("segment {segment} is held by no tier"),
                    )),
                );
            }
        }
    }

    fn write_async(&self, segment: u64, offset: u64, data: Bytes, callback: IoCallback) {
        if self.closed.load(Ordering::Acquire) {
            callback(Err(closed_error()));
            return;
        }

        self.update_device_range(segment);

        let start_tier = match self.closest_tier_containing(segment) {
            Some(index) if index <= self.commit_point => index,
            _ => {
                debug_assert!(
                    false,
                    "write to segment {segment} is below the commit point's coverage"
                );
                tracing::warn!(segment, "write below the commit point's coverage");
                callback(Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("segment {segment} is below the commit point's coverage"),
                )));
                return;
            }
        };

        self.stats.record_write();
        let countdown = Arc::new(WriteCountdown::new(
            self.commit_point - start_tier + 1,
            data.len(),
            callback,
        ));

        for (index, tier) in self.tiers.iter().enumerate().skip(start_tier) {
            if index <= self.commit_point {
                let countdown = countdown.clone();
                tier.device.write_async(
                    segment,
                    offset,
                    data.clone(),
                    Box::new(move |result| countdown.complete(result)),
                );
            } else {
                tier.device.write_async(
                    segment,
                    offset,
                    data.clone(),
                    Box::new(move |result| {
                        if let Err(err) = result {
                            tracing::warn!(tier = index, segment, error = %err, "write past commit point failed");
                        }
                    }),
                );
            }
        }
    }

    fn delete_segment_range_async(&self, from: u64, to: u64, callback: DeleteCallback) {
        let tail = self.tail_segment();
        let targets: Vec<(usize, u64)> = self
            .tiers
            .iter()
            .enumerate()
            .filter_map(|(i, t)| {
                let start = from.max(t.boundary.load(Ordering::Acquire));
                (start < to && start < tail).then_some((i, start))
            })
            .collect();

        if targets.is_empty() {
            callback(Ok(()));
            return;
        }

        let countdown = Arc::new(DeleteCountdown {
            remaining: AtomicUsize::new(targets.len()),
            first_error: Mutex::new(None),
            callback: Mutex::new(Some(callback)),
        });
        for (index, start) in targets {
            let countdown = countdown.clone();
            self.tiers[index].device.delete_segment_range_async(
                start,
                to,
                Box::new(move |result| countdown.complete(result)),
            );
        }
    }

    fn delete_segment_range(&self, from: u64, to: u64) {
        let tail = self.tail_segment();
        for tier in &self.tiers {
            let start = from.max(tier.boundary.load(Ordering::Acquire));
            if start < to && start < tail {
                tier.device.delete_segment_range(start, to);
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for tier in &self.tiers {
            tier.device.close();
        }
    }
}

impl std::fmt::Debug for TieredStorageDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredStorageDevice")
            .field("tiers", &self.tiers.len())
            .field("commit_point", &self.commit_point)
            .field("tail", &self.tail_segment())
            .field("boundaries", &self.tier_boundaries())
            .finish()
    }
}
