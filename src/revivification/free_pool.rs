//! Free record pool
//!
//! Records retired by deletes or relocations are parked here until the epoch they were freed
//! in is safe to reclaim, then handed out for reuse. Slots are grouped into bins by record
//! size; every slot is claimed with a CAS on its state byte.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::address::Address;
use crate::epoch::LightEpoch;
use crate::revivification::bump_worker::{BumpEpochWorker, BumpScan, WorkerConfig};
use crate::stats::ReclaimStats;

/// Smallest record size class
pub const MIN_BIN_RECORD_SIZE: u64 = 16;

/// Default number of size classes
pub const DEFAULT_BIN_COUNT: usize = 8;

/// Default slots per size class
pub const DEFAULT_SLOTS_PER_BIN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum SlotState {
    Empty = 0,
    Writing = 1,
    Ready = 2,
    Taking = 3,
}

#[derive(Default)]
struct FreeSlot {
    state: AtomicU8,
    address: AtomicU64,
    size: AtomicU64,
    added_epoch: AtomicU64,
}

impl FreeSlot {
    fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is(&self, state: SlotState) -> bool {
        self.state.load(Ordering::Acquire) == state as u8
    }
}

/// A record handed back for reuse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRecord {
    /// Where the record lives
    pub address: Address,
    /// Allocated size of the record in bytes
    pub size: u64,
}

/// Free pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreePoolConfig {
    /// Number of size classes; class `i` holds records up to `16 << i` bytes, the last class
    /// holds everything larger
    pub bins: usize,
    /// Slots per size class
    pub slots_per_bin: usize,
}

impl Default for FreePoolConfig {
    fn default() -> Self {
        Self {
            bins: DEFAULT_BIN_COUNT,
            slots_per_bin: DEFAULT_SLOTS_PER_BIN,
        }
    }
}

/// Slot storage shared with the bump worker
pub struct FreeBins {
    epoch: Arc<LightEpoch>,
    bins: Vec<Box<[FreeSlot]>>,
}

impl FreeBins {
    fn new(epoch: Arc<LightEpoch>, config: FreePoolConfig) -> Self {
        let bins = (0..config.bins.max(1))
            .map(|_| {
                (0..config.slots_per_bin.max(1))
                    .map(|_| FreeSlot::default())
                    .collect::<Vec<_>>()
                    .into_boxed_slice()
            })
            .collect();
        Self { epoch, bins }
    }

    fn bin_for(&self, size: u64) -> usize {
        let last = self.bins.len() - 1;
        (0..last)
            .find(|&i| size <= MIN_BIN_RECORD_SIZE << i)
            .unwrap_or(last)
    }

    fn ready_slots(&self) -> impl Iterator<Item = &FreeSlot> {
        self.bins
            .iter()
            .flat_map(|bin| bin.iter())
            .filter(|slot| slot.is(SlotState::Ready))
    }

    fn add(&self, address: Address, size: u64) -> bool {
        let added_epoch = self.epoch.current_epoch();
        let bin = &self.bins[self.bin_for(size)];
        for slot in bin.iter() {
            if slot.is(SlotState::Empty) && slot.transition(SlotState::Empty, SlotState::Writing) {
                slot.address.store(address.control(), Ordering::Relaxed);
                slot.size.store(size, Ordering::Relaxed);
                slot.added_epoch.store(added_epoch, Ordering::Relaxed);
                slot.state.store(SlotState::Ready as u8, Ordering::Release);
                return true;
            }
        }
        false
    }

    /// Returns the record, or whether an unsafe candidate was seen.
    fn take(&self, min_size: u64) -> Result<FreeRecord, bool> {
        let mut saw_unsafe = false;
        for bin in &self.bins[self.bin_for(min_size)..] {
            for slot in bin.iter() {
                if !slot.is(SlotState::Ready)
                    || !slot.transition(SlotState::Ready, SlotState::Taking)
                {
                    continue;
                }
                let size = slot.size.load(Ordering::Relaxed);
                if size < min_size {
                    slot.state.store(SlotState::Ready as u8, Ordering::Release);
                    continue;
                }
                if !self
                    .epoch
                    .is_safe_to_reclaim(slot.added_epoch.load(Ordering::Relaxed))
                {
                    saw_unsafe = true;
                    slot.state.store(SlotState::Ready as u8, Ordering::Release);
                    continue;
                }
                let record = FreeRecord {
                    address: Address::from_control(slot.address.load(Ordering::Relaxed)),
                    size,
                };
                slot.state.store(SlotState::Empty as u8, Ordering::Release);
                return Ok(record);
            }
        }
        Err(saw_unsafe)
    }
}

impl BumpScan for FreeBins {
    fn scan_for_bump(&self, max: usize) -> usize {
        self.ready_slots()
            .filter(|slot| {
                !self
                    .epoch
                    .is_safe_to_reclaim(slot.added_epoch.load(Ordering::Relaxed))
            })
            .take(max)
            .count()
    }
}

/// Epoch-gated pool of reusable records
pub struct FreeRecordPool {
    bins: Arc<FreeBins>,
    worker: BumpEpochWorker<FreeBins>,
}

impl FreeRecordPool {
    /// Create an empty pool and its (idle) bump worker
    pub fn new(epoch: Arc<LightEpoch>, config: FreePoolConfig, worker: WorkerConfig) -> Self {
        let bins = Arc::new(FreeBins::new(epoch.clone(), config));
        let worker = BumpEpochWorker::new(epoch, bins.clone(), worker);
        Self { bins, worker }
    }

    /// Park a retired record.
    ///
    /// Returns `false` when its size class is full; the record is then left as garbage.
    pub fn free(&self, address: Address, size: u64) -> bool {
        let accepted = self.bins.add(address, size);
        self.worker.stats().record_free(accepted);
        if accepted {
            self.worker.start(true);
        } else if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(address = %address, size, "free pool bin full; record dropped");
        }
        accepted
    }

    /// Take a record of at least `min_size` bytes that no thread can still observe
    pub fn try_take(&self, min_size: u64) -> Option<FreeRecord> {
        match self.bins.take(min_size) {
            Ok(record) => {
                self.worker.stats().record_take();
                Some(record)
            }
            Err(saw_unsafe) => {
                if saw_unsafe {
                    self.worker.start(false);
                }
                None
            }
        }
    }

    /// Whether any parked record is already safe to reuse
    pub fn has_safe_records(&self) -> bool {
        self.bins.ready_slots().any(|slot| {
            self.bins
                .epoch
                .is_safe_to_reclaim(slot.added_epoch.load(Ordering::Relaxed))
        })
    }

    /// Records currently parked
    pub fn len(&self) -> usize {
        self.bins.ready_slots().count()
    }

    /// Whether no record is parked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parked records still waiting on an epoch bump, counting at most `max`
    pub fn scan_for_bump(&self, max: usize) -> usize {
        self.bins.scan_for_bump(max)
    }

    /// Stop the bump worker
    pub fn dispose(&self) {
        self.worker.dispose();
    }

    /// The pool's bump worker
    pub fn worker(&self) -> &BumpEpochWorker<FreeBins> {
        &self.worker
    }

    /// Reclamation counters
    pub fn stats(&self) -> &ReclaimStats {
        self.worker.stats()
    }
}

impl Drop for FreeRecordPool {
    fn drop(&mut self) {
        self.worker.dispose();
    }
}

impl std::fmt::Debug for FreeRecordPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeRecordPool")
            .field("len", &self.len())
            .field("worker", &self.worker)
            .finish()
    }
}
