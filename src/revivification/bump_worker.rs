//! Epoch bump worker
//!
//! Freed records become reusable only after the epoch they were freed in is safe to reclaim,
//! which requires someone to bump the epoch. Bumping forces every protected thread through
//! a synchronization point, so the worker batches requests: it bumps right away when many
//! records are waiting and backs off (up to one full interval) when few are.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::epoch::LightEpoch;
use crate::stats::ReclaimStats;

/// Default interval between bumps when few records are waiting
pub const DEFAULT_BUMP_INTERVAL: Duration = Duration::from_millis(1024);

/// Waiting-record count at which the worker bumps without sleeping
pub const DEFAULT_MAX_COUNT_FOR_BUMP: usize = 32;

/// Each step down in waiting count multiplies the wait by `1 << BUMP_SHIFT`
const BUMP_SHIFT: u32 = 2;

/// Source of records waiting for an epoch bump
pub trait BumpScan: Send + Sync + 'static {
    /// Count entries not yet safe to reuse, stopping at `max`.
    fn scan_for_bump(&self, max: usize) -> usize;
}

/// Worker ownership state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// No worker is bumping; the next add may claim the worker
    ScanOrQuiescent = 0,
    /// A worker is bumping or sleeping before its next bump
    BumpOrSleep = 1,
}

impl WorkerState {
    /// Get the state as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            WorkerState::ScanOrQuiescent => "ScanOrQuiescent",
            WorkerState::BumpOrSleep => "BumpOrSleep",
        }
    }
}

impl From<u8> for WorkerState {
    fn from(value: u8) -> Self {
        match value {
            0 => WorkerState::ScanOrQuiescent,
            _ => WorkerState::BumpOrSleep,
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Worker tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Longest wait between bumps
    pub bump_interval: Duration,
    /// Waiting-record count at which the worker bumps immediately
    pub max_count_for_bump: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bump_interval: DEFAULT_BUMP_INTERVAL,
            max_count_for_bump: DEFAULT_MAX_COUNT_FOR_BUMP,
        }
    }
}

impl WorkerConfig {
    /// Wait before the next bump when `count` records are waiting
    pub fn wait_for(&self, count: usize) -> Duration {
        let max = self.max_count_for_bump;
        let interval = self.bump_interval;
        if count >= max {
            Duration::ZERO
        } else if count > max / 2 {
            interval / (1 << (BUMP_SHIFT * 3))
        } else if count > max / 4 {
            interval / (1 << (BUMP_SHIFT * 2))
        } else if count > max / 8 {
            interval / (1 << BUMP_SHIFT)
        } else {
            interval
        }
    }
}

struct WorkerInner<S> {
    epoch: Arc<LightEpoch>,
    scanner: Arc<S>,
    config: WorkerConfig,
    state: AtomicU8,
    disposed: AtomicBool,
    live: AtomicUsize,
    bumping: AtomicUsize,
    stats: ReclaimStats,
}

impl<S: BumpScan> WorkerInner<S> {
    fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    fn claim(&self) -> bool {
        self.state
            .compare_exchange(
                WorkerState::ScanOrQuiescent as u8,
                WorkerState::BumpOrSleep as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn bump(&self) {
        let concurrent = self.bumping.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats.record_concurrent_bumps(concurrent);
        self.epoch.bump_current_epoch();
        self.bumping.fetch_sub(1, Ordering::AcqRel);
        self.stats.record_bump();
    }

    fn refresh_and_scan(&self) -> usize {
        let current = self.epoch.current_epoch();
        self.epoch.compute_new_safe_to_reclaim_epoch(current);
        self.scanner.scan_for_bump(self.config.max_count_for_bump)
    }

    fn run(&self, from_add: bool) {
        // A take pass never owns the state, so it must not release it.
        if !from_add {
            self.refresh_and_scan();
            return;
        }

        loop {
            // Looping back means we already slept, so bump again.
            self.bump();
            let started = Instant::now();

            self.state
                .store(WorkerState::ScanOrQuiescent as u8, Ordering::Release);
            let count = self.refresh_and_scan();

            if count == 0
                || self.disposed.load(Ordering::Acquire)
                || self.state() != WorkerState::ScanOrQuiescent
            {
                return;
            }

            let wait = self.config.wait_for(count).saturating_sub(started.elapsed());
            if !self.claim() {
                return;
            }
            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!(count, wait_ms = wait.as_millis() as u64, "records awaiting epoch bump");
            }
            if !wait.is_zero() {
                thread::sleep(wait);
            }
            if self.disposed.load(Ordering::Acquire) {
                return;
            }
        }
    }
}

/// Coalescing epoch bumper for a [`BumpScan`] source
pub struct BumpEpochWorker<S> {
    inner: Arc<WorkerInner<S>>,
}

impl<S: BumpScan> BumpEpochWorker<S> {
    /// Create an idle worker
    pub fn new(epoch: Arc<LightEpoch>, scanner: Arc<S>, config: WorkerConfig) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                epoch,
                scanner,
                config,
                state: AtomicU8::new(WorkerState::ScanOrQuiescent as u8),
                disposed: AtomicBool::new(false),
                live: AtomicUsize::new(0),
                bumping: AtomicUsize::new(0),
                stats: ReclaimStats::new(),
            }),
        }
    }

    /// Launch a worker pass.
    ///
    /// `from_add` passes (a record was just freed) launch only if they win ownership of the
    /// worker; others launch unconditionally to refresh which records are safe. Returns
    /// whether a thread was launched.
    pub fn start(&self, from_add: bool) -> bool {
        if self.inner.disposed.load(Ordering::Acquire) {
            return false;
        }
        if from_add
            && (self.inner.state() != WorkerState::ScanOrQuiescent || !self.inner.claim())
        {
            return false;
        }

        let inner = self.inner.clone();
        inner.live.fetch_add(1, Ordering::AcqRel);
        let spawned = thread::Builder::new()
            .name("oxitier-bump".to_string())
            .spawn(move || {
                inner.run(from_add);
                inner.live.fetch_sub(1, Ordering::AcqRel);
            });

        match spawned {
            Ok(_) => {
                self.inner.stats.record_launch();
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to launch epoch bump worker");
                self.inner.live.fetch_sub(1, Ordering::AcqRel);
                if from_add {
                    self.inner
                        .state
                        .store(WorkerState::ScanOrQuiescent as u8, Ordering::Release);
                }
                false
            }
        }
    }

    /// Stop launching passes; a running pass exits after its current iteration.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        self.inner
            .state
            .store(WorkerState::BumpOrSleep as u8, Ordering::Release);
    }

    /// Whether `dispose` was called
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Current ownership state
    pub fn state(&self) -> WorkerState {
        self.inner.state()
    }

    /// Worker threads still running
    pub fn live_workers(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Tuning in effect
    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Reclamation counters
    pub fn stats(&self) -> &ReclaimStats {
        &self.inner.stats
    }
}

impl<S> std::fmt::Debug for BumpEpochWorker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BumpEpochWorker")
            .field("state", &WorkerState::from(self.inner.state.load(Ordering::Acquire)))
            .field("disposed", &self.inner.disposed.load(Ordering::Acquire))
            .finish()
    }
}
