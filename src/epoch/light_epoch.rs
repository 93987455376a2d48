//! LightEpoch - Lightweight epoch-based memory reclamation
//!
//! Threads announce the epoch they observed in a per-thread slot. An epoch `e` is *safe to
//! reclaim* once every protected thread has observed an epoch greater than `e`. Deferred
//! actions registered with [`LightEpoch::bump_with_action`] run exactly once after the epoch
//! they were registered against becomes safe.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::constants::{CACHE_LINE_BYTES, MAX_THREADS};

// ============ Thread ID Allocation ============

/// Next never-used thread id
static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);

/// Ids released by threads that have exited
static FREE_THREAD_IDS: Mutex<Vec<usize>> = parking_lot::const_mutex(Vec::new());

struct ThreadIdSlot(usize);

impl ThreadIdSlot {
    fn acquire() -> Self {
        let recycled = FREE_THREAD_IDS.lock().pop();
        Self(recycled.unwrap_or_else(|| NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)))
    }
}

impl Drop for ThreadIdSlot {
    fn drop(&mut self) {
        FREE_THREAD_IDS.lock().push(self.0);
    }
}

thread_local! {
    /// Thread-local slot index, handed back to the free list on thread exit
    static THREAD_ID: ThreadIdSlot = ThreadIdSlot::acquire();
}

/// Get the current thread's slot index for epoch protection
///
/// The id is allocated on first call and stays constant for the thread's lifetime. Ids of
/// exited threads are reused, so the number of ids in use is bounded by the number of live
/// threads that ever touched an epoch.
///
/// # Panics
///
/// Debug builds panic in `protect`/`unprotect` if the id exceeds the epoch table size.
#[inline]
pub fn get_thread_id() -> usize {
    THREAD_ID.with(|slot| slot.0)
}

/// Special epoch value indicating the thread is not protected
pub const UNPROTECTED: u64 = 0;

/// Owner of a slot no thread has published yet
const NO_OWNER: usize = usize::MAX;

/// Default size of the drain list for deferred actions
pub const DEFAULT_DRAIN_LIST_SIZE: usize = 256;

/// Full passes over a congested drain list before logging and yielding
const DRAIN_LIST_RETRY_PASSES: u32 = 500;

/// Epoch table sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochConfig {
    /// Number of per-thread slots.
    pub table_size: usize,
    /// Number of deferred-action slots.
    pub drain_list_size: usize,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            table_size: MAX_THREADS,
            drain_list_size: DEFAULT_DRAIN_LIST_SIZE,
        }
    }
}

/// Entry in the epoch table (one per thread)
#[repr(C, align(64))]
struct Entry {
    /// Local epoch value seen by this thread
    local_current_epoch: AtomicU64,
    /// `get_thread_id()` of the thread that last published this slot
    owner: AtomicUsize,
    /// Reentrant protection counter
    reentrant: AtomicU32,
    /// Padding to fill cache line
    _padding: [u8; CACHE_LINE_BYTES - 20],
}

impl Entry {
    const fn new() -> Self {
        Self {
            local_current_epoch: AtomicU64::new(UNPROTECTED),
            owner: AtomicUsize::new(NO_OWNER),
            reentrant: AtomicU32::new(0),
            _padding: [0; CACHE_LINE_BYTES - 20],
        }
    }
}

type DeferredAction = Box<dyn FnOnce() + Send + 'static>;

/// Action to be performed when an epoch becomes safe to reclaim
struct EpochAction {
    /// The epoch this action waits for, or `FREE`/`LOCKED`
    epoch: AtomicU64,
    /// The callback to invoke
    callback: UnsafeCell<Option<DeferredAction>>,
}

impl EpochAction {
    /// Epoch value indicating this slot is free
    const FREE: u64 = u64::MAX;
    /// Epoch value indicating this slot is locked
    const LOCKED: u64 = u64::MAX - 1;

    const fn new() -> Self {
        Self {
            epoch: AtomicU64::new(Self::FREE),
            callback: UnsafeCell::new(None),
        }
    }

    /// Try to pop the action if the epoch has been reached
    fn try_pop(&self, expected_epoch: u64) -> bool {
        match self.epoch.compare_exchange(
            expected_epoch,
            Self::LOCKED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                // SAFETY: the LOCKED state gives this thread exclusive access to the cell.
                let callback = unsafe { (*self.callback.get()).take() };
                self.epoch.store(Self::FREE, Ordering::Release);
                if let Some(cb) = callback {
                    cb();
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Try to push a new action into a free slot
    ///
    /// Returns `Err(callback)` if the CAS failed, allowing the caller to retry.
    fn try_push(&self, trigger_epoch: u64, callback: DeferredAction) -> Result<(), DeferredAction> {
        match self.epoch.compare_exchange(
            Self::FREE,
            Self::LOCKED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                // SAFETY: the LOCKED state gives this thread exclusive access to the cell.
                unsafe {
                    *self.callback.get() = Some(callback);
                }
                self.epoch.store(trigger_epoch, Ordering::Release);
                Ok(())
            }
            Err(_) => Err(callback),
        }
    }

    /// Try to replace a ready action with a new one, running the ready action
    ///
    /// Returns `Err(callback)` if the CAS failed, allowing the caller to retry.
    fn try_swap(
        &self,
        expected_epoch: u64,
        trigger_epoch: u64,
        callback: DeferredAction,
    ) -> Result<(), DeferredAction> {
        match self.epoch.compare_exchange(
            expected_epoch,
            Self::LOCKED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                // SAFETY: the LOCKED state gives this thread exclusive access to the cell.
                let existing = unsafe { (*self.callback.get()).replace(callback) };
                self.epoch.store(trigger_epoch, Ordering::Release);
                if let Some(cb) = existing {
                    cb();
                }
                Ok(())
            }
            Err(_) => Err(callback),
        }
    }
}

// Safety: the callback cell is only touched by the thread holding the LOCKED state
unsafe impl Send for EpochAction {}
unsafe impl Sync for EpochAction {}

/// Lightweight epoch protection framework
///
/// One instance is shared (via `Arc`) by every component of a store; there is no process-wide
/// epoch, so independent stores in one process never observe each other's bumps.
pub struct LightEpoch {
    /// Per-thread epoch table
    table: Box<[Entry]>,
    /// List of deferred actions
    drain_list: Box<[EpochAction]>,
    /// Number of pending drain actions
    drain_count: AtomicU32,
    /// Current global epoch
    current_epoch: AtomicU64,
    /// Cached safe-to-reclaim epoch
    safe_to_reclaim_epoch: AtomicU64,
}

impl LightEpoch {
    /// Create a new LightEpoch instance with the default table sizes
    pub fn new() -> Self {
        Self::with_config(EpochConfig::default())
    }

    /// Create a new LightEpoch instance
    pub fn with_config(config: EpochConfig) -> Self {
        let table: Vec<Entry> = (0..config.table_size.max(1)).map(|_| Entry::new()).collect();
        let drain_list: Vec<EpochAction> = (0..config.drain_list_size.max(1))
            .map(|_| EpochAction::new())
            .collect();

        Self {
            table: table.into_boxed_slice(),
            drain_list: drain_list.into_boxed_slice(),
            drain_count: AtomicU32::new(0),
            current_epoch: AtomicU64::new(1),
            safe_to_reclaim_epoch: AtomicU64::new(0),
        }
    }

    /// Number of per-thread slots
    pub fn table_size(&self) -> usize {
        self.table.len()
    }

    /// Current global epoch
    #[inline]
    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Acquire)
    }

    /// Last computed safe-to-reclaim epoch
    #[inline]
    pub fn safe_to_reclaim_epoch(&self) -> u64 {
        self.safe_to_reclaim_epoch.load(Ordering::Acquire)
    }

    /// Number of deferred actions that have not run yet
    #[inline]
    pub fn pending_actions(&self) -> u32 {
        self.drain_count.load(Ordering::Acquire)
    }

    /// Publish the current epoch into the thread's slot.
    ///
    /// Re-reads the global epoch after publishing so a concurrent bump + scan can never miss
    /// this thread while it still holds the older epoch.
    #[inline]
    fn publish(&self, thread_id: usize) -> u64 {
        let entry = &self.table[thread_id];
        // Ordered before the epoch store, which releases it.
        entry.owner.store(get_thread_id(), Ordering::Relaxed);
        let slot = &entry.local_current_epoch;
        let mut epoch = self.current_epoch.load(Ordering::SeqCst);
        loop {
            slot.store(epoch, Ordering::SeqCst);
            let now = self.current_epoch.load(Ordering::SeqCst);
            if now == epoch {
                return epoch;
            }
            epoch = now;
        }
    }

    /// Enter the protected region
    ///
    /// Returns the observed epoch. Calling it again while protected simply re-observes the
    /// current epoch. The thread should call `unprotect()` when done accessing shared data.
    #[inline]
    pub fn protect(&self, thread_id: usize) -> u64 {
        debug_assert!(thread_id < self.table.len());
        self.publish(thread_id)
    }

    /// Alias of [`protect`](Self::protect)
    #[inline]
    pub fn enter(&self, thread_id: usize) -> u64 {
        self.protect(thread_id)
    }

    /// Enter the protected region and drain pending actions
    #[inline]
    pub fn protect_and_drain(&self, thread_id: usize) -> u64 {
        let epoch = self.protect(thread_id);
        if self.drain_count.load(Ordering::Acquire) > 0 {
            self.drain(epoch);
        }
        epoch
    }

    /// Re-observe the global epoch and run every deferred action that became safe.
    ///
    /// Long-lived protected threads must call this periodically; a protected thread that
    /// never refreshes stalls reclamation for every other thread.
    #[inline]
    pub fn refresh(&self, thread_id: usize) -> u64 {
        debug_assert!(self.is_protected(thread_id), "refresh requires protection");
        self.protect_and_drain(thread_id)
    }

    /// Refresh the slot at `get_thread_id()` if this thread protected it.
    ///
    /// A slot that another thread protected under the same index is left alone. Returns the
    /// observed epoch, or `None` when the calling thread holds no such slot.
    pub fn refresh_current_thread(&self) -> Option<u64> {
        let caller = get_thread_id();
        let entry = self.table.get(caller)?;
        if entry.local_current_epoch.load(Ordering::Acquire) == UNPROTECTED
            || entry.owner.load(Ordering::Relaxed) != caller
        {
            return None;
        }
        Some(self.protect_and_drain(caller))
    }

    /// Reentrant protection - supports nested protection calls
    #[inline]
    pub fn reentrant_protect(&self, thread_id: usize) -> u64 {
        debug_assert!(thread_id < self.table.len());
        let entry = &self.table[thread_id];

        let current_count = entry.reentrant.fetch_add(1, Ordering::AcqRel);
        if current_count == 0 {
            self.publish(thread_id)
        } else {
            entry.local_current_epoch.load(Ordering::Acquire)
        }
    }

    /// Check if the thread is currently protected
    #[inline]
    pub fn is_protected(&self, thread_id: usize) -> bool {
        debug_assert!(thread_id < self.table.len());
        self.table[thread_id]
            .local_current_epoch
            .load(Ordering::Acquire)
            != UNPROTECTED
    }

    /// Exit the protected region
    #[inline]
    pub fn unprotect(&self, thread_id: usize) {
        debug_assert!(thread_id < self.table.len());
        self.table[thread_id]
            .local_current_epoch
            .store(UNPROTECTED, Ordering::SeqCst);
    }

    /// Alias of [`unprotect`](Self::unprotect)
    #[inline]
    pub fn exit(&self, thread_id: usize) {
        self.unprotect(thread_id)
    }

    /// Exit reentrant protection
    #[inline]
    pub fn reentrant_unprotect(&self, thread_id: usize) {
        debug_assert!(thread_id < self.table.len());
        let entry = &self.table[thread_id];

        if entry.reentrant.fetch_sub(1, Ordering::AcqRel) == 1 {
            entry
                .local_current_epoch
                .store(UNPROTECTED, Ordering::SeqCst);
        }
    }

    /// Drain pending actions that are now safe to execute
    fn drain(&self, next_epoch: u64) {
        let safe_epoch = self.compute_new_safe_to_reclaim_epoch(next_epoch);

        for action in self.drain_list.iter() {
            let trigger_epoch = action.epoch.load(Ordering::Acquire);
            if trigger_epoch <= safe_epoch
                && trigger_epoch != EpochAction::FREE
                && trigger_epoch != EpochAction::LOCKED
                && action.try_pop(trigger_epoch)
                && self.drain_count.fetch_sub(1, Ordering::AcqRel) == 1
            {
                break;
            }
        }
    }

    /// Increment the current epoch
    ///
    /// Concurrent bumps never lose an increment; each caller gets its own new epoch.
    pub fn bump_current_epoch(&self) -> u64 {
        let next_epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if self.drain_count.load(Ordering::Acquire) > 0 {
            self.drain(next_epoch);
        }
        next_epoch
    }

    /// Alias of [`bump_current_epoch`](Self::bump_current_epoch)
    #[inline]
    pub fn bump(&self) -> u64 {
        self.bump_current_epoch()
    }

    /// Increment the epoch and run `callback` once every protected thread has observed the
    /// new epoch.
    ///
    /// With no protected thread the callback runs before this call returns. Returns the new
    /// epoch.
    pub fn bump_with_action<F>(&self, callback: F) -> u64
    where
        F: FnOnce() + Send + 'static,
    {
        let new_epoch = self.bump_current_epoch();
        let trigger_epoch = new_epoch - 1;

        let mut callback: DeferredAction = Box::new(callback);
        let mut i = 0;
        let mut passes = 0u32;
        loop {
            let slot = &self.drain_list[i];
            let slot_epoch = slot.epoch.load(Ordering::Acquire);

            if slot_epoch == EpochAction::FREE {
                match slot.try_push(trigger_epoch, callback) {
                    Ok(()) => {
                        self.drain_count.fetch_add(1, Ordering::AcqRel);
                        break;
                    }
                    Err(returned) => callback = returned,
                }
            } else if slot_epoch != EpochAction::LOCKED
                && slot_epoch <= self.safe_to_reclaim_epoch.load(Ordering::Acquire)
            {
                match slot.try_swap(slot_epoch, trigger_epoch, callback) {
                    Ok(()) => break,
                    Err(returned) => callback = returned,
                }
            }

            i = (i + 1) % self.drain_list.len();
            if i == 0 {
                // A protected caller would otherwise hold back its own slot.
                self.refresh_current_thread();
                self.drain(self.current_epoch());
                passes += 1;
                if passes % DRAIN_LIST_RETRY_PASSES == 0 {
                    tracing::warn!(
                        pending = self.pending_actions(),
                        "epoch drain list is full; waiting for protected threads to refresh"
                    );
                    thread::sleep(Duration::from_millis(1));
                } else {
                    thread::yield_now();
                }
            }
        }

        self.drain(self.current_epoch());
        new_epoch
    }

    /// Spin, refreshing the calling thread, until no deferred action is pending.
    ///
    /// The calling thread may be protected or not; if protected it keeps re-observing the
    /// global epoch so its own slot never holds back the drain.
    pub fn drain_blocking(&self, thread_id: usize) {
        while self.drain_count.load(Ordering::Acquire) > 0 {
            self.spin_once(thread_id);
        }
    }

    /// Spin, refreshing the calling thread, until `target` is safe to reclaim.
    pub fn drain_until(&self, thread_id: usize, target: u64) {
        loop {
            self.spin_once(thread_id);
            if self.is_safe_to_reclaim(target) {
                break;
            }
        }
    }

    fn spin_once(&self, thread_id: usize) {
        if self.is_protected(thread_id) {
            self.protect(thread_id);
        }
        self.drain(self.current_epoch());
        thread::yield_now();
    }

    /// Compute the new safe-to-reclaim epoch by scanning all threads
    ///
    /// The cached value only ever moves forward.
    pub fn compute_new_safe_to_reclaim_epoch(&self, current_epoch: u64) -> u64 {
        let mut oldest_ongoing = current_epoch;

        for entry in self.table.iter() {
            let entry_epoch = entry.local_current_epoch.load(Ordering::SeqCst);
            if entry_epoch != UNPROTECTED && entry_epoch < oldest_ongoing {
                oldest_ongoing = entry_epoch;
            }
        }

        let safe = oldest_ongoing.saturating_sub(1);
        let prev = self.safe_to_reclaim_epoch.fetch_max(safe, Ordering::AcqRel);
        prev.max(safe)
    }

    /// Check if an epoch is safe to reclaim
    #[inline]
    pub fn is_safe_to_reclaim(&self, epoch: u64) -> bool {
        epoch <= self.safe_to_reclaim_epoch.load(Ordering::Acquire)
    }

    /// Protect the calling thread for the lifetime of the returned guard
    pub fn guard(&self) -> EpochGuard<'_> {
        EpochGuard::new(self, get_thread_id())
    }
}

impl Default for LightEpoch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LightEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightEpoch")
            .field("current_epoch", &self.current_epoch())
            .field("safe_to_reclaim_epoch", &self.safe_to_reclaim_epoch())
            .field("pending_actions", &self.pending_actions())
            .finish()
    }
}

/// RAII guard for epoch protection
pub struct EpochGuard<'a> {
    epoch: &'a LightEpoch,
    thread_id: usize,
}

impl<'a> EpochGuard<'a> {
    /// Create a new epoch guard
    pub fn new(epoch: &'a LightEpoch, thread_id: usize) -> Self {
        epoch.protect(thread_id);
        Self { epoch, thread_id }
    }

    /// Get the thread ID
    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// Refresh the guarded thread
    pub fn refresh(&self) -> u64 {
        self.epoch.refresh(self.thread_id)
    }
}

impl Drop for EpochGuard<'_> {
    fn drop(&mut self) {
        self.epoch.unprotect(self.thread_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_basic_protection() {
        let epoch = LightEpoch::new();

        assert!(!epoch.is_protected(0));

        let e = epoch.protect(0);
        assert!(epoch.is_protected(0));
        assert_eq!(e, 1);

        epoch.unprotect(0);
        assert!(!epoch.is_protected(0));
    }

    #[test]
    fn test_enter_is_idempotent() {
        let epoch = LightEpoch::new();
        assert_eq!(epoch.enter(3), 1);
        epoch.bump();
        assert_eq!(epoch.enter(3), 2);
        assert!(epoch.is_protected(3));
        epoch.exit(3);
        assert!(!epoch.is_protected(3));
    }

    #[test]
    fn test_bump_epoch() {
        let epoch = LightEpoch::new();

        assert_eq!(epoch.current_epoch(), 1);

        let new_epoch = epoch.bump_current_epoch();
        assert_eq!(new_epoch, 2);
        assert_eq!(epoch.current_epoch(), 2);
    }

    #[test]
    fn test_safe_to_reclaim() {
        let epoch = LightEpoch::new();

        // No threads protected - everything before the current epoch is safe
        epoch.compute_new_safe_to_reclaim_epoch(10);
        assert!(epoch.is_safe_to_reclaim(9));

        for _ in 0..4 {
            epoch.bump();
        }
        assert_eq!(epoch.current_epoch(), 5);
        epoch.protect(0);

        // Cached value never moves backwards
        epoch.compute_new_safe_to_reclaim_epoch(10);
        assert!(epoch.is_safe_to_reclaim(9));

        let fresh = LightEpoch::new();
        for _ in 0..4 {
            fresh.bump();
        }
        fresh.protect(0);
        fresh.compute_new_safe_to_reclaim_epoch(10);
        assert!(fresh.is_safe_to_reclaim(4));
        assert!(!fresh.is_safe_to_reclaim(5));

        fresh.unprotect(0);
        epoch.unprotect(0);
    }

    #[test]
    fn test_action_runs_immediately_without_protected_threads() {
        let epoch = LightEpoch::new();
        let executed = Arc::new(AtomicBool::new(false));

        let executed_clone = executed.clone();
        let new_epoch = epoch.bump_with_action(move || {
            executed_clone.store(true, Ordering::Release);
        });

        assert_eq!(new_epoch, 2);
        assert!(executed.load(Ordering::Acquire));
        assert_eq!(epoch.pending_actions(), 0);
    }

    #[test]
    fn test_action_waits_for_protected_thread() {
        let epoch = LightEpoch::new();
        let executed = Arc::new(AtomicBool::new(false));

        epoch.protect(0);
        let executed_clone = executed.clone();
        epoch.bump_with_action(move || {
            executed_clone.store(true, Ordering::Release);
        });

        assert!(!executed.load(Ordering::Acquire));
        assert_eq!(epoch.pending_actions(), 1);

        // Thread 0 observes the new epoch; the action may now run.
        epoch.refresh(0);
        assert!(executed.load(Ordering::Acquire));
        epoch.unprotect(0);
    }

    #[test]
    fn test_drain_blocking_with_own_protection() {
        let epoch = LightEpoch::new();
        let executed = Arc::new(AtomicBool::new(false));

        epoch.protect(1);
        let executed_clone = executed.clone();
        epoch.bump_with_action(move || {
            executed_clone.store(true, Ordering::Release);
        });
        epoch.drain_blocking(1);
        assert!(executed.load(Ordering::Acquire));
        epoch.unprotect(1);
    }

    #[test]
    fn test_full_drain_list_defers_instead_of_running_early() {
        let epoch = Arc::new(LightEpoch::with_config(EpochConfig {
            table_size: MAX_THREADS,
            drain_list_size: 2,
        }));
        let runs = Arc::new(AtomicU32::new(0));
        // A slot no live thread owns, so the pusher cannot refresh it.
        let slot = MAX_THREADS - 1;

        epoch.protect(slot);
        for _ in 0..2 {
            let runs = runs.clone();
            epoch.bump_with_action(move || {
                runs.fetch_add(1, Ordering::AcqRel);
            });
        }
        assert_eq!(runs.load(Ordering::Acquire), 0);

        // A third action cannot find a slot until thread 0 refreshes.
        let pusher = {
            let epoch = epoch.clone();
            let runs = runs.clone();
            thread::spawn(move || {
                epoch.bump_with_action(move || {
                    runs.fetch_add(1, Ordering::AcqRel);
                });
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(runs.load(Ordering::Acquire), 0);

        epoch.unprotect(slot);
        pusher.join().unwrap();
        epoch.drain_blocking(slot);
        assert_eq!(runs.load(Ordering::Acquire), 3);
    }

    #[test]
    fn test_epoch_guard() {
        let epoch = LightEpoch::new();

        {
            let _guard = EpochGuard::new(&epoch, 0);
            assert!(epoch.is_protected(0));
        }

        assert!(!epoch.is_protected(0));
    }

    #[test]
    fn test_reentrant_protection() {
        let epoch = LightEpoch::new();

        epoch.reentrant_protect(0);
        epoch.reentrant_protect(0);
        assert!(epoch.is_protected(0));

        epoch.reentrant_unprotect(0);
        assert!(epoch.is_protected(0));
        epoch.reentrant_unprotect(0);
        assert!(!epoch.is_protected(0));
    }

    #[test]
    fn test_thread_ids_are_distinct_among_live_threads() {
        let barrier = Arc::new(std::sync::Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let id = get_thread_id();
                    barrier.wait();
                    id
                })
            })
            .collect();
        let mut ids: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_refresh_current_thread_skips_foreign_slot() {
        let epoch = Arc::new(LightEpoch::new());
        let mine = get_thread_id();
        assert_eq!(epoch.refresh_current_thread(), None);

        // Another thread protects the slot index this thread would use implicitly.
        let (ready_tx, ready_rx) = crossbeam::channel::bounded::<u64>(0);
        let (leave_tx, leave_rx) = crossbeam::channel::bounded::<()>(0);
        let other = {
            let epoch = epoch.clone();
            thread::spawn(move || {
                ready_tx.send(epoch.protect(mine)).unwrap();
                leave_rx.recv().unwrap();
                epoch.unprotect(mine);
            })
        };
        let held = ready_rx.recv().unwrap();

        epoch.bump();
        assert_eq!(epoch.refresh_current_thread(), None);
        assert_eq!(epoch.compute_new_safe_to_reclaim_epoch(epoch.current_epoch()), held - 1);

        leave_tx.send(()).unwrap();
        other.join().unwrap();

        epoch.protect(mine);
        assert_eq!(epoch.refresh_current_thread(), Some(epoch.current_epoch()));
        epoch.unprotect(mine);
    }

    #[test]
    fn test_congested_bump_never_advances_foreign_slot() {
        let epoch = Arc::new(LightEpoch::with_config(EpochConfig {
            drain_list_size: 1,
            ..EpochConfig::default()
        }));
        let mine = get_thread_id();
        let first_ran = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = crossbeam::channel::bounded::<()>(0);
        let other = {
            let (epoch, first_ran) = (epoch.clone(), first_ran.clone());
            thread::spawn(move || {
                epoch.protect(mine);
                ready_tx.send(()).unwrap();
                // Hold the slot while the second bump waits for the drain list.
                thread::sleep(Duration::from_millis(50));
                let ran_while_held = first_ran.load(Ordering::SeqCst);
                epoch.unprotect(mine);
                ran_while_held
            })
        };
        ready_rx.recv().unwrap();

        let flag = first_ran.clone();
        epoch.bump_with_action(move || flag.store(true, Ordering::SeqCst));
        epoch.bump_with_action(|| {});

        assert!(!other.join().unwrap(), "action ran while its epoch was still held");
        epoch.drain_blocking(mine);
        assert!(first_ran.load(Ordering::SeqCst));
        assert_eq!(epoch.pending_actions(), 0);
    }
}
