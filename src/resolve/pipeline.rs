//! Record resolution pipeline

use std::io;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::address::{Address, AtomicAddress};
use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::codec::{KeyCodec, PersistKey, PersistValue, ValueCodec};
use crate::device::StorageDevice;
use crate::epoch::LightEpoch;
use crate::record::{ObjectAddress, RecordInfo, RecordParse, RecordView};
use crate::resolve::outcome::{Completion, CompletionSink, ReadOutcome, ReadPhase};
use crate::resolve::trampoline;
use crate::stats::PipelineStats;
use crate::status::Status;

/// Default cap on reads in flight
pub const DEFAULT_MAX_OUTSTANDING_READS: usize = 120;

/// Default size of the first read of a record
pub const DEFAULT_READ_SIZE_HINT: usize = 512;

/// Pipeline tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Reads allowed in flight at once
    pub max_outstanding_reads: usize,
    /// Bytes fetched by the first read of a record (rounded up to the sector size)
    pub read_size_hint: usize,
    /// Idle buffers kept per size class
    pub buffers_per_class: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_outstanding_reads: DEFAULT_MAX_OUTSTANDING_READS,
            read_size_hint: DEFAULT_READ_SIZE_HINT,
            buffers_per_class: 64,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the in-flight read cap
    pub fn with_max_outstanding_reads(mut self, max: usize) -> Self {
        self.max_outstanding_reads = max;
        self
    }

    /// Set the first-read size
    pub fn with_read_size_hint(mut self, hint: usize) -> Self {
        self.read_size_hint = hint;
        self
    }
}

fn segment_bits_of(device: &dyn StorageDevice) -> Result<u32, Status> {
    let size = device.segment_size();
    if !size.is_power_of_two() {
        return Err(Status::InvalidArgument);
    }
    Ok(size.trailing_zeros())
}

struct ObjectLog {
    device: Arc<dyn StorageDevice>,
    segment_bits: u32,
}

struct Shared {
    epoch: Arc<LightEpoch>,
    device: Arc<dyn StorageDevice>,
    segment_bits: u32,
    object_log: Option<ObjectLog>,
    pool: BufferPool,
    config: PipelineConfig,
    outstanding: AtomicUsize,
    begin_address: AtomicAddress,
    stats: PipelineStats,
}

impl Shared {
    /// Take an in-flight slot, spinning while the pipeline is full.
    fn admit(&self) {
        let max = self.config.max_outstanding_reads;
        let mut waited = false;
        loop {
            let current = self.outstanding.load(Ordering::Acquire);
            if current < max {
                if self
                    .outstanding
                    .compare_exchange_weak(
                        current,
                        current + 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            if !waited {
                self.stats.record_admission_wait();
                waited = true;
            }
            self.epoch.refresh_current_thread();
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    fn release(&self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

enum Delivery<K, V> {
    Sink(CompletionSink<K, V>),
    Oneshot(oneshot::Sender<Completion<K, V>>),
}

/// What to do after examining a completed read
enum Step<V> {
    Deliver(ReadOutcome<V>),
    Reread(usize),
    Hop(Address),
    FetchObject {
        info: RecordInfo,
        object: ObjectAddress,
        key_len: usize,
        value_len: usize,
    },
}

/// One key being resolved
struct PendingRead<K, V> {
    shared: Arc<Shared>,
    key: K,
    ctx_id: u64,
    /// Record currently being read
    address: Address,
    hops: u32,
    reread: bool,
    admitted: bool,
    phase: ReadPhase,
    delivery: Delivery<K, V>,
}

impl<K: PersistKey, V: PersistValue> PendingRead<K, V> {
    fn issue_primary(mut self, len: usize) {
        let shared = self.shared.clone();
        if !self.admitted {
            shared.admit();
            self.admitted = true;
        }
        if self.phase == ReadPhase::Issued {
            self.phase = ReadPhase::AwaitingPrimary;
        }

        let segment = self.address.segment(shared.segment_bits);
        let offset = self.address.segment_offset(shared.segment_bits);
        let buf = shared.pool.get(shared.pool.round_up(len));
        shared.stats.record_read();

        shared.device.read_async(
            segment,
            offset,
            buf,
            Box::new(move |buf, result| {
                trampoline::run(Box::new(move || self.on_primary(buf, result)));
            }),
        );
    }

    fn on_primary(self, buf: PooledBuffer, result: io::Result<usize>) {
        let step = match result {
            Ok(_) => self.examine_primary(&buf),
            Err(err) => {
                tracing::warn!(
                    ctx_id = self.ctx_id,
                    address = %self.address,
                    error = %err,
                    "record read failed"
                );
                Step::Deliver(ReadOutcome::Failed(Status::from(&err)))
            }
        };
        drop(buf);
        self.proceed(step);
    }

    fn examine_primary(&self, buf: &PooledBuffer) -> Step<V> {
        let view = match RecordView::parse(buf.filled()) {
            Ok(RecordParse::Complete(view)) => view,
            Ok(RecordParse::Incomplete { required }) if !self.reread => {
                return Step::Reread(required);
            }
            Ok(RecordParse::Incomplete { required }) => {
                tracing::warn!(
                    ctx_id = self.ctx_id,
                    address = %self.address,
                    required,
                    read = buf.filled().len(),
                    "record still incomplete after reread"
                );
                return Step::Deliver(ReadOutcome::Failed(Status::Corruption));
            }
            Err(status) => return Step::Deliver(ReadOutcome::Failed(status)),
        };

        let info = view.info();
        if info.is_invalid() {
            return Step::Hop(info.previous_address());
        }

        match view.object_address() {
            Err(status) => Step::Deliver(ReadOutcome::Failed(status)),
            Ok(Some(object)) => Step::FetchObject {
                info,
                object,
                key_len: view.key_len(),
                value_len: view.value_len(),
            },
            Ok(None) => match (view.inline_key(), view.inline_value()) {
                (Some(key), Some(value)) => self.match_record(info, key, value),
                _ => Step::Deliver(ReadOutcome::Failed(Status::Corruption)),
            },
        }
    }

    fn match_record(&self, info: RecordInfo, key: &[u8], value: &[u8]) -> Step<V> {
        match K::Codec::equals_encoded(key, &self.key) {
            Err(status) => Step::Deliver(ReadOutcome::Failed(status)),
            Ok(false) => Step::Hop(info.previous_address()),
            Ok(true) if info.is_tombstone() => Step::Deliver(ReadOutcome::Tombstone {
                address: self.address,
            }),
            Ok(true) => match V::Codec::decode(value) {
                Ok(value) => Step::Deliver(ReadOutcome::Found {
                    value,
                    address: self.address,
                }),
                Err(status) => Step::Deliver(ReadOutcome::Failed(status)),
            },
        }
    }

    fn proceed(mut self, step: Step<V>) {
        match step {
            Step::Deliver(outcome) => self.deliver(outcome),
            Step::Reread(required) => {
                self.reread = true;
                self.shared.stats.record_short_read();
                self.issue_primary(required);
            }
            Step::Hop(previous) => self.hop(previous),
            Step::FetchObject {
                info,
                object,
                key_len,
                value_len,
            } => self.fetch_object(info, object, key_len, value_len),
        }
    }

    fn fetch_object(
        mut self,
        info: RecordInfo,
        object: ObjectAddress,
        key_len: usize,
        value_len: usize,
    ) {
        let shared = self.shared.clone();
        let Some(log) = shared.object_log.as_ref() else {
            tracing::warn!(
                ctx_id = self.ctx_id,
                address = %self.address,
                "record has objects but no object log is attached"
            );
            return self.deliver(ReadOutcome::Failed(Status::InvalidOperation));
        };
        let Ok(size) = usize::try_from(object.size) else {
            return self.deliver(ReadOutcome::Failed(Status::ResourceExhausted));
        };

        self.phase = ReadPhase::ResolvingObjectPayload;
        let segment = object.address.segment(log.segment_bits);
        let offset = object.address.segment_offset(log.segment_bits);
        shared.stats.record_object_read();

        log.device.read_async(
            segment,
            offset,
            shared.pool.get(size),
            Box::new(move |buf, result| {
                trampoline::run(Box::new(move || {
                    self.on_object(buf, result, info, key_len, value_len)
                }));
            }),
        );
    }

    fn on_object(
        self,
        buf: PooledBuffer,
        result: io::Result<usize>,
        info: RecordInfo,
        key_len: usize,
        value_len: usize,
    ) {
        let step = match result {
            Err(err) => {
                tracing::warn!(
                    ctx_id = self.ctx_id,
                    address = %self.address,
                    error = %err,
                    "object read failed"
                );
                Step::Deliver(ReadOutcome::Failed(Status::from(&err)))
            }
            Ok(_) => {
                let payload = buf.filled();
                if payload.len() < key_len + value_len {
                    Step::Deliver(ReadOutcome::Failed(Status::Corruption))
                } else {
                    let (key, rest) = payload.split_at(key_len);
                    self.match_record(info, key, &rest[..value_len])
                }
            }
        };
        drop(buf);
        self.proceed(step);
    }

    fn hop(mut self, previous: Address) {
        let begin = self.shared.begin_address.load(Ordering::Acquire);
        if previous.is_invalid() || previous < begin {
            return self.deliver(ReadOutcome::NotFound);
        }
        if previous >= self.address {
            tracing::warn!(
                ctx_id = self.ctx_id,
                address = %self.address,
                previous = %previous,
                "hash chain does not move toward older records"
            );
            return self.deliver(ReadOutcome::Failed(Status::Corruption));
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(ctx_id = self.ctx_id, from = %self.address, to = %previous, "chain hop");
        }
        self.shared.stats.record_hop();
        self.address = previous;
        self.hops += 1;
        self.reread = false;
        self.phase = ReadPhase::ChainWalk;
        let hint = self.shared.config.read_size_hint;
        self.issue_primary(hint);
    }

    fn deliver(mut self, outcome: ReadOutcome<V>) {
        if self.admitted {
            self.shared.release();
        }
        match &outcome {
            ReadOutcome::Found { .. } | ReadOutcome::Tombstone { .. } => {
                self.shared.stats.record_found()
            }
            ReadOutcome::NotFound => self.shared.stats.record_not_found(),
            ReadOutcome::Failed(_) => self.shared.stats.record_failed(),
        }
        self.phase = if matches!(outcome, ReadOutcome::NotFound) {
            ReadPhase::Exhausted
        } else {
            ReadPhase::Delivered
        };

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                ctx_id = self.ctx_id,
                address = %self.address,
                hops = self.hops,
                phase = %self.phase,
                status = %outcome.status(),
                "read resolved"
            );
        }

        let completion = Completion {
            ctx_id: self.ctx_id,
            key: self.key,
            outcome,
            hops: self.hops,
        };
        let delivered = match self.delivery {
            Delivery::Sink(sink) => sink.send(completion).is_ok(),
            Delivery::Oneshot(tx) => tx.send(completion).is_ok(),
        };
        if !delivered {
            tracing::debug!(ctx_id = self.ctx_id, "completion receiver dropped");
        }
    }
}

/// Resolves keys by walking hash chains on a device
///
/// Each request starts at the newest address the index holds for the key and follows
/// previous-address links toward older records until it finds a record whose key matches,
/// or the chain ends. Every request is delivered exactly once.
pub struct ResolutionPipeline<K, V> {
    shared: Arc<Shared>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: PersistKey, V: PersistValue> ResolutionPipeline<K, V> {
    /// Create a pipeline reading records from `device` and object payloads from
    /// `object_device`.
    ///
    /// Fails with `InvalidArgument` if a device's segment size is not a power of two.
    pub fn new(
        epoch: Arc<LightEpoch>,
        device: Arc<dyn StorageDevice>,
        object_device: Option<Arc<dyn StorageDevice>>,
        config: PipelineConfig,
    ) -> Result<Self, Status> {
        let segment_bits = segment_bits_of(device.as_ref())?;
        let object_log = match object_device {
            Some(device) => Some(ObjectLog {
                segment_bits: segment_bits_of(device.as_ref())?,
                device,
            }),
            None => None,
        };
        let config = PipelineConfig {
            max_outstanding_reads: config.max_outstanding_reads.max(1),
            ..config
        };
        let pool = BufferPool::new(device.sector_size(), config.buffers_per_class);

        Ok(Self {
            shared: Arc::new(Shared {
                epoch,
                device,
                segment_bits,
                object_log,
                pool,
                config,
                outstanding: AtomicUsize::new(0),
                begin_address: AtomicAddress::new(Address::from_control(0)),
                stats: PipelineStats::new(),
            }),
            _marker: PhantomData,
        })
    }

    /// Resolve `key` starting at `start`, delivering to `sink` tagged with `ctx_id`.
    ///
    /// Blocks while `max_outstanding_reads` reads are in flight. The completion may be sent
    /// before this call returns.
    pub fn resolve_with(&self, key: K, start: Address, ctx_id: u64, sink: CompletionSink<K, V>) {
        self.start(key, start, ctx_id, Delivery::Sink(sink));
    }

    /// Resolve `key` starting at `start`.
    pub async fn resolve(&self, key: K, start: Address) -> ReadOutcome<V> {
        let (tx, rx) = oneshot::channel();
        self.start(key, start, 0, Delivery::Oneshot(tx));
        match rx.await {
            Ok(completion) => completion.outcome,
            Err(_) => ReadOutcome::Failed(Status::Aborted),
        }
    }

    fn start(&self, key: K, start: Address, ctx_id: u64, delivery: Delivery<K, V>) {
        let read = PendingRead {
            shared: self.shared.clone(),
            key,
            ctx_id,
            address: start,
            hops: 0,
            reread: false,
            admitted: false,
            phase: ReadPhase::Issued,
            delivery,
        };

        if start.is_invalid() || start < self.begin_address() {
            read.deliver(ReadOutcome::NotFound);
            return;
        }
        let hint = self.shared.config.read_size_hint;
        trampoline::run(Box::new(move || read.issue_primary(hint)));
    }

    /// Records below this address are treated as truncated
    pub fn begin_address(&self) -> Address {
        self.shared.begin_address.load(Ordering::Acquire)
    }

    /// Set the lowest address chain walks may visit
    pub fn set_begin_address(&self, address: Address) {
        self.shared.begin_address.store(address, Ordering::Release);
    }

    /// Reads currently in flight
    pub fn outstanding_reads(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Pipeline counters
    pub fn stats(&self) -> &PipelineStats {
        &self.shared.stats
    }

    /// Effective configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }
}

impl<K, V> Clone for ResolutionPipeline<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _marker: PhantomData,
        }
    }
}
