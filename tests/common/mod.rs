//! Shared test utilities: log builders and device wrappers for fault injection and delayed
//! completion.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use oxitier::address::Address;
use oxitier::buffer_pool::PooledBuffer;
use oxitier::codec::encode_key;
use oxitier::device::{
    Capacity, DeleteCallback, IoCallback, MemoryDevice, ReadCallback, StorageDevice,
    SyncStorageDevice,
};
use oxitier::record::{encode_inline_record, RecordInfo};

pub const SEGMENT_BITS: u32 = 12;
pub const SEGMENT_SIZE: u64 = 1 << SEGMENT_BITS;

/// Write `bytes` at a log address.
pub fn write_at(device: &dyn SyncStorageDevice, address: Address, bytes: &[u8]) {
    device
        .write_sync(
            address.segment(SEGMENT_BITS),
            address.segment_offset(SEGMENT_BITS),
            bytes,
        )
        .unwrap();
}

/// Builds a hash chain of inline `u64 -> u64` records, oldest first.
pub struct ChainBuilder {
    next: u64,
    head: Address,
    addresses: Vec<Address>,
}

impl ChainBuilder {
    pub fn new(first: u64) -> Self {
        Self {
            next: first,
            head: Address::INVALID,
            addresses: Vec::new(),
        }
    }

    /// Append a record linking to the previous head.
    pub fn push(&mut self, device: &dyn SyncStorageDevice, key: u64, value: u64) -> Address {
        self.push_with(device, RecordInfo::new(self.head), key, value)
    }

    /// Append a record with an explicit header; it still links to the previous head.
    pub fn push_with(
        &mut self,
        device: &dyn SyncStorageDevice,
        info: RecordInfo,
        key: u64,
        value: u64,
    ) -> Address {
        let bytes = encode_inline_record(info, &encode_key(&key).unwrap(), &value.to_le_bytes());
        // Keep every record inside one segment.
        let offset = self.next % SEGMENT_SIZE;
        if offset + bytes.len() as u64 > SEGMENT_SIZE {
            self.next += SEGMENT_SIZE - offset;
        }
        let address = Address::from_control(self.next);
        write_at(device, address, &bytes);
        self.next += (bytes.len() as u64).next_multiple_of(8);
        self.head = address;
        self.addresses.push(address);
        address
    }

    pub fn head(&self) -> Address {
        self.head
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }
}

pub fn memory_device(name: &str) -> Arc<MemoryDevice> {
    Arc::new(MemoryDevice::new(name, SEGMENT_SIZE, Capacity::Unspecified))
}

/// A fault-injection wrapper around any `SyncStorageDevice`.
///
/// Allows deterministic injection of:
/// - read errors at a specific operation count
/// - write errors at a specific operation count
/// - short reads capped at a byte count
pub struct FaultInjectionDevice<D> {
    inner: D,
    read_count: AtomicU64,
    write_count: AtomicU64,
    /// When non-zero, the Nth read (1-based) will return an I/O error.
    fail_read_at: AtomicU64,
    /// When non-zero, the Nth write (1-based) will return an I/O error.
    fail_write_at: AtomicU64,
    /// When non-zero, every read returns at most this many bytes.
    short_read_max: AtomicU64,
    /// `(segment, offset)` of every read, in issue order
    reads: Mutex<Vec<(u64, u64)>>,
}

impl<D: SyncStorageDevice> FaultInjectionDevice<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            fail_read_at: AtomicU64::new(0),
            fail_write_at: AtomicU64::new(0),
            short_read_max: AtomicU64::new(0),
            reads: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Make the Nth read (1-based) fail.
    pub fn inject_read_error_at(&self, operation_n: u64) {
        self.fail_read_at.store(operation_n, Ordering::SeqCst);
    }

    /// Make the Nth write (1-based) fail.
    pub fn inject_write_error_at(&self, operation_n: u64) {
        self.fail_write_at.store(operation_n, Ordering::SeqCst);
    }

    /// Cap every read at `max_bytes`.
    pub fn inject_short_reads(&self, max_bytes: u64) {
        self.short_read_max.store(max_bytes, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Log addresses of every read issued so far.
    pub fn read_addresses(&self) -> Vec<Address> {
        self.reads
            .lock()
            .iter()
            .map(|&(segment, offset)| Address::from_segment(segment, offset, SEGMENT_BITS))
            .collect()
    }
}

impl<D: SyncStorageDevice> SyncStorageDevice for FaultInjectionDevice<D> {
    fn identity(&self) -> String {
        format!("faulty:{}", SyncStorageDevice::identity(&self.inner))
    }

    fn capacity(&self) -> Capacity {
        SyncStorageDevice::capacity(&self.inner)
    }

    fn segment_size(&self) -> u64 {
        SyncStorageDevice::segment_size(&self.inner)
    }

    fn read_sync(&self, segment: u64, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.reads.lock().push((segment, offset));
        if self.fail_read_at.load(Ordering::SeqCst) == n {
            return Err(io::Error::other(format!("injected read error at operation {n}")));
        }

        let max = self.short_read_max.load(Ordering::SeqCst) as usize;
        if max > 0 && max < buf.len() {
            return self.inner.read_sync(segment, offset, &mut buf[..max]);
        }
        self.inner.read_sync(segment, offset, buf)
    }

    fn write_sync(&self, segment: u64, offset: u64, data: &[u8]) -> io::Result<usize> {
        let n = self.write_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_write_at.load(Ordering::SeqCst) == n {
            return Err(io::Error::other(format!("injected write error at operation {n}")));
        }
        self.inner.write_sync(segment, offset, data)
    }

    fn delete_segments_sync(&self, from: u64, to: u64) -> io::Result<()> {
        self.inner.delete_segments_sync(from, to)
    }
}

enum HeldOp {
    Read {
        segment: u64,
        offset: u64,
        buf: PooledBuffer,
        callback: ReadCallback,
    },
    Write {
        segment: u64,
        offset: u64,
        data: Bytes,
        callback: IoCallback,
    },
}

/// Wraps a memory device and parks every operation until the test releases it.
///
/// Deletes complete immediately and are recorded.
pub struct HeldDevice {
    inner: Arc<MemoryDevice>,
    holding: AtomicBool,
    held: Mutex<Vec<HeldOp>>,
    deleted: Mutex<Vec<(u64, u64)>>,
}

impl HeldDevice {
    pub fn new(inner: Arc<MemoryDevice>) -> Self {
        Self {
            inner,
            holding: AtomicBool::new(true),
            held: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &Arc<MemoryDevice> {
        &self.inner
    }

    pub fn held(&self) -> usize {
        self.held.lock().len()
    }

    pub fn deleted(&self) -> Vec<(u64, u64)> {
        self.deleted.lock().clone()
    }

    /// Stop parking new operations.
    pub fn pass_through(&self) {
        self.holding.store(false, Ordering::SeqCst);
    }

    /// Complete every parked operation, in arrival order.
    pub fn release_all(&self) {
        loop {
            let ops: Vec<HeldOp> = std::mem::take(&mut *self.held.lock());
            if ops.is_empty() {
                return;
            }
            for op in ops {
                self.complete(op);
            }
        }
    }

    fn complete(&self, op: HeldOp) {
        match op {
            HeldOp::Read {
                segment,
                offset,
                buf,
                callback,
            } => StorageDevice::read_async(self.inner.as_ref(), segment, offset, buf, callback),
            HeldOp::Write {
                segment,
                offset,
                data,
                callback,
            } => StorageDevice::write_async(self.inner.as_ref(), segment, offset, data, callback),
        }
    }

    fn submit(&self, op: HeldOp) {
        if self.holding.load(Ordering::SeqCst) {
            self.held.lock().push(op);
        } else {
            self.complete(op);
        }
    }
}

impl StorageDevice for HeldDevice {
    fn identity(&self) -> String {
        format!("held:{}", StorageDevice::identity(self.inner.as_ref()))
    }

    fn capacity(&self) -> Capacity {
        StorageDevice::capacity(self.inner.as_ref())
    }

    fn segment_size(&self) -> u64 {
        StorageDevice::segment_size(self.inner.as_ref())
    }

    fn read_async(&self, segment: u64, offset: u64, buf: PooledBuffer, callback: ReadCallback) {
        self.submit(HeldOp::Read {
            segment,
            offset,
            buf,
            callback,
        });
    }

    fn write_async(&self, segment: u64, offset: u64, data: Bytes, callback: IoCallback) {
        self.submit(HeldOp::Write {
            segment,
            offset,
            data,
            callback,
        });
    }

    fn delete_segment_range_async(&self, from: u64, to: u64, callback: DeleteCallback) {
        self.deleted.lock().push((from, to));
        StorageDevice::delete_segment_range_async(self.inner.as_ref(), from, to, callback);
    }

    fn close(&self) {
        StorageDevice::close(self.inner.as_ref());
    }
}
