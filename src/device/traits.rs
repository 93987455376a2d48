//! Storage device traits
//!
//! Devices are addressed by `(segment, offset)`. A segment is a fixed-size unit of the log;
//! tiers evict and delete whole segments.

use std::fmt;
use std::io;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::buffer_pool::PooledBuffer;

/// Completion callback for writes; receives the number of bytes written
pub type IoCallback = Box<dyn FnOnce(io::Result<usize>) + Send + 'static>;

/// Completion callback for reads; gets the buffer back with `filled()` set to the bytes read
pub type ReadCallback = Box<dyn FnOnce(PooledBuffer, io::Result<usize>) + Send + 'static>;

/// Completion callback for segment deletion
pub type DeleteCallback = Box<dyn FnOnce(io::Result<()>) + Send + 'static>;

/// How many segments a device may hold at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capacity {
    /// Bounded by this many segments
    Segments(u64),
    /// No bound
    Unspecified,
}

impl Capacity {
    /// Segment bound, if any
    pub fn segments(&self) -> Option<u64> {
        match self {
            Capacity::Segments(n) => Some(*n),
            Capacity::Unspecified => None,
        }
    }

    /// Whether the device is unbounded
    pub fn is_unspecified(&self) -> bool {
        matches!(self, Capacity::Unspecified)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capacity::Segments(n) => write!(f, "{n} segments"),
            Capacity::Unspecified => f.write_str("unspecified"),
        }
    }
}

/// Asynchronous storage device
///
/// Every operation completes by invoking its callback exactly once, possibly inline on the
/// calling thread or later on an I/O thread.
pub trait StorageDevice: Send + Sync + 'static {
    /// Stable human-readable description (paths, prefixes).
    fn identity(&self) -> String;

    /// Capacity in segments.
    fn capacity(&self) -> Capacity;

    /// Segment size in bytes.
    fn segment_size(&self) -> u64;

    /// Read alignment in bytes.
    fn sector_size(&self) -> usize {
        512
    }

    /// Read up to `buf.len()` bytes at `(segment, offset)`.
    ///
    /// Reads past the written end of a segment return fewer bytes.
    fn read_async(&self, segment: u64, offset: u64, buf: PooledBuffer, callback: ReadCallback);

    /// Write `data` at `(segment, offset)`.
    fn write_async(&self, segment: u64, offset: u64, data: Bytes, callback: IoCallback);

    /// Delete segments in `[from, to)`.
    fn delete_segment_range_async(&self, from: u64, to: u64, callback: DeleteCallback);

    /// Delete segments in `[from, to)` without waiting for the result.
    fn delete_segment_range(&self, from: u64, to: u64) {
        self.delete_segment_range_async(
            from,
            to,
            Box::new(move |result| {
                if let Err(err) = result {
                    tracing::warn!(from, to, error = %err, "segment deletion failed");
                }
            }),
        );
    }

    /// Release resources. Calling it twice must be harmless.
    fn close(&self);
}

/// Blocking storage device (for simpler implementations)
///
/// Every implementor is a [`StorageDevice`] whose operations complete inline. Wrap it in
/// [`IoDispatcher`](super::IoDispatcher) to complete on I/O threads instead.
pub trait SyncStorageDevice: Send + Sync + 'static {
    /// Stable human-readable description.
    fn identity(&self) -> String;

    /// Capacity in segments.
    fn capacity(&self) -> Capacity;

    /// Segment size in bytes.
    fn segment_size(&self) -> u64;

    /// Read alignment in bytes.
    fn sector_size(&self) -> usize {
        512
    }

    /// Read synchronously
    fn read_sync(&self, segment: u64, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write synchronously
    fn write_sync(&self, segment: u64, offset: u64, data: &[u8]) -> io::Result<usize>;

    /// Delete segments in `[from, to)` synchronously
    fn delete_segments_sync(&self, from: u64, to: u64) -> io::Result<()>;

    /// Close synchronously
    fn close_sync(&self) {}
}

/// Run a blocking read against a pooled buffer and record the filled length.
pub(crate) fn read_into<D: SyncStorageDevice + ?Sized>(
    device: &D,
    segment: u64,
    offset: u64,
    buf: &mut PooledBuffer,
) -> io::Result<usize> {
    let result = device.read_sync(segment, offset, buf.as_mut_slice());
    buf.set_filled(*result.as_ref().unwrap_or(&0));
    result
}

/// Implement async trait for sync devices
impl<T: SyncStorageDevice> StorageDevice for T {
    fn identity(&self) -> String {
        SyncStorageDevice::identity(self)
    }

    fn capacity(&self) -> Capacity {
        SyncStorageDevice::capacity(self)
    }

    fn segment_size(&self) -> u64 {
        SyncStorageDevice::segment_size(self)
    }

    fn sector_size(&self) -> usize {
        SyncStorageDevice::sector_size(self)
    }

    fn read_async(&self, segment: u64, offset: u64, mut buf: PooledBuffer, callback: ReadCallback) {
        let result = read_into(self, segment, offset, &mut buf);
        callback(buf, result);
    }

    fn write_async(&self, segment: u64, offset: u64, data: Bytes, callback: IoCallback) {
        callback(self.write_sync(segment, offset, &data));
    }

    fn delete_segment_range_async(&self, from: u64, to: u64, callback: DeleteCallback) {
        callback(self.delete_segments_sync(from, to));
    }

    fn close(&self) {
        self.close_sync();
    }
}
