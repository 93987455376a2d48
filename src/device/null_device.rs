//! Null storage device for testing
//!
//! This module provides a null device that discards all writes and returns
//! zeros for all reads. Useful for benchmarking tier bookkeeping without I/O.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::{Capacity, SyncStorageDevice};

/// Null device
///
/// A storage device that discards all writes and returns zeros for reads.
pub struct NullDevice {
    capacity: Capacity,
    segment_size: u64,
    /// Bytes accepted so far
    written: AtomicU64,
}

impl NullDevice {
    /// Create an unbounded null device
    pub fn new(segment_size: u64) -> Self {
        Self::with_capacity(segment_size, Capacity::Unspecified)
    }

    /// Create a null device with a segment capacity
    pub fn with_capacity(segment_size: u64, capacity: Capacity) -> Self {
        Self {
            capacity,
            segment_size,
            written: AtomicU64::new(0),
        }
    }

    /// Total bytes written
    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }
}

impl SyncStorageDevice for NullDevice {
    fn identity(&self) -> String {
        "null".to_string()
    }

    fn capacity(&self) -> Capacity {
        self.capacity
    }

    fn segment_size(&self) -> u64 {
        self.segment_size
    }

    fn read_sync(&self, _segment: u64, _offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn write_sync(&self, _segment: u64, _offset: u64, data: &[u8]) -> io::Result<usize> {
        self.written.fetch_add(data.len() as u64, Ordering::AcqRel);
        Ok(data.len())
    }

    fn delete_segments_sync(&self, _from: u64, _to: u64) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_device_reads_zeros() {
        let device = NullDevice::new(1024);
        let mut buf = [0xFFu8; 16];
        assert_eq!(device.read_sync(0, 0, &mut buf).unwrap(), 16);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_null_device_counts_writes() {
        let device = NullDevice::with_capacity(1024, Capacity::Segments(2));
        device.write_sync(3, 10, b"abc").unwrap();
        assert_eq!(device.bytes_written(), 3);
        assert_eq!(SyncStorageDevice::capacity(&device), Capacity::Segments(2));
    }
}
