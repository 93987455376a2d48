//! In-memory segment device
//!
//! Keeps every segment in a `Vec<u8>` and really deletes on `delete_segments_sync`, so tests
//! can observe which segments a tier still holds.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::device::{Capacity, SyncStorageDevice};

/// Segment map held in memory
pub struct MemoryDevice {
    name: String,
    capacity: Capacity,
    segment_size: u64,
    segments: RwLock<BTreeMap<u64, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryDevice {
    /// Create a new in-memory device
    pub fn new(name: impl Into<String>, segment_size: u64, capacity: Capacity) -> Self {
        Self {
            name: name.into(),
            capacity,
            segment_size,
            segments: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether the segment currently exists
    pub fn contains_segment(&self, segment: u64) -> bool {
        self.segments.read().contains_key(&segment)
    }

    /// Resident segment ids in ascending order
    pub fn segments(&self) -> Vec<u64> {
        self.segments.read().keys().copied().collect()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl SyncStorageDevice for MemoryDevice {
    fn identity(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn capacity(&self) -> Capacity {
        self.capacity
    }

    fn segment_size(&self) -> u64 {
        self.segment_size
    }

    fn read_sync(&self, segment: u64, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let segments = self.segments.read();
        let data = segments.get(&segment).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("segment {segment} not present in {}", self.name),
            )
        })?;

        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        buf[n..].fill(0);
        Ok(n)
    }

    fn write_sync(&self, segment: u64, offset: u64, data: &[u8]) -> io::Result<usize> {
        let end = offset + data.len() as u64;
        if end > self.segment_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write of {} bytes at {offset} crosses segment end", data.len()),
            ));
        }

        let mut segments = self.segments.write();
        let bytes = segments.entry(segment).or_default();
        if bytes.len() < end as usize {
            bytes.resize(end as usize, 0);
        }
        bytes[offset as usize..end as usize].copy_from_slice(data);
        Ok(data.len())
    }

    fn delete_segments_sync(&self, from: u64, to: u64) -> io::Result<()> {
        if from < to {
            self.segments.write().retain(|&s, _| s < from || s >= to);
        }
        Ok(())
    }

    fn close_sync(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
