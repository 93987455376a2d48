//! Size-classed buffer pool implementation

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Number of power-of-two size classes kept by a pool.
const NUM_SIZE_CLASSES: usize = 20;

/// A buffer checked out from the pool.
/// Returns to the pool on drop.
pub struct PooledBuffer {
    buffer: Option<Vec<u8>>,
    /// Requested length; the backing vector may be larger (rounded to its size class).
    len: usize,
    /// Bytes actually filled by the last I/O.
    filled: usize,
    pool: Option<Weak<BufferPoolInner>>,
}

impl PooledBuffer {
    /// Create a standalone buffer not backed by a pool
    pub fn standalone(len: usize) -> Self {
        Self {
            buffer: Some(vec![0u8; len]),
            len,
            filled: 0,
            pool: None,
        }
    }

    /// Get a slice of the requested length
    pub fn as_slice(&self) -> &[u8] {
        self.buffer.as_ref().map_or(&[], |b| &b[..self.len])
    }

    /// Get a mutable slice of the requested length
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        self.buffer.as_mut().map_or(&mut [], |b| &mut b[..len])
    }

    /// Requested buffer length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record how many bytes the last read placed in the buffer.
    pub fn set_filled(&mut self, filled: usize) {
        self.filled = filled.min(self.len);
    }

    /// Bytes placed in the buffer by the last read.
    pub fn filled(&self) -> &[u8] {
        &self.as_slice()[..self.filled]
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len)
            .field("filled", &self.filled)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(weak) = self.pool.take() {
            if let Some(pool) = weak.upgrade() {
                if let Some(buffer) = self.buffer.take() {
                    pool.return_buffer(buffer);
                }
            }
        }
    }
}

struct BufferPoolInner {
    classes: Vec<Mutex<Vec<Vec<u8>>>>,
    sector_size: usize,
    max_pooled: usize,
}

impl BufferPoolInner {
    fn class_for(&self, len: usize) -> Option<(usize, usize)> {
        let sectors = len.max(1).div_ceil(self.sector_size);
        let class = sectors.next_power_of_two().trailing_zeros() as usize;
        if class >= NUM_SIZE_CLASSES {
            return None;
        }
        Some((class, self.sector_size << class))
    }

    fn return_buffer(&self, mut buffer: Vec<u8>) {
        let Some((class, size)) = self.class_for(buffer.len()) else {
            return;
        };
        if size != buffer.len() {
            return;
        }
        let mut pool = self.classes[class].lock();
        if pool.len() < self.max_pooled {
            buffer.fill(0);
            pool.push(buffer);
        }
        // Otherwise just drop it
    }
}

/// Pool of sector-rounded I/O buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

impl BufferPool {
    /// Create a new buffer pool
    ///
    /// # Arguments
    /// * `sector_size` - Smallest size class; every buffer is a power-of-two multiple of it
    /// * `max_pooled` - Maximum number of buffers retained per size class
    pub fn new(sector_size: usize, max_pooled: usize) -> Self {
        let sector_size = sector_size.max(1).next_power_of_two();
        Self {
            inner: Arc::new(BufferPoolInner {
                classes: (0..NUM_SIZE_CLASSES)
                    .map(|_| Mutex::new(Vec::new()))
                    .collect(),
                sector_size,
                max_pooled,
            }),
        }
    }

    /// Check out a buffer with at least `len` usable bytes.
    ///
    /// Requests larger than the biggest size class are served with an unpooled buffer.
    pub fn get(&self, len: usize) -> PooledBuffer {
        let Some((class, size)) = self.inner.class_for(len) else {
            return PooledBuffer::standalone(len);
        };

        let buffer = self.inner.classes[class]
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; size]);

        PooledBuffer {
            buffer: Some(buffer),
            len,
            filled: 0,
            pool: Some(Arc::downgrade(&self.inner)),
        }
    }

    /// Round `len` up to the sector size.
    pub fn round_up(&self, len: usize) -> usize {
        len.max(1).div_ceil(self.inner.sector_size) * self.inner.sector_size
    }

    /// Number of idle buffers across all size classes
    pub fn available(&self) -> usize {
        self.inner.classes.iter().map(|c| c.lock().len()).sum()
    }

    /// Smallest size class
    pub fn sector_size(&self) -> usize {
        self.inner.sector_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(512, 64)
    }
}
