//! Pooled I/O buffers for record and object reads
//!
//! Buffers are grouped into power-of-two size classes that start at the device sector size.
//! A checked-out [`PooledBuffer`] goes back to its class when dropped, so a buffer can never
//! be observed after it was returned.

mod pool;

pub use pool::{BufferPool, PooledBuffer};
