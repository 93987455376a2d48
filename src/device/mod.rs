//! Storage device abstraction
//!
//! This module provides the segment-addressed device traits, a few backends, a dispatcher
//! that moves blocking backends onto I/O threads, and the tiered device that stacks them.

mod dispatcher;
mod file_device;
mod memory_device;
mod null_device;
mod tiered;
mod traits;

pub use dispatcher::IoDispatcher;
pub use file_device::FileSegmentDevice;
pub use memory_device::MemoryDevice;
pub use null_device::NullDevice;
pub use tiered::{TierBoundaries, TierError, TieredStorageDevice};
pub use traits::{
    Capacity, DeleteCallback, IoCallback, ReadCallback, StorageDevice, SyncStorageDevice,
};
