//! Blocking-device dispatcher
//!
//! Runs a [`SyncStorageDevice`] on a dedicated Tokio runtime so completions arrive on I/O
//! threads instead of inline on the issuing thread. The runtime is private to the dispatcher:
//! callers do not need to be inside a Tokio context.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::{Builder, Runtime};

use crate::buffer_pool::PooledBuffer;
use crate::device::traits::read_into;
use crate::device::{
    Capacity, DeleteCallback, IoCallback, ReadCallback, StorageDevice, SyncStorageDevice,
};

/// Asynchronous front for a blocking device
pub struct IoDispatcher<D: SyncStorageDevice> {
    device: Arc<D>,
    runtime: Option<Runtime>,
    closed: AtomicBool,
}

impl<D: SyncStorageDevice> IoDispatcher<D> {
    /// Wrap `device`, running its calls on up to `io_threads` blocking threads
    pub fn new(device: D, io_threads: usize) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(io_threads.max(1))
            .thread_name("oxitier-io")
            .build()?;

        Ok(Self {
            device: Arc::new(device),
            runtime: Some(runtime),
            closed: AtomicBool::new(false),
        })
    }

    /// The wrapped device
    pub fn inner(&self) -> &D {
        &self.device
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The runtime is only taken on drop.
        if let Some(rt) = self.runtime.as_ref() {
            rt.spawn_blocking(job);
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "device dispatcher is closed")
}

impl<D: SyncStorageDevice> StorageDevice for IoDispatcher<D> {
    fn identity(&self) -> String {
        SyncStorageDevice::identity(self.device.as_ref())
    }

    fn capacity(&self) -> Capacity {
        SyncStorageDevice::capacity(self.device.as_ref())
    }

    fn segment_size(&self) -> u64 {
        SyncStorageDevice::segment_size(self.device.as_ref())
    }

    fn sector_size(&self) -> usize {
        SyncStorageDevice::sector_size(self.device.as_ref())
    }

    fn read_async(&self, segment: u64, offset: u64, buf: PooledBuffer, callback: ReadCallback) {
        if self.is_closed() {
            callback(buf, Err(closed_error()));
            return;
        }
        let device = self.device.clone();
        self.spawn(move || {
            let mut buf = buf;
            let result = read_into(device.as_ref(), segment, offset, &mut buf);
            callback(buf, result);
        });
    }

    fn write_async(&self, segment: u64, offset: u64, data: Bytes, callback: IoCallback) {
        if self.is_closed() {
            callback(Err(closed_error()));
            return;
        }
        let device = self.device.clone();
        self.spawn(move || callback(device.write_sync(segment, offset, &data)));
    }

    fn delete_segment_range_async(&self, from: u64, to: u64, callback: DeleteCallback) {
        if self.is_closed() {
            callback(Err(closed_error()));
            return;
        }
        let device = self.device.clone();
        self.spawn(move || callback(device.delete_segments_sync(from, to)));
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.device.close_sync();
        }
    }
}

impl<D: SyncStorageDevice> Drop for IoDispatcher<D> {
    fn drop(&mut self) {
        if let Some(rt) = self.runtime.take() {
            rt.shutdown_background();
        }
    }
}
