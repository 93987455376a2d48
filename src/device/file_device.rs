//! File system storage device
//!
//! One file per segment, named `<dir>/<prefix>.<segment>`. Deleting a segment range removes
//! the files.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{Capacity, SyncStorageDevice};

/// Segmented file device
pub struct FileSegmentDevice {
    /// Base directory
    base_dir: PathBuf,
    /// File prefix
    prefix: String,
    /// Segment size in bytes
    segment_size: u64,
    capacity: Capacity,
    /// Open segments
    segments: Mutex<HashMap<u64, Arc<Mutex<File>>>>,
}

impl FileSegmentDevice {
    /// Create a new segmented device, creating `base_dir` if needed
    pub fn new(
        base_dir: impl AsRef<Path>,
        prefix: &str,
        segment_size: u64,
        capacity: Capacity,
    ) -> io::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;

        Ok(Self {
            base_dir,
            prefix: prefix.to_string(),
            segment_size,
            capacity,
            segments: Mutex::new(HashMap::new()),
        })
    }

    /// Get the segment file path for a given segment index
    pub fn segment_path(&self, segment: u64) -> PathBuf {
        self.base_dir.join(format!("{}.{}", self.prefix, segment))
    }

    /// Get an open segment, creating its file only when `create` is set
    fn segment(&self, segment: u64, create: bool) -> io::Result<Arc<Mutex<File>>> {
        let mut segments = self.segments.lock();
        if let Some(file) = segments.get(&segment) {
            return Ok(file.clone());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(self.segment_path(segment))?;
        let file = Arc::new(Mutex::new(file));
        segments.insert(segment, file.clone());
        Ok(file)
    }
}

impl SyncStorageDevice for FileSegmentDevice {
    fn identity(&self) -> String {
        format!("{}/{}", self.base_dir.display(), self.prefix)
    }

    fn capacity(&self) -> Capacity {
        self.capacity
    }

    fn segment_size(&self) -> u64 {
        self.segment_size
    }

    fn read_sync(&self, segment: u64, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let file = self.segment(segment, false)?;
        let mut file = file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf[total..].fill(0);
        Ok(total)
    }

    fn write_sync(&self, segment: u64, offset: u64, data: &[u8]) -> io::Result<usize> {
        if offset + data.len() as u64 > self.segment_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write of {} bytes at {offset} crosses segment end", data.len()),
            ));
        }

        let file = self.segment(segment, true)?;
        let mut file = file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    fn delete_segments_sync(&self, from: u64, to: u64) -> io::Result<()> {
        let mut segments = self.segments.lock();
        for segment in from..to {
            segments.remove(&segment);
            match fs::remove_file(self.segment_path(segment)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn close_sync(&self) {
        let mut segments = self.segments.lock();
        for (_, file) in segments.drain() {
            if let Err(err) = file.lock().sync_all() {
                tracing::warn!(device = %self.identity(), error = %err, "segment sync on close failed");
            }
        }
    }
}
