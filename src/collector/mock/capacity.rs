//! Table-driven capacity probe for testing the mount engine without statvfs.

use crate::collector::traits::{CapacityProbe, FsCapacity};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Mock capacity probe returning preset numbers per mountpoint.
///
/// Mountpoints without an entry fail the probe, which the mount engine
/// treats the same as a statvfs error.
#[derive(Debug, Clone, Default)]
pub struct MockCapacity {
    entries: HashMap<PathBuf, FsCapacity>,
}

impl MockCapacity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the capacity reported for a mountpoint.
    pub fn set(&mut self, mountpoint: impl AsRef<Path>, total: u64, free: u64) {
        self.entries
            .insert(mountpoint.as_ref().to_path_buf(), FsCapacity { total, free });
    }

    /// Removes a mountpoint so the probe fails for it.
    pub fn remove(&mut self, mountpoint: impl AsRef<Path>) {
        self.entries.remove(mountpoint.as_ref());
    }
}

impl CapacityProbe for MockCapacity {
    fn capacity(&self, mountpoint: &Path) -> io::Result<FsCapacity> {
        self.entries.get(mountpoint).copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no capacity entry for {:?}", mountpoint),
            )
        })
    }
}
