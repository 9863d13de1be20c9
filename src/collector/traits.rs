//! Abstractions for filesystem and mount-capacity access to enable testing.
//!
//! The `FileSystem` trait allows the engines to read the real `/proc` and
//! `/sys` trees on Linux or an in-memory mock in tests. `CapacityProbe`
//! wraps the `statvfs` call the mount engine uses for disk capacity.

use std::io;
use std::path::{Path, PathBuf};

/// Abstraction for filesystem operations.
///
/// This trait allows the engines to read from the real filesystem or from
/// a mock implementation for testing purposes.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Resolves symlinks to a canonical path.
    ///
    /// Used for hwmon controller deduplication and block-device resolution,
    /// where `/sys` and `/dev` entries are usually symlinks.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Real filesystem implementation that delegates to `std::fs`.
///
/// Use this in production to read from the actual `/proc` and `/sys` trees.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }
}

/// Capacity numbers for a mounted filesystem, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsCapacity {
    pub total: u64,
    pub free: u64,
}

/// Abstraction over the `statvfs` capacity query for a mountpoint.
pub trait CapacityProbe: Send + Sync {
    /// Returns total and free bytes for the filesystem mounted at `mountpoint`.
    fn capacity(&self, mountpoint: &Path) -> io::Result<FsCapacity>;
}

/// Real capacity probe backed by `statvfs(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Statvfs;

impl Statvfs {
    pub fn new() -> Self {
        Self
    }
}

impl CapacityProbe for Statvfs {
    fn capacity(&self, mountpoint: &Path) -> io::Result<FsCapacity> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = std::ffi::CString::new(mountpoint.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;

        let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
        if unsafe { libc::statvfs(c_path.as_ptr(), &mut vfs) } != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(FsCapacity {
            total: vfs.f_blocks as u64 * vfs.f_frsize as u64,
            free: vfs.f_bavail as u64 * vfs.f_frsize as u64,
        })
    }
}
