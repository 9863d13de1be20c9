//! In-memory mock filesystem for testing engines without real `/proc` or `/sys`.
//!
//! This module provides `MockFs` which simulates a filesystem in memory,
//! allowing tests to run on any host and in CI environments without Linux.

use crate::collector::traits::FileSystem;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// In-memory filesystem for testing.
///
/// Stores files, directories and symlinks in memory, allowing tests to
/// simulate various `/proc` and `/sys` states. Directory listings are
/// returned sorted so discovery order is deterministic.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    /// Map from path to file contents.
    files: HashMap<PathBuf, String>,
    /// Set of directories (for read_dir support).
    directories: HashSet<PathBuf>,
    /// Map from symlink path to its canonical target.
    links: HashMap<PathBuf, PathBuf>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Registers a symlink resolved by `canonicalize`.
    ///
    /// The link itself is also registered as a directory entry so it shows
    /// up in `read_dir` and `exists`, like a real symlink would.
    pub fn add_link(&mut self, from: impl AsRef<Path>, to: impl AsRef<Path>) {
        let from = from.as_ref().to_path_buf();
        self.add_parents(&from);
        self.directories.insert(from.clone());
        self.links.insert(from, to.as_ref().to_path_buf());
    }

    /// Adds a hwmon temperature channel (`temp<id>_input/_label/_max/_crit`).
    ///
    /// Threshold files are only created for `Some` values so tests can
    /// exercise the fallback defaults.
    pub fn add_temp_channel(
        &mut self,
        dir: impl AsRef<Path>,
        id: u32,
        label: Option<&str>,
        milli_temp: i64,
        milli_max: Option<i64>,
        milli_crit: Option<i64>,
    ) {
        let dir = dir.as_ref();
        self.add_file(dir.join(format!("temp{}_input", id)), format!("{}\n", milli_temp));
        if let Some(label) = label {
            self.add_file(dir.join(format!("temp{}_label", id)), format!("{}\n", label));
        }
        if let Some(max) = milli_max {
            self.add_file(dir.join(format!("temp{}_max", id)), format!("{}\n", max));
        }
        if let Some(crit) = milli_crit {
            self.add_file(dir.join(format!("temp{}_crit", id)), format!("{}\n", crit));
        }
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let path = self.links.get(path).map(PathBuf::as_path).unwrap_or(path);
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
            || self.directories.contains(path)
            || self.links.contains_key(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let path = self.links.get(path).map(PathBuf::as_path).unwrap_or(path);
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries = HashSet::new();

        // Find all files and directories that are direct children
        for file_path in self.files.keys() {
            if file_path.parent().is_some_and(|parent| parent == path) {
                entries.insert(file_path.clone());
            }
        }

        for dir_path in &self.directories {
            if dir_path.parent().is_some_and(|parent| parent == path) && dir_path != path {
                entries.insert(dir_path.clone());
            }
        }

        let mut entries: Vec<PathBuf> = entries.into_iter().collect();
        entries.sort();
        Ok(entries)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        if let Some(target) = self.links.get(path) {
            return Ok(target.clone());
        }
        if self.exists(path) {
            Ok(path.to_path_buf())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("path not found: {:?}", path),
            ))
        }
    }
}

/// Shared handle around a `MockFs` for multi-tick engine tests.
///
/// Engines own their filesystem, so a plain `MockFs` clone would freeze
/// the fixture at construction time. Clones of `SharedFs` see updates
/// made through any other clone, letting a test advance counters between
/// `collect` calls.
#[derive(Debug, Clone, Default)]
pub struct SharedFs(Arc<RwLock<MockFs>>);

impl SharedFs {
    pub fn new(fs: MockFs) -> Self {
        Self(Arc::new(RwLock::new(fs)))
    }

    /// Mutates the underlying fixture, e.g. to advance a counter file.
    pub fn update(&self, mutate: impl FnOnce(&mut MockFs)) {
        let mut fs = self.0.write().unwrap_or_else(|e| e.into_inner());
        mutate(&mut fs);
    }
}

impl FileSystem for SharedFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.0
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.0.read().unwrap_or_else(|e| e.into_inner()).exists(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.0
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .read_dir(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        self.0
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .canonicalize(path)
    }
}
