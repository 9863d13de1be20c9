//! Sampling engines for Linux hardware metrics.
//!
//! This module provides the stateful engines that turn cumulative kernel
//! counters into snapshots, with support for mocking the filesystem and
//! capacity probes in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Engines                             │
//! │  ┌────────────────────┐      ┌────────────────────────────┐  │
//! │  │    CpuCollector    │      │       MemCollector         │  │
//! │  │  - /proc/stat      │      │  - /proc/meminfo           │  │
//! │  │  - /proc/loadavg   │      │  - mount tables            │  │
//! │  │  - SensorRegistry  │      │  - /sys/block/*/stat       │  │
//! │  └─────────┬──────────┘      └──────────────┬─────────────┘  │
//! │            │                                │                │
//! │            └──────────────┬─────────────────┘                │
//! │                   ┌───────▼────────┐  ┌───────────────┐      │
//! │                   │   FileSystem   │  │ CapacityProbe │      │
//! │                   └───────┬────────┘  └───────┬───────┘      │
//! └───────────────────────────┼───────────────────┼──────────────┘
//!                             │                   │
//!                ┌────────────┼────────┐          │
//!         ┌──────▼──────┐ ┌───▼─────┐ ┌▼──────────▼──┐
//!         │   RealFs    │ │ MockFs  │ │Statvfs / Mock│
//!         │  (Linux)    │ │ (tests) │ │   capacity   │
//!         └─────────────┘ └─────────┘ └──────────────┘
//! ```

pub mod cpu;
pub mod mem;
pub mod mock;
pub mod procfs;
pub mod sensors;
pub mod traits;

pub use cpu::CpuCollector;
pub use mem::MemCollector;
pub use sensors::SensorRegistry;
pub use traits::{CapacityProbe, FileSystem, FsCapacity, RealFs, Statvfs};

/// Error type for per-tick collection failures.
///
/// Collection errors are recoverable: the engine's previous-tick state is
/// left untouched, so the next `collect` call can succeed normally.
#[derive(Debug)]
pub enum CollectError {
    /// I/O error reading a mandatory source.
    Io(std::io::Error),
    /// Parse error in a mandatory source.
    Parse(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<std::io::Error> for CollectError {
    fn from(e: std::io::Error) -> Self {
        CollectError::Io(e)
    }
}
