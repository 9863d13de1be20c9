//! Immutable snapshot value objects produced by the engines.
//!
//! Snapshots are plain data: every percentage is already clamped to 0-100
//! and every byte count already converted from the kernel's units. They
//! derive `Serialize`/`Deserialize` so consumers can persist or ship them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// System-wide CPU usage percentages for one tick.
///
/// Field meanings follow `/proc/stat`: `total` is busy time overall, the
/// rest break it down per kernel accounting class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemUsage {
    pub total: i64,
    pub user: i64,
    pub nice: i64,
    pub system: i64,
    pub idle: i64,
    pub iowait: i64,
    pub irq: i64,
    pub softirq: i64,
    pub steal: i64,
    pub guest: i64,
    pub guest_nice: i64,
}

/// Load averages over the last 1, 5 and 15 minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAvg {
    pub one_min: f64,
    pub five_min: f64,
    pub fifteen_min: f64,
}

/// Current CPU frequency, pre-formatted for display.
///
/// `units` is `"GHz"` or `"MHz"`; both fields are zero/empty when the
/// frequency could not be read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuFrequency {
    pub value: f64,
    pub units: String,
}

impl CpuFrequency {
    /// True when a frequency was actually read this tick.
    pub fn is_known(&self) -> bool {
        !self.units.is_empty()
    }
}

/// CPU temperatures in whole degrees Celsius.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTemps {
    /// Package (or die) temperature from the primary sensor.
    pub package: i64,
    /// Critical threshold of the primary sensor.
    pub critical: i64,
    /// Per-core temperatures; empty when no per-core sensors exist.
    pub per_core: Vec<i64>,
}

/// One tick of CPU state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub usage: SystemUsage,
    /// Busy percentage per logical core, indexed by core number.
    pub core_usage: Vec<i64>,
    /// `None` when no temperature sensors were discovered.
    pub temp: Option<CpuTemps>,
    /// Set when the primary sensor was an arbitrary pick rather than a
    /// recognized CPU sensor.
    pub low_confidence_sensor: bool,
    pub load_avg: LoadAvg,
    pub frequency: CpuFrequency,
    /// Tidied CPU model name, empty if unavailable.
    pub name: String,
    pub core_count: usize,
    /// True on ticks where new cores appeared in `/proc/stat`.
    pub core_count_changed: bool,
}

/// A byte amount plus its share of the relevant total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemUnit {
    pub bytes: u64,
    pub percent: i64,
}

impl MemUnit {
    pub fn new(bytes: u64, percent: i64) -> Self {
        Self { bytes, percent }
    }

    pub fn as_kib(&self) -> f64 {
        self.bytes as f64 / 1024.0
    }

    pub fn as_mib(&self) -> f64 {
        self.bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn as_gib(&self) -> f64 {
        self.bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Swap usage; only present when swap is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapUsage {
    pub total: u64,
    pub used: MemUnit,
    pub free: MemUnit,
}

/// Capacity and IO rates for one tracked mount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    /// Short display name: "root" for `/`, otherwise the mountpoint's
    /// final component ("swap" for the synthetic swap entry).
    pub name: String,
    pub fstype: String,
    /// Canonical device path; empty for the swap entry.
    pub dev: PathBuf,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: i64,
    pub free_percent: i64,
    /// Bytes read since the previous tick.
    pub io_read: u64,
    /// Bytes written since the previous tick.
    pub io_write: u64,
    /// Device busy time share since the previous tick, 0-100.
    pub io_activity: i64,
}

/// One tick of memory and mount state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemSnapshot {
    /// Total RAM in bytes.
    pub total: u64,
    pub available: MemUnit,
    pub cached: MemUnit,
    pub free: MemUnit,
    pub used: MemUnit,
    pub swap: Option<SwapUsage>,
    /// Tracked mounts: root first, swap second, then discovery order.
    pub disks: Vec<DiskUsage>,
}
