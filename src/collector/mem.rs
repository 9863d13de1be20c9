//! Memory and mount engine: meminfo percentages, mount discovery,
//! capacity probing and per-device IO rates.
//!
//! Mount records persist across ticks to hold the previous IO counters;
//! mountpoints whose capacity probe fails are ignored for the lifetime of
//! the engine.

use crate::bootstrap::SysEnv;
use crate::collector::CollectError;
use crate::collector::procfs::parser::{
    MountLine, parse_block_stat, parse_filesystems, parse_meminfo, parse_mounts, parse_uptime,
};
use crate::collector::traits::{CapacityProbe, FileSystem};
use crate::model::{DiskUsage, MemSnapshot, MemUnit, SwapUsage};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Per-mount state carried between ticks.
#[derive(Debug, Clone, Default)]
struct MountRecord {
    dev: PathBuf,
    name: String,
    fstype: String,
    /// Block-device stat file, when one was found for this mount.
    stat_path: Option<PathBuf>,
    /// Previous cumulative sectors read, sectors written, io ticks.
    old_io: [u64; 3],
    total: u64,
    used: u64,
    free: u64,
    used_percent: i64,
    free_percent: i64,
    io_read: u64,
    io_write: u64,
    io_activity: i64,
}

/// Stateful memory and mount engine.
pub struct MemCollector<F: FileSystem, P: CapacityProbe> {
    fs: F,
    probe: P,
    proc_path: String,
    /// Mountpoints tracked regardless of filesystem type.
    fstab: Vec<String>,
    /// Records keyed by mountpoint.
    disks: HashMap<String, MountRecord>,
    /// Mountpoints seen last tick, in discovery order.
    last_found: Vec<String>,
    /// Mountpoints permanently skipped after a failed capacity probe.
    ignore: HashSet<String>,
    old_uptime: f64,
}

impl<F: FileSystem, P: CapacityProbe> MemCollector<F, P> {
    pub fn new(fs: F, probe: P, env: &SysEnv) -> Self {
        let old_uptime = fs
            .read_to_string(&Path::new(&env.proc_path).join("uptime"))
            .ok()
            .and_then(|c| parse_uptime(&c).ok())
            .unwrap_or(0.0);

        Self {
            fs,
            probe,
            proc_path: env.proc_path.clone(),
            fstab: Vec::new(),
            disks: HashMap::new(),
            last_found: Vec::new(),
            ignore: HashSet::new(),
            old_uptime,
        }
    }

    /// Adds a mountpoint tracked even when its filesystem type is not in
    /// `/proc/filesystems`.
    pub fn track_mountpoint(&mut self, mountpoint: impl Into<String>) {
        self.fstab.push(mountpoint.into());
    }

    /// Samples meminfo, mounts, capacities and IO counters into one
    /// snapshot.
    pub fn collect(&mut self) -> Result<MemSnapshot, CollectError> {
        let proc_path = self.proc_path.clone();
        let proc = Path::new(&proc_path);

        let uptime = parse_uptime(&self.fs.read_to_string(&proc.join("uptime"))?)
            .map_err(|e| CollectError::Parse(e.message))?;

        let counters = parse_meminfo(&self.fs.read_to_string(&proc.join("meminfo"))?)
            .map_err(|e| CollectError::Parse(e.message))?;

        let total = counters.total;
        let available = counters
            .available
            .unwrap_or(counters.free + counters.cached);
        // A stale MemAvailable above MemTotal means the estimate is junk;
        // fall back to counting only free pages as reclaimable.
        let used = if available <= total {
            total - available
        } else {
            total.saturating_sub(counters.free)
        };

        let pct = |value: u64| -> i64 { (value as f64 * 100.0 / total as f64).round() as i64 };

        let swap = (counters.swap_total > 0).then(|| {
            let swap_total = counters.swap_total;
            let swap_used = swap_total.saturating_sub(counters.swap_free);
            let spct =
                |value: u64| -> i64 { (value as f64 * 100.0 / swap_total as f64).round() as i64 };
            SwapUsage {
                total: swap_total,
                used: MemUnit::new(swap_used, spct(swap_used)),
                free: MemUnit::new(counters.swap_free, spct(counters.swap_free)),
            }
        });

        self.refresh_mounts(proc, swap.is_some())?;
        self.refresh_capacities();
        if let Some(swap) = &swap {
            self.refresh_swap_record(swap);
        }
        self.refresh_io(uptime);
        self.old_uptime = uptime;

        Ok(MemSnapshot {
            total,
            available: MemUnit::new(available, pct(available)),
            cached: MemUnit::new(counters.cached, pct(counters.cached)),
            free: MemUnit::new(counters.free, pct(counters.free)),
            used: MemUnit::new(used, pct(used)),
            swap,
            disks: self.ordered_disks(),
        })
    }

    /// Rereads the mount table, creating records for new mounts and
    /// dropping records for unmounted ones.
    fn refresh_mounts(&mut self, proc: &Path, has_swap: bool) -> Result<(), CollectError> {
        let fstypes = parse_filesystems(&self.fs.read_to_string(&proc.join("filesystems"))?);

        let mtab = Path::new("/etc/mtab");
        let mounts_content = if self.fs.exists(mtab) {
            self.fs.read_to_string(mtab)?
        } else {
            self.fs.read_to_string(&proc.join("self/mounts"))?
        };

        let mut found: Vec<String> = Vec::with_capacity(self.last_found.len());
        for line in parse_mounts(&mounts_content) {
            if self.ignore.contains(&line.mountpoint) || found.contains(&line.mountpoint) {
                continue;
            }
            if !(self.fstab.contains(&line.mountpoint) || fstypes.contains(&line.fstype)) {
                continue;
            }

            found.push(line.mountpoint.clone());
            if !self.disks.contains_key(&line.mountpoint) {
                let record = self.new_record(&line);
                self.disks.insert(line.mountpoint.clone(), record);
            }
        }

        if has_swap {
            found.push("swap".to_string());
        }
        self.disks.retain(|mountpoint, _| found.contains(mountpoint));
        self.last_found = found;
        Ok(())
    }

    /// Builds the record for a newly seen mount: canonical device, short
    /// name, block stat path, and IO counters primed from the current
    /// stat contents so the first tick reports zero rates.
    fn new_record(&self, line: &MountLine) -> MountRecord {
        let dev = self
            .fs
            .canonicalize(Path::new(&line.dev))
            .unwrap_or_else(|_| PathBuf::from(&line.dev));

        let name = if line.mountpoint == "/" {
            "root".to_string()
        } else {
            Path::new(&line.mountpoint)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| line.mountpoint.clone())
        };

        let stat_path = self.probe_stat_path(&dev);
        let old_io = stat_path
            .as_deref()
            .and_then(|p| self.fs.read_to_string(p).ok())
            .and_then(|c| parse_block_stat(&c).ok())
            .map(|io| [io.sectors_read, io.sectors_written, io.io_ticks])
            .unwrap_or_default();

        debug!(
            mountpoint = %line.mountpoint,
            dev = %dev.display(),
            stat = stat_path.is_some(),
            "tracking new mount"
        );

        MountRecord {
            dev,
            name,
            fstype: line.fstype.clone(),
            stat_path,
            old_io,
            ..MountRecord::default()
        }
    }

    /// Finds the `/sys/block` stat file for a device by testing
    /// progressively shorter name prefixes, so `sda1` resolves through
    /// `sda` and partitions land on the nested `<disk>/<partition>/stat`.
    fn probe_stat_path(&self, dev: &Path) -> Option<PathBuf> {
        let full = dev.file_name()?.to_str()?.to_string();
        let mut prefix = full.clone();
        let mut shortened = false;

        while prefix.len() >= 2 {
            let direct = PathBuf::from(format!("/sys/block/{}/stat", prefix));
            if self.fs.exists(&direct) {
                if shortened {
                    let nested = PathBuf::from(format!("/sys/block/{}/{}/stat", prefix, full));
                    if self.fs.exists(&nested) {
                        return Some(nested);
                    }
                }
                return Some(direct);
            }
            prefix.pop();
            shortened = true;
        }
        None
    }

    fn refresh_capacities(&mut self) {
        let mut newly_ignored = Vec::new();

        for (mountpoint, disk) in self.disks.iter_mut() {
            if mountpoint == "swap"
                || !self.fs.exists(Path::new(mountpoint))
                || self.ignore.contains(mountpoint)
            {
                continue;
            }

            match self.probe.capacity(Path::new(mountpoint)) {
                Ok(cap) => {
                    disk.total = cap.total;
                    disk.free = cap.free;
                    disk.used = cap.total.saturating_sub(cap.free);
                    disk.used_percent = if cap.total > 0 {
                        (disk.used as f64 * 100.0 / cap.total as f64).round() as i64
                    } else {
                        0
                    };
                    disk.free_percent = 100 - disk.used_percent;
                }
                Err(e) => {
                    warn!(
                        mountpoint = %mountpoint,
                        error = %e,
                        "capacity probe failed, ignoring mount permanently"
                    );
                    newly_ignored.push(mountpoint.clone());
                }
            }
        }

        for mountpoint in newly_ignored {
            self.disks.remove(&mountpoint);
            self.last_found.retain(|m| m != &mountpoint);
            self.ignore.insert(mountpoint);
        }
    }

    /// Maintains the synthetic "swap" pseudo-mount whose numbers come
    /// from meminfo rather than statvfs.
    fn refresh_swap_record(&mut self, swap: &SwapUsage) {
        let record = self
            .disks
            .entry("swap".to_string())
            .or_insert_with(|| MountRecord {
                name: "swap".to_string(),
                fstype: "swap".to_string(),
                ..MountRecord::default()
            });
        record.total = swap.total;
        record.used = swap.used.bytes;
        record.free = swap.free.bytes;
        record.used_percent = swap.used.percent;
        record.free_percent = swap.free.percent;
    }

    /// Turns cumulative sector and tick counters into per-tick byte
    /// amounts and a busy percentage. Counter regressions floor at zero.
    fn refresh_io(&mut self, uptime: f64) {
        let elapsed = uptime - self.old_uptime;
        let elapsed = if elapsed > 0.0 { elapsed } else { 1.0 };

        for (mountpoint, disk) in self.disks.iter_mut() {
            let Some(stat_path) = &disk.stat_path else {
                continue;
            };
            let io = match self
                .fs
                .read_to_string(stat_path)
                .map_err(CollectError::Io)
                .and_then(|c| parse_block_stat(&c).map_err(|e| CollectError::Parse(e.message)))
            {
                Ok(io) => io,
                Err(e) => {
                    debug!(mountpoint = %mountpoint, error = %e, "skipping disk IO sample");
                    continue;
                }
            };

            disk.io_read = io.sectors_read.saturating_sub(disk.old_io[0]) * 512;
            disk.io_write = io.sectors_written.saturating_sub(disk.old_io[1]) * 512;
            let tick_delta = io.io_ticks.saturating_sub(disk.old_io[2]);
            disk.io_activity =
                ((tick_delta as f64 / elapsed / 10.0).round() as i64).clamp(0, 100);
            disk.old_io = [io.sectors_read, io.sectors_written, io.io_ticks];
        }
    }

    /// Snapshot rows in display order: root first, swap second, then the
    /// remaining mounts in discovery order.
    fn ordered_disks(&self) -> Vec<DiskUsage> {
        let mut order: Vec<&str> = Vec::with_capacity(self.disks.len());
        if self.disks.contains_key("/") {
            order.push("/");
        }
        if self.disks.contains_key("swap") {
            order.push("swap");
        }
        for mountpoint in &self.last_found {
            if mountpoint != "/" && mountpoint != "swap" && self.disks.contains_key(mountpoint) {
                order.push(mountpoint);
            }
        }

        order
            .into_iter()
            .map(|mountpoint| {
                let disk = &self.disks[mountpoint];
                DiskUsage {
                    name: disk.name.clone(),
                    fstype: disk.fstype.clone(),
                    dev: disk.dev.clone(),
                    total: disk.total,
                    used: disk.used,
                    free: disk.free,
                    used_percent: disk.used_percent,
                    free_percent: disk.free_percent,
                    io_read: disk.io_read,
                    io_write: disk.io_write,
                    io_activity: disk.io_activity,
                }
            })
            .collect()
    }
}
