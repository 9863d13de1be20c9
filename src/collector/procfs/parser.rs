//! Parsers for `/proc` and `/sys` text files.
//!
//! These are pure functions that parse the content of the kernel counter
//! files into structured data. They are designed to be easily testable with
//! string inputs; all delta math lives in the engines.

use std::collections::HashMap;

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// One `cpu` line from `/proc/stat`.
///
/// `cpu_id` is `None` for the aggregate first line. `times` holds the raw
/// jiffy fields in kernel order: user, nice, system, idle, iowait, irq,
/// softirq, steal, guest, guest_nice (older kernels report fewer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuLine {
    pub cpu_id: Option<u32>,
    pub times: Vec<u64>,
}

impl CpuLine {
    /// Cumulative busy+idle jiffies, with guest time (fields 8+) subtracted
    /// since it is already accounted inside user/nice.
    pub fn totals(&self) -> i64 {
        let sum: i64 = self.times.iter().map(|v| *v as i64).sum();
        let guest: i64 = self.times.iter().skip(8).map(|v| *v as i64).sum();
        (sum - guest).max(0)
    }

    /// Cumulative idle jiffies: idle plus iowait when present.
    pub fn idles(&self) -> i64 {
        let idle = self.times[3] as i64;
        let iowait = self.times.get(4).copied().unwrap_or(0) as i64;
        (idle + iowait).max(0)
    }
}

/// Parses the `cpu` lines of `/proc/stat`.
///
/// Returns the aggregate line first, then per-core lines in file order.
/// Per-core lines can have gaps or be truncated when cores are offline;
/// callers deal with that, this only validates shape.
pub fn parse_stat_cpu_lines(content: &str) -> Result<Vec<CpuLine>, ParseError> {
    let mut lines = Vec::new();

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(name) = fields.next() else { continue };
        if !name.starts_with("cpu") {
            continue;
        }

        let cpu_id = if name == "cpu" {
            None
        } else {
            Some(
                name[3..]
                    .parse::<u32>()
                    .map_err(|_| ParseError::new(format!("invalid cpu line name: {}", name)))?,
            )
        };

        let mut times = Vec::with_capacity(10);
        for field in fields {
            times.push(
                field
                    .parse::<u64>()
                    .map_err(|_| ParseError::new(format!("invalid jiffy value: {}", field)))?,
            );
        }

        if times.len() < 4 {
            return Err(ParseError::new(format!(
                "malformatted cpu line: expected 4+ fields, got {}",
                times.len()
            )));
        }

        lines.push(CpuLine { cpu_id, times });
    }

    match lines.first() {
        Some(first) if first.cpu_id.is_none() => Ok(lines),
        _ => Err(ParseError::new("missing aggregate cpu line")),
    }
}

/// Parses `/proc/loadavg` into (1 min, 5 min, 15 min) averages.
pub fn parse_loadavg(content: &str) -> Result<(f64, f64, f64), ParseError> {
    let mut fields = content.split_whitespace();
    let mut next = || -> Result<f64, ParseError> {
        fields
            .next()
            .ok_or_else(|| ParseError::new("loadavg too short"))?
            .parse()
            .map_err(|_| ParseError::new("invalid loadavg value"))
    };
    Ok((next()?, next()?, next()?))
}

/// Memory counters from `/proc/meminfo`, converted from KiB to bytes.
///
/// `available` is `None` on kernels without `MemAvailable`; the engine
/// derives it from free + cached in that case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemCounters {
    pub total: u64,
    pub free: u64,
    pub available: Option<u64>,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

/// Parses `/proc/meminfo` content.
///
/// Format is `Key:    value kB` pairs, one per line. Only exact label
/// matches count, so `SwapCached:` does not pollute `Cached:`.
pub fn parse_meminfo(content: &str) -> Result<MemCounters, ParseError> {
    let mut counters = MemCounters::default();
    let mut got_total = false;

    for line in content.lines() {
        let Some((label, rest)) = line.split_once(':') else {
            continue;
        };
        let target = match label {
            "MemTotal" => {
                got_total = true;
                &mut counters.total
            }
            "MemFree" => &mut counters.free,
            "MemAvailable" => counters.available.get_or_insert(0),
            "Cached" => &mut counters.cached,
            "SwapTotal" => &mut counters.swap_total,
            "SwapFree" => &mut counters.swap_free,
            _ => continue,
        };
        let kib: u64 = rest
            .split_whitespace()
            .next()
            .ok_or_else(|| ParseError::new(format!("missing value for {}", label)))?
            .parse()
            .map_err(|_| ParseError::new(format!("invalid value for {}", label)))?;
        *target = kib << 10;
    }

    if !got_total || counters.total == 0 {
        return Err(ParseError::new("missing MemTotal in meminfo"));
    }

    Ok(counters)
}

/// Extracts the `model name` value from `/proc/cpuinfo`, if present.
pub fn parse_model_name(content: &str) -> Option<String> {
    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':')
            && key.trim_end().starts_with("model name")
        {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Extracts the first `cpu MHz` value from `/proc/cpuinfo`, if present.
pub fn parse_cpu_mhz(content: &str) -> Option<f64> {
    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':')
            && key.trim_end() == "cpu MHz"
        {
            return value.trim().parse().ok();
        }
    }
    None
}

/// Parses `/proc/cpuinfo` topology into a logical-processor → core-id map.
///
/// Processor blocks missing a `core id` line (common on ARM and in VMs)
/// contribute no entry.
pub fn parse_core_topology(content: &str) -> HashMap<usize, usize> {
    let mut mapping = HashMap::new();
    let mut processor: Option<usize> = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim_end() {
            "processor" => processor = value.trim().parse().ok(),
            "core id" => {
                if let Some(proc_id) = processor
                    && let Ok(core_id) = value.trim().parse()
                {
                    mapping.insert(proc_id, core_id);
                }
            }
            _ => {}
        }
    }

    mapping
}

/// Filesystem types excluded from mount tracking: the `nodev` marker plus
/// pseudo and foreign types whose capacity numbers are meaningless here.
const EXCLUDED_FSTYPES: [&str; 6] = ["nodev", "squashfs", "nullfs", "zfs", "wslfs", "drvfs"];

/// Parses `/proc/filesystems` into the list of trackable filesystem types.
///
/// Each line is `[nodev\t]fstype`; only the first token per line matters,
/// so `nodev` lines drop out wholesale.
pub fn parse_filesystems(content: &str) -> Vec<String> {
    let mut fstypes = Vec::new();
    for line in content.lines() {
        let Some(token) = line.split_whitespace().next() else {
            continue;
        };
        if !EXCLUDED_FSTYPES.contains(&token) {
            fstypes.push(token.to_string());
        }
    }
    fstypes
}

/// One line of `/etc/mtab` or `/proc/self/mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountLine {
    pub dev: String,
    pub mountpoint: String,
    pub fstype: String,
}

/// Parses mount-table content (first three whitespace-separated fields
/// per line; options and dump/pass fields are ignored).
pub fn parse_mounts(content: &str) -> Vec<MountLine> {
    let mut mounts = Vec::new();
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        if let (Some(dev), Some(mountpoint), Some(fstype)) =
            (fields.next(), fields.next(), fields.next())
        {
            mounts.push(MountLine {
                dev: dev.to_string(),
                mountpoint: mountpoint.to_string(),
                fstype: fstype.to_string(),
            });
        }
    }
    mounts
}

/// Cumulative IO counters from a `/sys/block/<dev>/stat` file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockIo {
    pub sectors_read: u64,
    pub sectors_written: u64,
    pub io_ticks: u64,
}

/// Parses a block-device stat file.
///
/// Field layout (Documentation/block/stat): read I/Os, read merges,
/// read sectors, read ticks, write I/Os, write merges, write sectors,
/// write ticks, in_flight, io_ticks, ... — we pick fields 2, 6 and 9.
pub fn parse_block_stat(content: &str) -> Result<BlockIo, ParseError> {
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.len() < 10 {
        return Err(ParseError::new(format!(
            "block stat too short: expected 10+ fields, got {}",
            fields.len()
        )));
    }

    let parse = |idx: usize| -> Result<u64, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid block stat field {}", idx)))
    };

    Ok(BlockIo {
        sectors_read: parse(2)?,
        sectors_written: parse(6)?,
        io_ticks: parse(9)?,
    })
}

/// Parses `/proc/uptime` into seconds since boot.
pub fn parse_uptime(content: &str) -> Result<f64, ParseError> {
    content
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::new("empty uptime"))?
        .parse()
        .map_err(|_| ParseError::new("invalid uptime value"))
}
