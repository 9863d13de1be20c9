//! One-shot environment detection performed before any engine starts.
//!
//! `SysEnv` captures the facts about the host that never change while the
//! process runs: where procfs lives, whether the fast cpufreq path exists,
//! and the kernel constants the engines need for unit conversion.

use crate::collector::traits::FileSystem;
use std::path::{Path, PathBuf};

/// Fast sysfs source for the current CPU frequency, in kHz.
const FREQ_PATH: &str = "/sys/devices/system/cpu/cpufreq/policy0/scaling_cur_freq";

/// Error type for bootstrap failures. These are fatal: without a readable
/// proc root no engine can run.
#[derive(Debug)]
pub enum BootstrapError {
    /// Proc filesystem not found or no permission to read from it.
    ProcUnavailable(String),
}

impl std::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapError::ProcUnavailable(path) => {
                write!(f, "proc filesystem at {} not found or not readable", path)
            }
        }
    }
}

impl std::error::Error for BootstrapError {}

/// Host facts detected once at startup and shared by the engines.
#[derive(Debug, Clone)]
pub struct SysEnv {
    /// Base path of the proc filesystem, usually "/proc".
    pub proc_path: String,
    /// Fast cpufreq readout path; `None` when absent, cleared by the CPU
    /// engine after repeated zero reads.
    pub freq_path: Option<PathBuf>,
    /// Memory page size in bytes.
    pub page_size: u64,
    /// Clock ticks per second (USER_HZ).
    pub clk_tck: u64,
    /// Logical cores online at startup; the CPU engine grows past this
    /// when hotplugged cores appear.
    pub core_count: usize,
}

impl SysEnv {
    /// Detects the environment of the local host.
    ///
    /// Fails only when the proc root is unreadable; every other probe has
    /// a documented fallback.
    pub fn detect<F: FileSystem>(fs: &F) -> Result<Self, BootstrapError> {
        Self::with_root(fs, "/proc", detect_core_count())
    }

    /// Builds an environment around an alternate proc root.
    ///
    /// Used by tests with fixture filesystems; the sysconf-derived values
    /// are replaced by their documented fallbacks.
    pub fn with_root<F: FileSystem>(
        fs: &F,
        proc_path: impl Into<String>,
        core_count: usize,
    ) -> Result<Self, BootstrapError> {
        let proc_path = proc_path.into();

        // Readability check, not just existence: an unreadable /proc is as
        // fatal as a missing one.
        if fs.read_dir(Path::new(&proc_path)).is_err() {
            return Err(BootstrapError::ProcUnavailable(proc_path));
        }

        let freq_path = Path::new(FREQ_PATH);
        let freq_path = if fs.exists(freq_path) && fs.read_to_string(freq_path).is_ok() {
            Some(freq_path.to_path_buf())
        } else {
            None
        };

        Ok(Self {
            proc_path,
            freq_path,
            page_size: sysconf_or(libc::_SC_PAGE_SIZE, 4096),
            clk_tck: sysconf_or(libc::_SC_CLK_TCK, 100),
            core_count: core_count.max(1),
        })
    }
}

fn sysconf_or(name: libc::c_int, fallback: u64) -> u64 {
    let value = unsafe { libc::sysconf(name) };
    if value > 0 { value as u64 } else { fallback }
}

fn detect_core_count() -> usize {
    let mut count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if count < 1 {
        count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    }
    if count < 1 { 1 } else { count as usize }
}
