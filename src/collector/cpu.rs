//! CPU sample engine: jiffy deltas, frequency and name heuristics.
//!
//! `CpuCollector` keeps the previous tick's cumulative counters and turns
//! each `/proc/stat` read into clamped 0-100 percentages. Temperature goes
//! through the owned `SensorRegistry`; load averages are a stateless
//! pass-through.

use crate::bootstrap::SysEnv;
use crate::collector::CollectError;
use crate::collector::procfs::parser::{
    parse_cpu_mhz, parse_loadavg, parse_model_name, parse_stat_cpu_lines,
};
use crate::collector::sensors::SensorRegistry;
use crate::collector::traits::FileSystem;
use crate::model::{CpuFrequency, CpuSnapshot, LoadAvg, SystemUsage};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Previous-tick cumulative jiffies for the aggregate line.
#[derive(Debug, Default)]
struct AggregateOld {
    totals: i64,
    idles: i64,
    fields: [i64; 10],
}

/// Stateful CPU engine. One instance per monitored host; `collect` takes
/// `&mut self` so concurrent ticks are ruled out at compile time.
pub struct CpuCollector<F: FileSystem> {
    fs: F,
    proc_path: String,
    name: String,
    core_count: usize,
    old: AggregateOld,
    core_old_totals: Vec<i64>,
    core_old_idles: Vec<i64>,
    sensors: SensorRegistry<F>,
    got_sensors: bool,
    /// Fast cpufreq path; dropped after repeated zero reads.
    freq_path: Option<PathBuf>,
    freq_failed: u32,
}

impl<F: FileSystem + Clone> CpuCollector<F> {
    /// Creates the engine and runs the one-time probes: CPU name lookup
    /// and sensor discovery.
    pub fn new(fs: F, env: &SysEnv) -> Self {
        let name = read_cpu_name(&fs, &env.proc_path);
        let core_count = env.core_count;

        let mut sensors = SensorRegistry::new(fs.clone(), env.proc_path.clone());
        let got_sensors = sensors.discover(core_count);

        Self {
            fs,
            proc_path: env.proc_path.clone(),
            name,
            core_count,
            old: AggregateOld::default(),
            core_old_totals: vec![0; core_count],
            core_old_idles: vec![0; core_count],
            sensors,
            got_sensors,
            freq_path: env.freq_path.clone(),
            freq_failed: 0,
        }
    }
}

impl<F: FileSystem> CpuCollector<F> {
    /// Samples `/proc/stat`, loadavg, sensors and frequency into one
    /// snapshot.
    ///
    /// Only a missing or malformed `/proc/stat` fails the tick; the other
    /// sources degrade to zero/absent values with a log line.
    pub fn collect(&mut self) -> Result<CpuSnapshot, CollectError> {
        let load_avg = self.collect_loadavg();

        let stat = self
            .fs
            .read_to_string(&Path::new(&self.proc_path).join("stat"))?;
        let lines = parse_stat_cpu_lines(&stat).map_err(|e| CollectError::Parse(e.message))?;

        // Aggregate line: deltas floor at 0, only the divisor floors at 1,
        // so a repeated read reports zero and an idle-stalled interval
        // reports the full 100.
        let aggregate = &lines[0];
        let totals = aggregate.totals();
        let idles = aggregate.idles();
        let delta_totals = (totals - self.old.totals).max(0);
        let delta_idles = (idles - self.old.idles).max(0);
        let divisor = delta_totals.max(1);
        self.old.totals = totals;
        self.old.idles = idles;

        let mut usage = SystemUsage {
            total: percent(delta_totals - delta_idles, divisor),
            ..SystemUsage::default()
        };
        {
            let slots: [&mut i64; 10] = [
                &mut usage.user,
                &mut usage.nice,
                &mut usage.system,
                &mut usage.idle,
                &mut usage.iowait,
                &mut usage.irq,
                &mut usage.softirq,
                &mut usage.steal,
                &mut usage.guest,
                &mut usage.guest_nice,
            ];
            for (idx, slot) in slots.into_iter().enumerate() {
                let Some(&val) = aggregate.times.get(idx) else {
                    break;
                };
                *slot = percent(val as i64 - self.old.fields[idx], divisor);
                self.old.fields[idx] = val as i64;
            }
        }

        // Per-core lines: grow on new cores, synthesize zeros for cores
        // missing this tick (transiently offline), never shrink.
        let core_lines = &lines[1..];
        let highest = core_lines
            .iter()
            .filter_map(|l| l.cpu_id)
            .max()
            .map(|id| id as usize + 1)
            .unwrap_or(0);
        let target = self.core_count.max(highest).max(core_lines.len());
        let core_count_changed = target > self.core_count;
        if core_count_changed {
            debug!(from = self.core_count, to = target, "core count grew");
            self.core_old_totals.resize(target, 0);
            self.core_old_idles.resize(target, 0);
            self.core_count = target;
            self.sensors.rebuild_core_map(target);
        }

        let mut core_usage = vec![0i64; self.core_count];
        for line in core_lines {
            let Some(id) = line.cpu_id else { continue };
            let id = id as usize;
            if id >= self.core_count {
                continue;
            }
            let totals = line.totals();
            let idles = line.idles();
            let calc_totals = (totals - self.core_old_totals[id]).max(0);
            let calc_idles = (idles - self.core_old_idles[id]).max(0);
            self.core_old_totals[id] = totals;
            self.core_old_idles[id] = idles;
            core_usage[id] = percent(calc_totals - calc_idles, calc_totals.max(1));
        }

        let temp = if self.got_sensors {
            self.sensors.refresh(self.core_count)
        } else {
            None
        };

        Ok(CpuSnapshot {
            usage,
            core_usage,
            temp,
            low_confidence_sensor: self.sensors.low_confidence(),
            load_avg,
            frequency: self.frequency(),
            name: self.name.clone(),
            core_count: self.core_count,
            core_count_changed,
        })
    }

    /// Composite names of all discovered temperature sensors.
    pub fn available_sensors(&self) -> Vec<&str> {
        self.sensors.sensors()
    }

    fn collect_loadavg(&self) -> LoadAvg {
        let path = Path::new(&self.proc_path).join("loadavg");
        match self.fs.read_to_string(&path).map_err(CollectError::Io) {
            Ok(content) => match parse_loadavg(&content) {
                Ok((one_min, five_min, fifteen_min)) => LoadAvg {
                    one_min,
                    five_min,
                    fifteen_min,
                },
                Err(e) => {
                    debug!(error = %e, "failed to parse loadavg");
                    LoadAvg::default()
                }
            },
            Err(e) => {
                debug!(error = %e, "failed to read loadavg");
                LoadAvg::default()
            }
        }
    }

    /// Reads the current frequency, preferring the fast sysfs path.
    ///
    /// Two zero reads disable the fast path; five total failures disable
    /// frequency readout for the engine's lifetime.
    fn frequency(&mut self) -> CpuFrequency {
        if self.freq_failed > 4 {
            return CpuFrequency::default();
        }

        let mut hz = 0.0;
        if let Some(path) = self.freq_path.clone() {
            hz = self
                .fs
                .read_to_string(&path)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(0.0)
                / 1000.0;

            if hz <= 0.0 {
                self.freq_failed += 1;
                if self.freq_failed >= 2 {
                    debug!("cpufreq fast path keeps reading zero, dropping it");
                    self.freq_path = None;
                }
            }
        }

        if hz <= 0.0
            && let Ok(content) = self
                .fs
                .read_to_string(&Path::new(&self.proc_path).join("cpuinfo"))
            && let Some(mhz) = parse_cpu_mhz(&content)
        {
            hz = mhz;
        }

        if hz <= 1.0 || hz >= 1_000_000.0 {
            self.freq_failed += 1;
            if self.freq_failed == 5 {
                warn!("cpu frequency unavailable from sysfs and cpuinfo, giving up");
            }
            return CpuFrequency::default();
        }

        if hz >= 1000.0 {
            let value = if hz >= 10_000.0 {
                (hz / 1000.0).round()
            } else {
                (hz / 100.0).round() / 10.0
            };
            CpuFrequency {
                value,
                units: "GHz".to_string(),
            }
        } else {
            CpuFrequency {
                value: hz.round(),
                units: "MHz".to_string(),
            }
        }
    }
}

fn percent(delta: i64, divisor: i64) -> i64 {
    ((delta as f64 * 100.0 / divisor as f64).round() as i64).clamp(0, 100)
}

/// Reads and tidies the CPU model name, with the ARM SoC fallback for
/// hosts whose cpuinfo has no `model name` line.
fn read_cpu_name<F: FileSystem>(fs: &F, proc_path: &str) -> String {
    let cpuinfo = fs
        .read_to_string(&Path::new(proc_path).join("cpuinfo"))
        .unwrap_or_default();

    if let Some(raw) = parse_model_name(&cpuinfo) {
        return tidy_cpu_name(&raw);
    }

    if let Ok(entries) = fs.read_dir(Path::new("/sys/devices")) {
        for entry in entries {
            let Some(dirname) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !dirname.starts_with("arm") {
                continue;
            }
            let parts: Vec<&str> = dirname.split('_').filter(|p| !p.is_empty()).collect();
            return match parts.len() {
                0 | 1 => capitalize(dirname),
                2 => capitalize(parts[1]),
                _ => format!("{} {}", capitalize(parts[1]), capitalize(parts[2])),
            };
        }
    }

    String::new()
}

type NameMatcher = fn(&str, &[&str]) -> bool;
type NameExtractor = fn(&str, &[&str]) -> Option<String>;

/// Vendor-specific tidying rules, evaluated top-down; the first matching
/// rule wins, and a failed extraction falls through to the generic strip.
const NAME_RULES: [(NameMatcher, NameExtractor); 3] = [
    (matches_xeon_or_duo, token_after_cpu),
    (matches_ryzen, ryzen_tokens),
    (matches_intel_cpu, token_after_cpu_strict),
];

fn tidy_cpu_name(raw: &str) -> String {
    let words: Vec<&str> = raw.split_whitespace().collect();

    for (matches, extract) in NAME_RULES {
        if matches(raw, &words) {
            if let Some(name) = extract(raw, &words) {
                return name;
            }
            break;
        }
    }

    generic_strip(&words)
}

fn matches_xeon_or_duo(raw: &str, words: &[&str]) -> bool {
    (raw.contains("Xeon") || words.contains(&"Duo")) && words.contains(&"CPU")
}

fn matches_ryzen(_raw: &str, words: &[&str]) -> bool {
    words.contains(&"Ryzen")
}

fn matches_intel_cpu(raw: &str, words: &[&str]) -> bool {
    raw.contains("Intel") && words.contains(&"CPU")
}

fn token_after_cpu(_raw: &str, words: &[&str]) -> Option<String> {
    let pos = words.iter().position(|w| *w == "CPU")?;
    let next = words.get(pos + 1)?;
    if next.ends_with(')') {
        None
    } else {
        Some((*next).to_string())
    }
}

fn token_after_cpu_strict(_raw: &str, words: &[&str]) -> Option<String> {
    let pos = words.iter().position(|w| *w == "CPU")?;
    let next = words.get(pos + 1)?;
    if next.ends_with(')') || *next == "@" {
        None
    } else {
        Some((*next).to_string())
    }
}

fn ryzen_tokens(_raw: &str, words: &[&str]) -> Option<String> {
    let pos = words.iter().position(|w| *w == "Ryzen")?;
    let mut name = "Ryzen".to_string();
    for word in words.iter().skip(pos + 1).take(2) {
        name.push(' ');
        name.push_str(word);
    }
    Some(name)
}

/// Drops everything after "@" and strips vendor boilerplate substrings.
fn generic_strip(words: &[&str]) -> String {
    let mut name = String::new();
    for word in words {
        if *word == "@" {
            break;
        }
        if !name.is_empty() {
            name.push(' ');
        }
        name.push_str(word);
    }

    for token in ["Processor", "CPU", "(R)", "(TM)", "Intel", "AMD", "Core"] {
        name = name.replace(token, "");
        name = name.replace("  ", " ");
    }

    name.trim().to_string()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockFs, SharedFs};

    const CPUINFO: &str = "\
processor\t: 0
model name\t: Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz
cpu MHz\t\t: 3600.000
core id\t\t: 0
processor\t: 1
model name\t: Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz
cpu MHz\t\t: 3600.000
core id\t\t: 1
";

    fn base_fixture() -> MockFs {
        let mut fs = MockFs::new();
        fs.add_file("/proc/loadavg", "0.52 0.58 0.59 1/189 1234\n");
        fs.add_file("/proc/cpuinfo", CPUINFO);
        fs.add_file(
            "/proc/stat",
            "\
cpu  100 0 50 800 50 0 0 0 0 0
cpu0 50 0 25 400 25 0 0 0 0 0
cpu1 50 0 25 400 25 0 0 0 0 0
",
        );
        fs
    }

    fn engine(fs: SharedFs, cores: usize) -> CpuCollector<SharedFs> {
        let env = SysEnv::with_root(&fs, "/proc", cores).unwrap();
        CpuCollector::new(fs, &env)
    }

    #[test]
    fn test_two_tick_percentages() {
        let fs = SharedFs::new(base_fixture());
        let mut cpu = engine(fs.clone(), 2);
        cpu.collect().unwrap();

        // +850 totals, +650 idles; user +150, system +50, idle +600, iowait +50
        fs.update(|fs| {
            fs.add_file(
                "/proc/stat",
                "\
cpu  250 0 100 1400 100 0 0 0 0 0
cpu0 125 0 50 700 50 0 0 0 0 0
cpu1 125 0 50 700 50 0 0 0 0 0
",
            )
        });
        let snap = cpu.collect().unwrap();

        assert_eq!(snap.usage.total, 24); // (850-650)*100/850
        assert_eq!(snap.usage.user, 18);
        assert_eq!(snap.usage.system, 6);
        assert_eq!(snap.usage.idle, 71);
        assert_eq!(snap.usage.iowait, 6);
        assert_eq!(snap.core_usage.len(), 2);
        assert_eq!(snap.load_avg.one_min, 0.52);
        assert!(!snap.core_count_changed);
    }

    #[test]
    fn test_repeated_read_yields_zero_not_nan() {
        let fs = SharedFs::new(base_fixture());
        let mut cpu = engine(fs.clone(), 2);
        cpu.collect().unwrap();

        // Unchanged counters: all deltas zero, floors keep divides defined
        let snap = cpu.collect().unwrap();
        assert_eq!(snap.usage.total, 0);
        assert_eq!(snap.core_usage, vec![0, 0]);
    }

    #[test]
    fn test_idle_stall_reports_full_busy() {
        let mut fixture = MockFs::new();
        fixture.add_file("/proc/cpuinfo", CPUINFO);
        fixture.add_file("/proc/loadavg", "0.0 0.0 0.0 1/1 1\n");
        fixture.add_file("/proc/stat", "cpu 100 0 50 850 0 0 0 0 0 0\n");
        let fs = SharedFs::new(fixture);
        let mut cpu = engine(fs.clone(), 2);

        // 1000 jiffies since boot, 150 busy
        let snap = cpu.collect().unwrap();
        assert_eq!(snap.usage.total, 15);

        // +100 busy jiffies, idle does not advance at all
        fs.update(|fs| fs.add_file("/proc/stat", "cpu 200 0 50 850 0 0 0 0 0 0\n"));
        let snap = cpu.collect().unwrap();
        assert_eq!(snap.usage.total, 100);
    }

    #[test]
    fn test_fully_busy_interval() {
        let fs = SharedFs::new(base_fixture());
        let mut cpu = engine(fs.clone(), 2);
        cpu.collect().unwrap();

        // +500 user jiffies, idle untouched
        fs.update(|fs| {
            fs.add_file(
                "/proc/stat",
                "\
cpu  600 0 50 800 50 0 0 0 0 0
cpu0 550 0 25 400 25 0 0 0 0 0
cpu1 50 0 25 400 25 0 0 0 0 0
",
            )
        });
        let snap = cpu.collect().unwrap();

        assert_eq!(snap.usage.total, 100);
        assert_eq!(snap.core_usage[0], 100);
        assert_eq!(snap.core_usage[1], 0);
    }

    #[test]
    fn test_core_growth_sets_flag() {
        let fs = SharedFs::new(base_fixture());
        let mut cpu = engine(fs.clone(), 2);
        cpu.collect().unwrap();

        fs.update(|fs| {
            fs.add_file(
                "/proc/stat",
                "\
cpu  300 0 150 1200 75 0 0 0 0 0
cpu0 100 0 50 400 25 0 0 0 0 0
cpu1 100 0 50 400 25 0 0 0 0 0
cpu2 100 0 50 400 25 0 0 0 0 0
",
            )
        });
        let snap = cpu.collect().unwrap();

        assert!(snap.core_count_changed);
        assert_eq!(snap.core_count, 3);
        assert_eq!(snap.core_usage.len(), 3);

        // Stable on the next tick
        let snap = cpu.collect().unwrap();
        assert!(!snap.core_count_changed);
        assert_eq!(snap.core_count, 3);
    }

    #[test]
    fn test_missing_core_reports_zero() {
        let fs = SharedFs::new(base_fixture());
        let mut cpu = engine(fs.clone(), 2);
        cpu.collect().unwrap();

        // cpu1 offline this tick
        fs.update(|fs| {
            fs.add_file(
                "/proc/stat",
                "\
cpu  250 0 100 1400 100 0 0 0 0 0
cpu0 125 0 50 700 50 0 0 0 0 0
",
            )
        });
        let snap = cpu.collect().unwrap();

        assert_eq!(snap.core_usage.len(), 2);
        assert_eq!(snap.core_usage[1], 0);
        assert!(snap.core_usage[0] > 0);
    }

    #[test]
    fn test_missing_stat_is_an_error() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/cpuinfo", CPUINFO);
        fs.add_file("/proc/loadavg", "0.0 0.0 0.0 1/1 1\n");
        let fs = SharedFs::new(fs);
        let mut cpu = engine(fs, 2);
        assert!(matches!(cpu.collect(), Err(CollectError::Io(_))));
    }

    #[test]
    fn test_missing_loadavg_degrades_to_zero() {
        let mut fixture = MockFs::new();
        fixture.add_file("/proc/cpuinfo", CPUINFO);
        fixture.add_file("/proc/stat", "cpu 100 0 50 800 50 0 0 0 0 0\n");
        let fs = SharedFs::new(fixture);
        let mut cpu = engine(fs, 2);

        let snap = cpu.collect().unwrap();
        assert_eq!(snap.load_avg, LoadAvg::default());
        assert_eq!(snap.core_usage, vec![0, 0]);
    }

    #[test]
    fn test_frequency_fast_path() {
        let mut fixture = base_fixture();
        fixture.add_file(
            "/sys/devices/system/cpu/cpufreq/policy0/scaling_cur_freq",
            "3600000\n",
        );
        let fs = SharedFs::new(fixture);
        let mut cpu = engine(fs, 2);

        let snap = cpu.collect().unwrap();
        assert_eq!(snap.frequency.value, 3.6);
        assert_eq!(snap.frequency.units, "GHz");
    }

    #[test]
    fn test_frequency_fast_path_zero_falls_back_to_cpuinfo() {
        let mut fixture = base_fixture();
        fixture.add_file(
            "/sys/devices/system/cpu/cpufreq/policy0/scaling_cur_freq",
            "0\n",
        );
        let fs = SharedFs::new(fixture);
        let mut cpu = engine(fs, 2);

        let snap = cpu.collect().unwrap();
        assert_eq!(snap.frequency.value, 3.6);
        assert_eq!(snap.frequency.units, "GHz");

        // Second zero read drops the fast path for good
        cpu.collect().unwrap();
        assert!(cpu.freq_path.is_none());
    }

    #[test]
    fn test_frequency_above_ten_ghz_rounds_whole() {
        let mut fixture = base_fixture();
        fixture.add_file(
            "/sys/devices/system/cpu/cpufreq/policy0/scaling_cur_freq",
            "10400000\n",
        );
        let fs = SharedFs::new(fixture);
        let mut cpu = engine(fs, 2);

        let snap = cpu.collect().unwrap();
        assert_eq!(snap.frequency.value, 10.0);
        assert_eq!(snap.frequency.units, "GHz");
    }

    #[test]
    fn test_frequency_sub_gigahertz_uses_mhz() {
        let mut fixture = base_fixture();
        fixture.add_file("/proc/cpuinfo", "processor\t: 0\nmodel name\t: some cpu\ncpu MHz\t\t: 798.231\n");
        let fs = SharedFs::new(fixture);
        let mut cpu = engine(fs, 2);

        let snap = cpu.collect().unwrap();
        assert_eq!(snap.frequency.value, 798.0);
        assert_eq!(snap.frequency.units, "MHz");
    }

    #[test]
    fn test_frequency_gives_up_after_five_failures() {
        let mut fixture = base_fixture();
        fixture.add_file("/proc/cpuinfo", "processor\t: 0\n");
        let fs = SharedFs::new(fixture);
        let mut cpu = engine(fs, 2);

        for _ in 0..5 {
            let snap = cpu.collect().unwrap();
            assert!(!snap.frequency.is_known());
        }
        assert_eq!(cpu.freq_failed, 5);
        let snap = cpu.collect().unwrap();
        assert!(!snap.frequency.is_known());
        // Counter stops moving once readout is disabled
        assert_eq!(cpu.freq_failed, 5);
    }

    #[test]
    fn test_tidy_name_intel_consumer() {
        assert_eq!(
            tidy_cpu_name("Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz"),
            "i7-9700K"
        );
    }

    #[test]
    fn test_tidy_name_xeon() {
        assert_eq!(
            tidy_cpu_name("Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz"),
            "E5-2680"
        );
    }

    #[test]
    fn test_tidy_name_core2_duo() {
        assert_eq!(
            tidy_cpu_name("Intel(R) Core(TM)2 Duo CPU E8400 @ 3.00GHz"),
            "E8400"
        );
    }

    #[test]
    fn test_tidy_name_ryzen() {
        assert_eq!(
            tidy_cpu_name("AMD Ryzen 7 5800X 8-Core Processor"),
            "Ryzen 7 5800X"
        );
    }

    #[test]
    fn test_arm_soc_name_fallback() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/cpuinfo", "processor\t: 0\nBogoMIPS\t: 48.00\n");
        fs.add_dir("/sys/devices/arm_cortex_a72");
        fs.add_dir("/sys/devices/platform");

        let name = read_cpu_name(&fs, "/proc");
        assert_eq!(name, "Cortex A72");
    }

    #[test]
    fn test_available_sensors_listing() {
        let mut fixture = base_fixture();
        let hwmon = "/sys/class/hwmon/hwmon0";
        fixture.add_file(format!("{}/name", hwmon), "coretemp\n");
        fixture.add_temp_channel(hwmon, 1, Some("Package id 0"), 45000, None, None);
        fixture.add_temp_channel(hwmon, 2, Some("Core 0"), 41000, None, None);
        fixture.add_temp_channel(hwmon, 3, Some("Core 1"), 42000, None, None);
        let fs = SharedFs::new(fixture);
        let mut cpu = engine(fs, 2);

        assert_eq!(cpu.available_sensors().len(), 3);

        let snap = cpu.collect().unwrap();
        let temps = snap.temp.unwrap();
        assert_eq!(temps.package, 45);
        assert_eq!(temps.per_core, vec![41, 42]);
        assert!(!snap.low_confidence_sensor);
    }
}
