//! Temperature sensor discovery and per-tick refresh.
//!
//! Discovery walks `/sys/class/hwmon` (with one level of `device/`
//! indirection), falls back to the coretemp platform directory and then to
//! `/sys/class/thermal` zones. The registry keeps the chosen primary
//! (package) sensor, the ordered per-core sensor list and the logical-core
//! to sensor mapping, and rereads only sensor values on refresh.

use crate::collector::procfs::parser::parse_core_topology;
use crate::collector::traits::FileSystem;
use crate::model::CpuTemps;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One discovered temperature sensor, in whole degrees Celsius.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sensor {
    /// The `*_input` (or thermal zone `temp`) file reread on refresh.
    pub path: PathBuf,
    pub label: String,
    pub temp: i64,
    pub high: i64,
    pub crit: i64,
}

/// Registry of temperature sensors for the CPU engine.
pub struct SensorRegistry<F: FileSystem> {
    fs: F,
    proc_path: String,
    hwmon_path: PathBuf,
    coretemp_platform_path: PathBuf,
    thermal_path: PathBuf,
    /// Sensors keyed by composite "controller/label" name. Ordered map so
    /// the arbitrary-pick fallback is deterministic.
    found: BTreeMap<String, Sensor>,
    /// Composite name of the package sensor, if any.
    primary: Option<String>,
    /// Ordered composite names of per-core sensors.
    core_sensors: Vec<String>,
    /// Logical core -> index into `core_sensors`.
    core_map: HashMap<usize, usize>,
    low_confidence: bool,
}

impl<F: FileSystem> SensorRegistry<F> {
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            hwmon_path: PathBuf::from("/sys/class/hwmon"),
            coretemp_platform_path: PathBuf::from("/sys/devices/platform/coretemp.0/hwmon"),
            thermal_path: PathBuf::from("/sys/class/thermal"),
            found: BTreeMap::new(),
            primary: None,
            core_sensors: Vec::new(),
            core_map: HashMap::new(),
            low_confidence: false,
        }
    }

    /// Runs discovery once and builds the core mapping.
    ///
    /// Returns whether any sensor was found; when `false` the registry
    /// stays inert and `refresh` yields `None`.
    pub fn discover(&mut self, core_count: usize) -> bool {
        let mut got_core_controller = false;
        let mut search_paths: Vec<PathBuf> = Vec::new();

        if let Ok(controllers) = self.fs.read_dir(&self.hwmon_path) {
            for entry in controllers {
                let controller = self.fs.canonicalize(&entry).unwrap_or(entry);

                if search_paths.contains(&controller)
                    || search_paths.contains(&controller.join("device"))
                {
                    continue;
                }
                if controller.to_string_lossy().contains("coretemp") {
                    got_core_controller = true;
                }

                let Ok(files) = self.fs.read_dir(&controller) else {
                    continue;
                };
                for file in &files {
                    if file.file_name().is_some_and(|n| n == "device")
                        && let Ok(dev_files) = self.fs.read_dir(file)
                        && dev_files.iter().any(|f| is_temp_input(f))
                    {
                        search_paths.push(file.clone());
                    }

                    if is_temp_input(file) {
                        search_paths.push(controller.clone());
                        break;
                    }
                }
            }
        }

        // Intel coretemp is sometimes missing from /sys/class/hwmon but
        // still registered under its platform device.
        if !got_core_controller && self.fs.exists(&self.coretemp_platform_path) {
            for entry in self
                .fs
                .read_dir(&self.coretemp_platform_path)
                .unwrap_or_default()
            {
                let controller = self.fs.canonicalize(&entry).unwrap_or(entry);
                if search_paths.contains(&controller) {
                    continue;
                }
                if self
                    .fs
                    .read_dir(&controller)
                    .unwrap_or_default()
                    .iter()
                    .any(|f| is_temp_input(f))
                {
                    search_paths.push(controller);
                }
            }
        }

        for path in &search_paths {
            self.scan_controller(path);
        }

        if self.primary.is_none() {
            self.scan_thermal_zones();
        }

        // Core sensors ordered by trailing number so "Core 2" sorts before
        // "Core 10" regardless of digit width.
        self.core_sensors
            .sort_by(|a, b| numeric_suffix(a).cmp(&numeric_suffix(b)).then_with(|| a.cmp(b)));

        if self.primary.is_none() && !self.found.is_empty() {
            // Per-core sensors are not package candidates, so skip them;
            // otherwise "k10temp/Tccd1" would shadow "k10temp/Tctl".
            self.primary = self
                .found
                .keys()
                .find(|name| {
                    if self.core_sensors.contains(*name) {
                        return false;
                    }
                    let folded = name.to_lowercase();
                    folded.contains("cpu") || folded.contains("k10temp")
                })
                .cloned();

            if self.primary.is_none() {
                self.primary = self.found.keys().next().cloned();
                self.low_confidence = true;
                warn!(
                    sensor = self.primary.as_deref().unwrap_or(""),
                    "no good candidate for cpu sensor found, using arbitrary sensor"
                );
            }
        }

        self.rebuild_core_map(core_count);

        debug!(
            sensors = self.found.len(),
            core_sensors = self.core_sensors.len(),
            primary = self.primary.as_deref().unwrap_or(""),
            "sensor discovery finished"
        );

        !self.found.is_empty()
    }

    fn scan_controller(&mut self, path: &Path) {
        let controller_name = self
            .fs
            .read_to_string(&path.join("name"))
            .map(|s| s.trim().to_string())
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

        let Ok(files) = self.fs.read_dir(path) else {
            return;
        };

        for file in files {
            let Some(filename) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !is_temp_input_name(filename) {
                continue;
            }

            // "temp<id>_input" -> channel prefix "temp<id>_"
            let channel = &filename[..filename.len() - "input".len()];
            let id: u32 = filename["temp".len()..]
                .split('_')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);

            let label = self
                .fs
                .read_to_string(&path.join(format!("{}label", channel)))
                .map(|s| s.trim().to_string())
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("temp{}", id));

            let sensor_name = format!("{}/{}", controller_name, label);
            let temp = read_milli(&self.fs, &file, 0);
            let high = read_milli(&self.fs, &path.join(format!("{}max", channel)), 80_000);
            let crit = read_milli(&self.fs, &path.join(format!("{}crit", channel)), 95_000);

            if self.primary.is_none()
                && (label.starts_with("Package id") || label.starts_with("Tdie"))
            {
                self.primary = Some(sensor_name.clone());
            } else if (label.starts_with("Core") || label.starts_with("Tccd"))
                && !self.core_sensors.contains(&sensor_name)
            {
                self.core_sensors.push(sensor_name.clone());
            }

            self.found.insert(
                sensor_name,
                Sensor {
                    path: file,
                    label,
                    temp,
                    high,
                    crit,
                },
            );
        }
    }

    fn scan_thermal_zones(&mut self) {
        if !self.fs.exists(&self.thermal_path) {
            return;
        }

        for i in 0.. {
            let zone = self.thermal_path.join(format!("thermal_zone{}", i));
            if !self.fs.exists(&zone) {
                break;
            }
            let temp_path = zone.join("temp");
            if !self.fs.exists(&temp_path) {
                continue;
            }

            let label = self
                .fs
                .read_to_string(&zone.join("type"))
                .map(|s| s.trim().to_string())
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("temp{}", i));
            let sensor_name = format!("thermal{}/{}", i, label);
            let temp = read_milli(&self.fs, &temp_path, 0);

            let mut high = 0;
            let mut crit = 0;
            for ii in 0.. {
                let trip_temp = zone.join(format!("trip_point_{}_temp", ii));
                if !self.fs.exists(&trip_temp) {
                    break;
                }
                let trip_type = self
                    .fs
                    .read_to_string(&zone.join(format!("trip_point_{}_type", ii)))
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                match trip_type.as_str() {
                    "high" => high = read_milli(&self.fs, &trip_temp, 0),
                    "critical" => crit = read_milli(&self.fs, &trip_temp, 0),
                    _ => {}
                }
            }
            if high < 1 {
                high = 80;
            }
            if crit < 1 {
                crit = 95;
            }

            self.found.insert(
                sensor_name,
                Sensor {
                    path: temp_path,
                    label,
                    temp,
                    high,
                    crit,
                },
            );
        }
    }

    /// Rebuilds the logical-core → sensor mapping.
    ///
    /// Called from discovery and again by the CPU engine when the core
    /// count grows. Prefers `/proc/cpuinfo` topology; when it covers fewer
    /// cores than expected, mirrors the first half onto the second for
    /// hyperthreaded layouts, otherwise falls back to round-robin.
    pub fn rebuild_core_map(&mut self, core_count: usize) {
        self.core_map.clear();
        if self.core_sensors.is_empty() {
            return;
        }

        let cpuinfo = Path::new(&self.proc_path).join("cpuinfo");
        if let Ok(content) = self.fs.read_to_string(&cpuinfo) {
            for (cpu, core_id) in parse_core_topology(&content) {
                if cpu < core_count {
                    self.core_map.insert(cpu, core_id);
                }
            }
        }

        if self.core_map.len() < core_count {
            if core_count % 2 == 0 && self.core_map.len() == core_count / 2 {
                for i in 0..core_count / 2 {
                    if let Some(&sensor_idx) = self.core_map.get(&i) {
                        self.core_map.insert(core_count / 2 + i, sensor_idx);
                    }
                }
            } else {
                self.core_map.clear();
                for i in 0..core_count {
                    self.core_map.insert(i, i % self.core_sensors.len());
                }
            }
        }
    }

    /// Rereads sensor values and returns this tick's temperatures.
    ///
    /// Each unique per-core sensor file is read once; the mapping then
    /// propagates values to all logical cores. `per_core` is empty when no
    /// per-core sensors were discovered.
    pub fn refresh(&mut self, core_count: usize) -> Option<CpuTemps> {
        let primary = self.primary.clone()?;

        let (package, critical) = {
            let sensor = self.found.get_mut(&primary)?;
            sensor.temp = read_milli(&self.fs, &sensor.path, 0);
            (sensor.temp, sensor.crit)
        };

        let mut per_core = Vec::new();
        if !self.core_sensors.is_empty() {
            for name in &self.core_sensors {
                if let Some(sensor) = self.found.get_mut(name) {
                    sensor.temp = read_milli(&self.fs, &sensor.path, 0);
                }
            }

            per_core = (0..core_count)
                .map(|core| {
                    let sensor_idx = self
                        .core_map
                        .get(&core)
                        .copied()
                        .unwrap_or(core % self.core_sensors.len())
                        .min(self.core_sensors.len() - 1);
                    self.found
                        .get(&self.core_sensors[sensor_idx])
                        .map(|s| s.temp)
                        .unwrap_or(package)
                })
                .collect();
        }

        Some(CpuTemps {
            package,
            critical,
            per_core,
        })
    }

    /// Composite names of all discovered sensors, for consumer UIs.
    pub fn sensors(&self) -> Vec<&str> {
        self.found.keys().map(String::as_str).collect()
    }

    pub fn has_sensors(&self) -> bool {
        !self.found.is_empty()
    }

    /// True when the primary sensor was an arbitrary pick.
    pub fn low_confidence(&self) -> bool {
        self.low_confidence
    }

    #[cfg(test)]
    fn primary_name(&self) -> Option<&str> {
        self.primary.as_deref()
    }
}

fn is_temp_input(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(is_temp_input_name)
}

fn is_temp_input_name(name: &str) -> bool {
    name.starts_with("temp") && name.ends_with("_input")
}

fn read_milli<F: FileSystem>(fs: &F, path: &Path, default_milli: i64) -> i64 {
    fs.read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(default_milli)
        / 1000
}

/// Trailing integer of a sensor name, for width-independent ordering.
fn numeric_suffix(name: &str) -> u64 {
    let digits: Vec<char> = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits
        .into_iter()
        .rev()
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    fn intel_fixture() -> MockFs {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        fs.add_file(
            "/proc/cpuinfo",
            "\
processor\t: 0
core id\t\t: 0
processor\t: 1
core id\t\t: 1
processor\t: 2
core id\t\t: 2
processor\t: 3
core id\t\t: 3
",
        );
        let hwmon = "/sys/devices/platform/coretemp.0/hwmon/hwmon2";
        fs.add_file(format!("{}/name", hwmon), "coretemp\n");
        fs.add_temp_channel(hwmon, 1, Some("Package id 0"), 45000, Some(82000), Some(100000));
        fs.add_temp_channel(hwmon, 2, Some("Core 0"), 41000, None, None);
        fs.add_temp_channel(hwmon, 3, Some("Core 1"), 42000, None, None);
        fs.add_temp_channel(hwmon, 4, Some("Core 2"), 43000, None, None);
        fs.add_temp_channel(hwmon, 5, Some("Core 3"), 44000, None, None);
        fs.add_link("/sys/class/hwmon/hwmon2", hwmon);
        fs
    }

    #[test]
    fn test_discover_intel_package_and_cores() {
        let mut registry = SensorRegistry::new(intel_fixture(), "/proc");
        assert!(registry.discover(4));

        assert_eq!(registry.primary_name(), Some("coretemp/Package id 0"));
        assert_eq!(registry.core_sensors.len(), 4);
        assert!(!registry.low_confidence());

        let temps = registry.refresh(4).unwrap();
        assert_eq!(temps.package, 45);
        assert_eq!(temps.critical, 100);
        assert_eq!(temps.per_core, vec![41, 42, 43, 44]);
    }

    #[test]
    fn test_threshold_defaults() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        let hwmon = "/sys/class/hwmon/hwmon0";
        fs.add_file(format!("{}/name", hwmon), "acpitz\n");
        fs.add_temp_channel(hwmon, 1, None, 38000, None, None);

        let mut registry = SensorRegistry::new(fs, "/proc");
        assert!(registry.discover(2));

        let sensor = registry.found.get("acpitz/temp1").unwrap();
        assert_eq!(sensor.high, 80);
        assert_eq!(sensor.crit, 95);
        assert_eq!(sensor.temp, 38);
    }

    #[test]
    fn test_device_indirection() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        let hwmon = "/sys/class/hwmon/hwmon0";
        fs.add_file(format!("{}/name", hwmon), "nvme\n");
        fs.add_temp_channel(format!("{}/device", hwmon), 1, Some("Composite"), 33000, None, None);

        let mut registry = SensorRegistry::new(fs, "/proc");
        assert!(registry.discover(2));
        // Sensors under device/ are found; controller name comes from the
        // device directory's own name file (absent here, so the dirname).
        assert!(registry.found.contains_key("device/Composite"));
    }

    #[test]
    fn test_k10temp_primary_fallback() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        fs.add_file("/proc/cpuinfo", "processor\t: 0\n");
        let hwmon = "/sys/class/hwmon/hwmon1";
        fs.add_file(format!("{}/name", hwmon), "k10temp\n");
        fs.add_temp_channel(hwmon, 1, Some("Tctl"), 52000, None, None);
        fs.add_temp_channel(hwmon, 3, Some("Tccd1"), 49000, None, None);

        let mut registry = SensorRegistry::new(fs, "/proc");
        assert!(registry.discover(2));
        assert_eq!(registry.primary_name(), Some("k10temp/Tctl"));
        assert!(!registry.low_confidence());
        assert_eq!(registry.core_sensors, vec!["k10temp/Tccd1".to_string()]);
    }

    #[test]
    fn test_amd_tdie_primary() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        fs.add_file("/proc/cpuinfo", "processor\t: 0\n");
        let hwmon = "/sys/class/hwmon/hwmon0";
        fs.add_file(format!("{}/name", hwmon), "k10temp\n");
        fs.add_temp_channel(hwmon, 1, Some("Tdie"), 55000, None, None);

        let mut registry = SensorRegistry::new(fs, "/proc");
        registry.discover(2);
        assert_eq!(registry.primary_name(), Some("k10temp/Tdie"));
    }

    #[test]
    fn test_arbitrary_pick_is_low_confidence() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        let hwmon = "/sys/class/hwmon/hwmon0";
        fs.add_file(format!("{}/name", hwmon), "iwlwifi\n");
        fs.add_temp_channel(hwmon, 1, None, 40000, None, None);

        let mut registry = SensorRegistry::new(fs, "/proc");
        assert!(registry.discover(2));
        assert_eq!(registry.primary_name(), Some("iwlwifi/temp1"));
        assert!(registry.low_confidence());
    }

    #[test]
    fn test_thermal_zone_fallback() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        let zone = "/sys/class/thermal/thermal_zone0";
        fs.add_file(format!("{}/type", zone), "x86_pkg_temp\n");
        fs.add_file(format!("{}/temp", zone), "47000\n");
        fs.add_file(format!("{}/trip_point_0_type", zone), "high\n");
        fs.add_file(format!("{}/trip_point_0_temp", zone), "85000\n");
        fs.add_file(format!("{}/trip_point_1_type", zone), "critical\n");
        fs.add_file(format!("{}/trip_point_1_temp", zone), "105000\n");

        let mut registry = SensorRegistry::new(fs, "/proc");
        assert!(registry.discover(2));

        let sensor = registry.found.get("thermal0/x86_pkg_temp").unwrap();
        assert_eq!(sensor.temp, 47);
        assert_eq!(sensor.high, 85);
        assert_eq!(sensor.crit, 105);
    }

    #[test]
    fn test_thermal_zone_trip_defaults() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        let zone = "/sys/class/thermal/thermal_zone0";
        fs.add_file(format!("{}/type", zone), "soc\n");
        fs.add_file(format!("{}/temp", zone), "51000\n");

        let mut registry = SensorRegistry::new(fs, "/proc");
        registry.discover(1);
        let sensor = registry.found.get("thermal0/soc").unwrap();
        assert_eq!(sensor.high, 80);
        assert_eq!(sensor.crit, 95);
    }

    #[test]
    fn test_numeric_suffix_ordering() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        fs.add_file("/proc/cpuinfo", "processor\t: 0\n");
        let hwmon = "/sys/class/hwmon/hwmon0";
        fs.add_file(format!("{}/name", hwmon), "coretemp\n");
        fs.add_temp_channel(hwmon, 1, Some("Package id 0"), 45000, None, None);
        fs.add_temp_channel(hwmon, 2, Some("Core 0"), 40000, None, None);
        fs.add_temp_channel(hwmon, 3, Some("Core 2"), 42000, None, None);
        fs.add_temp_channel(hwmon, 4, Some("Core 10"), 50000, None, None);
        fs.add_temp_channel(hwmon, 5, Some("Core 1"), 41000, None, None);

        let mut registry = SensorRegistry::new(fs, "/proc");
        registry.discover(4);
        assert_eq!(
            registry.core_sensors,
            vec![
                "coretemp/Core 0".to_string(),
                "coretemp/Core 1".to_string(),
                "coretemp/Core 2".to_string(),
                "coretemp/Core 10".to_string(),
            ]
        );
    }

    #[test]
    fn test_mirror_core_map_for_hyperthreading() {
        // 8 logical cores, topology covers only the first 4
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        fs.add_file(
            "/proc/cpuinfo",
            "\
processor\t: 0
core id\t\t: 0
processor\t: 1
core id\t\t: 1
processor\t: 2
core id\t\t: 2
processor\t: 3
core id\t\t: 3
",
        );
        let hwmon = "/sys/class/hwmon/hwmon0";
        fs.add_file(format!("{}/name", hwmon), "coretemp\n");
        fs.add_temp_channel(hwmon, 1, Some("Package id 0"), 45000, None, None);
        for core in 0..4 {
            fs.add_temp_channel(
                hwmon,
                2 + core,
                Some(&format!("Core {}", core)),
                (40 + core as i64) * 1000,
                None,
                None,
            );
        }

        let mut registry = SensorRegistry::new(fs, "/proc");
        registry.discover(8);

        let temps = registry.refresh(8).unwrap();
        assert_eq!(temps.per_core.len(), 8);
        assert_eq!(&temps.per_core[..4], &temps.per_core[4..]);
    }

    #[test]
    fn test_round_robin_core_map_without_topology() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        fs.add_file("/proc/cpuinfo", "processor\t: 0\n");
        let hwmon = "/sys/class/hwmon/hwmon0";
        fs.add_file(format!("{}/name", hwmon), "coretemp\n");
        fs.add_temp_channel(hwmon, 1, Some("Package id 0"), 45000, None, None);
        fs.add_temp_channel(hwmon, 2, Some("Core 0"), 40000, None, None);
        fs.add_temp_channel(hwmon, 3, Some("Core 1"), 41000, None, None);

        let mut registry = SensorRegistry::new(fs, "/proc");
        registry.discover(4);

        let temps = registry.refresh(4).unwrap();
        assert_eq!(temps.per_core, vec![40, 41, 40, 41]);
    }

    #[test]
    fn test_package_only_reports_empty_per_core() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        let hwmon = "/sys/class/hwmon/hwmon0";
        fs.add_file(format!("{}/name", hwmon), "coretemp\n");
        fs.add_temp_channel(hwmon, 1, Some("Package id 0"), 45000, None, None);

        let mut registry = SensorRegistry::new(fs, "/proc");
        registry.discover(4);

        let temps = registry.refresh(4).unwrap();
        assert_eq!(temps.package, 45);
        assert!(temps.per_core.is_empty());
    }

    #[test]
    fn test_no_sensors() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 2 3 4\n");
        let mut registry = SensorRegistry::new(fs, "/proc");
        assert!(!registry.discover(4));
        assert!(registry.refresh(4).is_none());
        assert!(registry.sensors().is_empty());
    }

    #[test]
    fn test_refresh_rereads_values() {
        let mut fs = intel_fixture();
        let mut registry = SensorRegistry::new(fs.clone(), "/proc");
        registry.discover(4);
        let before = registry.refresh(4).unwrap();
        assert_eq!(before.package, 45);

        // Same layout, hotter package
        fs.add_file(
            "/sys/devices/platform/coretemp.0/hwmon/hwmon2/temp1_input",
            "61000\n",
        );
        let mut registry = SensorRegistry::new(fs, "/proc");
        registry.discover(4);
        let after = registry.refresh(4).unwrap();
        assert_eq!(after.package, 61);
    }
}
