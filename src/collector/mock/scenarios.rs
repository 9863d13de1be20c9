//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic `/proc` and `/sys` states for a few
//! common hardware configurations.

use super::filesystem::MockFs;

#[allow(dead_code)]
impl MockFs {
    /// Creates a typical four-core Intel desktop.
    ///
    /// Includes: stat/loadavg/cpuinfo/meminfo/uptime, a coretemp hwmon
    /// with package and per-core channels, the cpufreq fast path, and an
    /// ext4 root on sda1.
    pub fn typical_system() -> Self {
        let mut fs = Self::new();

        fs.add_file("/proc/uptime", "12345.67 45678.90\n");
        fs.add_file("/proc/loadavg", "0.15 0.10 0.05 1/150 1234\n");
        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
cpu1 2500 125 750 20000 250 50 25 0 0 0
cpu2 2500 125 750 20000 250 50 25 0 0 0
cpu3 2500 125 750 20000 250 50 25 0 0 0
intr 1000000 50 0 0
ctxt 500000
btime 1700000000
processes 10000
procs_running 2
procs_blocked 0
",
        );
        fs.add_file(
            "/proc/cpuinfo",
            "\
processor\t: 0
model name\t: Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz
cpu MHz\t\t: 3600.000
core id\t\t: 0

processor\t: 1
model name\t: Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz
cpu MHz\t\t: 3600.000
core id\t\t: 1

processor\t: 2
model name\t: Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz
cpu MHz\t\t: 3600.000
core id\t\t: 2

processor\t: 3
model name\t: Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz
cpu MHz\t\t: 3600.000
core id\t\t: 3
",
        );
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12288000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
",
        );
        fs.add_file(
            "/proc/filesystems",
            "\
nodev\tsysfs
nodev\tproc
nodev\ttmpfs
\text4
\tvfat
",
        );
        fs.add_file(
            "/proc/self/mounts",
            "\
/dev/sda1 / ext4 rw,relatime 0 0
proc /proc proc rw,nosuid 0 0
tmpfs /run tmpfs rw,nosuid 0 0
",
        );
        fs.add_file("/sys/block/sda/stat", "100 0 2000 50 200 0 4000 80 0 1000 130\n");
        fs.add_file(
            "/sys/block/sda/sda1/stat",
            "60 0 1000 30 120 0 2000 40 0 600 70\n",
        );

        fs.add_file(
            "/sys/devices/system/cpu/cpufreq/policy0/scaling_cur_freq",
            "3600000\n",
        );

        // coretemp hwmon: package channel plus one channel per core
        let hwmon = "/sys/class/hwmon/hwmon1";
        fs.add_file(format!("{}/name", hwmon), "coretemp\n");
        fs.add_temp_channel(hwmon, 1, Some("Package id 0"), 45000, Some(80000), Some(95000));
        fs.add_temp_channel(hwmon, 2, Some("Core 0"), 42000, Some(80000), Some(95000));
        fs.add_temp_channel(hwmon, 3, Some("Core 1"), 43000, Some(80000), Some(95000));
        fs.add_temp_channel(hwmon, 4, Some("Core 2"), 41000, Some(80000), Some(95000));
        fs.add_temp_channel(hwmon, 5, Some("Core 3"), 44000, Some(80000), Some(95000));

        fs
    }

    /// Creates an eight-thread AMD desktop with a k10temp sensor.
    ///
    /// k10temp exposes Tdie for the package and Tccd channels per die,
    /// with no threshold files, so the default limits apply.
    pub fn amd_system() -> Self {
        let mut fs = Self::typical_system();

        fs.add_file(
            "/proc/cpuinfo",
            "\
processor\t: 0
model name\t: AMD Ryzen 7 5800X 8-Core Processor
cpu MHz\t\t: 4200.000
core id\t\t: 0

processor\t: 1
model name\t: AMD Ryzen 7 5800X 8-Core Processor
cpu MHz\t\t: 4200.000
core id\t\t: 1
",
        );

        // Replace the coretemp hwmon with a k10temp one
        let hwmon = "/sys/class/hwmon/hwmon1";
        fs.add_file(format!("{}/name", hwmon), "k10temp\n");
        fs.add_temp_channel(hwmon, 1, Some("Tdie"), 52000, None, None);
        fs.add_temp_channel(hwmon, 2, Some("Tccd1"), 50000, None, None);

        fs
    }

    /// Creates an embedded board without hwmon where only thermal zones
    /// exist.
    pub fn thermal_zone_only() -> Self {
        let mut fs = Self::new();

        fs.add_file("/proc/uptime", "12345.67 45678.90\n");
        fs.add_file("/proc/loadavg", "0.25 0.20 0.15 1/90 800\n");
        fs.add_file(
            "/proc/stat",
            "\
cpu  4000 200 1200 32000 400 80 40 0 0 0
cpu0 2000 100 600 16000 200 40 20 0 0 0
cpu1 2000 100 600 16000 200 40 20 0 0 0
",
        );
        fs.add_file(
            "/proc/cpuinfo",
            "\
processor\t: 0
model name\t: ARMv8 Processor rev 3 (v8l)

processor\t: 1
model name\t: ARMv8 Processor rev 3 (v8l)
",
        );
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:        4096000 kB
MemFree:         2048000 kB
MemAvailable:    3072000 kB
Cached:           512000 kB
SwapTotal:             0 kB
SwapFree:              0 kB
",
        );
        fs.add_file("/proc/filesystems", "nodev\tproc\n\text4\n");
        fs.add_file(
            "/proc/self/mounts",
            "/dev/mmcblk0p2 / ext4 rw,relatime 0 0\n",
        );
        fs.add_file(
            "/sys/block/mmcblk0/stat",
            "100 0 2000 50 200 0 4000 80 0 1000 130\n",
        );

        let zone = "/sys/class/thermal/thermal_zone0";
        fs.add_file(format!("{}/type", zone), "cpu-thermal\n");
        fs.add_file(format!("{}/temp", zone), "47000\n");
        fs.add_file(format!("{}/trip_point_0_type", zone), "critical\n");
        fs.add_file(format!("{}/trip_point_0_temp", zone), "100000\n");
        fs.add_file(format!("{}/trip_point_1_type", zone), "high\n");
        fs.add_file(format!("{}/trip_point_1_temp", zone), "85000\n");

        fs
    }

    /// Creates a system under full CPU load with busy disks.
    pub fn high_load() -> Self {
        let mut fs = Self::typical_system();

        fs.add_file(
            "/proc/stat",
            "\
cpu  80000 1000 15000 5000 500 1000 500 0 0 0
cpu0 20000 250 3750 1250 125 250 125 0 0 0
cpu1 20000 250 3750 1250 125 250 125 0 0 0
cpu2 20000 250 3750 1250 125 250 125 0 0 0
cpu3 20000 250 3750 1250 125 250 125 0 0 0
",
        );
        fs.add_file("/proc/loadavg", "4.50 3.20 2.10 8/200 5000\n");
        fs.add_file(
            "/sys/block/sda/sda1/stat",
            "9000 0 500000 3000 12000 0 800000 4000 0 9500 7000\n",
        );

        fs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::SysEnv;
    use crate::collector::mock::{MockCapacity, SharedFs};
    use crate::collector::traits::FileSystem;
    use crate::collector::{CpuCollector, MemCollector};
    use std::path::Path;

    #[test]
    fn test_typical_system_has_required_files() {
        let fs = MockFs::typical_system();

        assert!(fs.exists(Path::new("/proc/stat")));
        assert!(fs.exists(Path::new("/proc/loadavg")));
        assert!(fs.exists(Path::new("/proc/cpuinfo")));
        assert!(fs.exists(Path::new("/proc/meminfo")));
        assert!(fs.exists(Path::new("/proc/uptime")));
        assert!(fs.exists(Path::new("/sys/class/hwmon/hwmon1/temp1_input")));
        assert!(fs.exists(Path::new("/sys/block/sda/sda1/stat")));
    }

    #[test]
    fn test_typical_system_drives_both_engines() {
        let fs = SharedFs::new(MockFs::typical_system());
        let env = SysEnv::with_root(&fs, "/proc", 4).unwrap();

        let mut cpu = CpuCollector::new(fs.clone(), &env);
        let snap = cpu.collect().unwrap();
        assert_eq!(snap.name, "i7-9700K");
        assert_eq!(snap.core_count, 4);
        assert_eq!(snap.frequency.value, 3.6);
        assert_eq!(snap.frequency.units, "GHz");
        assert_eq!(snap.load_avg.one_min, 0.15);
        let temps = snap.temp.unwrap();
        assert_eq!(temps.package, 45);
        assert_eq!(temps.per_core, vec![42, 43, 41, 44]);
        assert!(!snap.low_confidence_sensor);

        let mut probe = MockCapacity::new();
        probe.set("/", 100 * 1024 * 1024 * 1024, 40 * 1024 * 1024 * 1024);
        let mut mem = MemCollector::new(fs, probe, &env);
        let snap = mem.collect().unwrap();
        assert_eq!(snap.used.percent, 25);
        assert!(snap.swap.is_some());
        // proc and tmpfs drop out as nodev types
        let names: Vec<&str> = snap.disks.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["root", "swap"]);
        assert_eq!(snap.disks[0].used_percent, 60);
    }

    #[test]
    fn test_amd_system_exposes_tdie() {
        let fs = MockFs::amd_system();
        let name = fs
            .read_to_string(Path::new("/sys/class/hwmon/hwmon1/name"))
            .unwrap();
        assert_eq!(name.trim(), "k10temp");

        let label = fs
            .read_to_string(Path::new("/sys/class/hwmon/hwmon1/temp1_label"))
            .unwrap();
        assert_eq!(label.trim(), "Tdie");
    }

    #[test]
    fn test_thermal_zone_only_has_no_hwmon() {
        let fs = MockFs::thermal_zone_only();
        assert!(!fs.exists(Path::new("/sys/class/hwmon/hwmon1")));
        assert!(fs.exists(Path::new("/sys/class/thermal/thermal_zone0/temp")));
    }

    #[test]
    fn test_high_load_shows_saturated_loadavg() {
        let fs = MockFs::high_load();
        let loadavg = fs.read_to_string(Path::new("/proc/loadavg")).unwrap();
        assert!(loadavg.starts_with("4.50"));
    }
}
