//! Host metric sampling from the proc and sysfs interfaces.
//!
//! Every reader is tolerant of a missing or unreadable source and falls back
//! to a neutral value (`None`, 0 or an empty usage record).

use std::fs;
use std::path::{Path, PathBuf};

/// Cumulative CPU tick counters from the aggregate `cpu` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    pub idle: u64,
}

/// Memory usage in MB. Both fields are 0 when meminfo is unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total_mb: u64,
    pub used_mb: u64,
}

impl MemoryUsage {
    pub fn used_pct(&self) -> f64 {
        if self.total_mb == 0 {
            0.0
        } else {
            100.0 * self.used_mb as f64 / self.total_mb as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Reads host metrics below a proc root and a sys root.
#[derive(Debug, Clone)]
pub struct MetricsReader {
    proc_root: PathBuf,
    sys_root: PathBuf,
}

impl Default for MetricsReader {
    fn default() -> Self {
        Self::with_roots("/proc", "/sys")
    }
}

impl MetricsReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roots(proc_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            sys_root: sys_root.into(),
        }
    }

    pub fn cpu_times(&self) -> Option<CpuTimes> {
        let buf = fs::read_to_string(self.proc_root.join("stat")).ok()?;
        let line = buf.lines().next()?;
        let mut parts = line.split_whitespace();
        if parts.next()? != "cpu" {
            return None;
        }
        // user nice system idle iowait irq softirq
        let nums: Vec<u64> = parts
            .take(7)
            .filter_map(|v| v.parse::<u64>().ok())
            .collect();
        if nums.len() < 4 {
            return None;
        }
        let total = nums.iter().sum();
        let idle = nums[3] + nums.get(4).copied().unwrap_or(0);
        Some(CpuTimes { total, idle })
    }

    pub fn memory(&self) -> MemoryUsage {
        let Ok(buf) = fs::read_to_string(self.proc_root.join("meminfo")) else {
            return MemoryUsage::default();
        };
        let mut total = 0u64;
        let mut free = 0u64;
        let mut buffers = 0u64;
        let mut cached = 0u64;
        for line in buf.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(kb) = value.parse::<u64>() else {
                continue;
            };
            match key {
                "MemTotal:" => total = kb,
                "MemFree:" => free = kb,
                "Buffers:" => buffers = kb,
                "Cached:" => cached = kb,
                _ => {}
            }
        }
        let used = total.saturating_sub(free + buffers + cached);
        MemoryUsage {
            total_mb: total / 1024,
            used_mb: used / 1024,
        }
    }

    /// Mean of the per-core `scaling_cur_freq` entries, 0 if none are readable.
    pub fn cpu_freq_khz(&self) -> u64 {
        let Ok(entries) = fs::read_dir(self.sys_root.join("devices/system/cpu")) else {
            return 0;
        };
        let mut total = 0u64;
        let mut count = 0u64;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(index) = name.strip_prefix("cpu") else {
                continue;
            };
            if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if let Some(v) = read_number::<u64>(&entry.path().join("cpufreq/scaling_cur_freq")) {
                total += v;
                count += 1;
            }
        }
        if count == 0 {
            0
        } else {
            total / count
        }
    }

    /// Hottest thermal zone in °C, `None` if no zone reports a value.
    pub fn temperature_c(&self) -> Option<f64> {
        let entries = fs::read_dir(self.sys_root.join("class/thermal")).ok()?;
        entries
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with("thermal_zone"))
            .filter_map(|e| read_number::<i64>(&e.path().join("temp")))
            .max()
            .map(|milli| milli as f64 / 1000.0)
    }

    pub fn load_average(&self) -> Option<LoadAverage> {
        let buf = fs::read_to_string(self.proc_root.join("loadavg")).ok()?;
        let mut parts = buf.split_whitespace();
        Some(LoadAverage {
            one: parts.next()?.parse().ok()?,
            five: parts.next()?.parse().ok()?,
            fifteen: parts.next()?.parse().ok()?,
        })
    }
}

/// Busy percentage between two tick snapshots. 0 without a prior sample or
/// when no ticks elapsed.
pub fn cpu_percent(prev: Option<CpuTimes>, cur: Option<CpuTimes>) -> f64 {
    let (Some(prev), Some(cur)) = (prev, cur) else {
        return 0.0;
    };
    let total = cur.total.saturating_sub(prev.total);
    let idle = cur.idle.saturating_sub(prev.idle).min(total);
    if total == 0 {
        return 0.0;
    }
    100.0 * (total - idle) as f64 / total as f64
}

fn read_number<T: std::str::FromStr>(path: &Path) -> Option<T> {
    fs::read_to_string(path).ok()?.trim().parse::<T>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, MetricsReader) {
        let dir = TempDir::new().unwrap();
        let proc_root = dir.path().join("proc");
        let sys_root = dir.path().join("sys");
        fs::create_dir_all(&proc_root).unwrap();
        fs::create_dir_all(&sys_root).unwrap();
        let reader = MetricsReader::with_roots(proc_root, sys_root);
        (dir, reader)
    }

    fn write(dir: &TempDir, rel: &str, contents: &str) {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn parses_aggregate_cpu_line() {
        let (dir, reader) = fixture();
        write(
            &dir,
            "proc/stat",
            "cpu  100 5 50 800 20 3 2 0 0 0\ncpu0 50 2 25 400 10 1 1 0 0 0\n",
        );
        let times = reader.cpu_times().unwrap();
        assert_eq!(times.total, 980);
        assert_eq!(times.idle, 820);
    }

    #[test]
    fn missing_sources_yield_neutral_values() {
        let (_dir, reader) = fixture();
        assert_eq!(reader.cpu_times(), None);
        assert_eq!(reader.memory(), MemoryUsage::default());
        assert_eq!(reader.memory().used_pct(), 0.0);
        assert_eq!(reader.cpu_freq_khz(), 0);
        assert_eq!(reader.temperature_c(), None);
        assert_eq!(reader.load_average(), None);
    }

    #[test]
    fn memory_excludes_buffers_and_cache() {
        let (dir, reader) = fixture();
        write(
            &dir,
            "proc/meminfo",
            "MemTotal:       16384000 kB\nMemFree:         4096000 kB\nMemAvailable:    9000000 kB\nBuffers:          1024000 kB\nCached:           2048000 kB\nSwapCached:             0 kB\n",
        );
        let mem = reader.memory();
        assert_eq!(mem.total_mb, 16_000);
        assert_eq!(mem.used_mb, 9_000);
    }

    #[test]
    fn frequency_averages_numbered_cores_only() {
        let (dir, reader) = fixture();
        write(&dir, "sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq", "2000000\n");
        write(&dir, "sys/devices/system/cpu/cpu1/cpufreq/scaling_cur_freq", "3000000\n");
        write(&dir, "sys/devices/system/cpu/cpufreq/scaling_cur_freq", "9999999\n");
        write(&dir, "sys/devices/system/cpu/cpu2/cpufreq/scaling_cur_freq", "garbage\n");
        assert_eq!(reader.cpu_freq_khz(), 2_500_000);
    }

    #[test]
    fn temperature_reports_hottest_zone() {
        let (dir, reader) = fixture();
        write(&dir, "sys/class/thermal/thermal_zone0/temp", "45000\n");
        write(&dir, "sys/class/thermal/thermal_zone1/temp", "71500\n");
        write(&dir, "sys/class/thermal/cooling_device0/temp", "99000\n");
        assert_eq!(reader.temperature_c(), Some(71.5));
    }

    #[test]
    fn load_average_reads_three_fields() {
        let (dir, reader) = fixture();
        write(&dir, "proc/loadavg", "1.50 0.75 0.25 2/345 6789\n");
        let load = reader.load_average().unwrap();
        assert_eq!(load.one, 1.5);
        assert_eq!(load.fifteen, 0.25);
    }

    #[rstest]
    #[case(CpuTimes { total: 1000, idle: 800 }, CpuTimes { total: 1100, idle: 850 }, 50.0)]
    #[case(CpuTimes { total: 1000, idle: 800 }, CpuTimes { total: 1100, idle: 800 }, 100.0)]
    #[case(CpuTimes { total: 1000, idle: 800 }, CpuTimes { total: 1100, idle: 900 }, 0.0)]
    #[case(CpuTimes { total: 1000, idle: 800 }, CpuTimes { total: 1000, idle: 800 }, 0.0)]
    #[case(CpuTimes { total: 1000, idle: 800 }, CpuTimes { total: 900, idle: 700 }, 0.0)]
    fn cpu_percent_cases(#[case] prev: CpuTimes, #[case] cur: CpuTimes, #[case] expected: f64) {
        let pct = cpu_percent(Some(prev), Some(cur));
        assert!((pct - expected).abs() < 1e-9, "{pct} != {expected}");
    }

    #[test]
    fn cpu_percent_stays_in_range() {
        let mut prev = CpuTimes { total: 0, idle: 0 };
        for step in 1..200u64 {
            let cur = CpuTimes {
                total: prev.total + step * 7,
                idle: prev.idle + (step * 13) % (step * 7 + 1),
            };
            let pct = cpu_percent(Some(prev), Some(cur));
            assert!((0.0..=100.0).contains(&pct));
            prev = cur;
        }
    }

    #[test]
    fn first_cpu_sample_reads_zero() {
        assert_eq!(cpu_percent(None, Some(CpuTimes { total: 5, idle: 1 })), 0.0);
    }
}
