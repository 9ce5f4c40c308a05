//! Command-line flags and the immutable run configuration derived from them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tempfile::TempDir;
use tracing::debug;

use crate::error::{ErrorContext, Result, StressError};
use crate::metrics::MetricsReader;

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

const MEM_SHARE: f64 = 0.60;
const MEM_MIN_MB: u64 = 256;
const MEM_MAX_MB: u64 = 8192;
const MEM_FALLBACK_MB: u64 = 512;

const DISK_SHARE: f64 = 0.05;
const DISK_MIN_BYTES: u64 = 256 * MIB;
const DISK_MAX_BYTES: u64 = 8 * GIB;

/// Raw flags from the command line
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "stress_all",
    version,
    about = "Stress CPU, memory and disk while watching a live dashboard. Press q to stop.",
    long_about = None
)]
pub struct Args {
    /// Memory target in MB (0 = ~60% of RAM, clamped to 256..8192)
    #[arg(long = "mem-mb", value_name = "MB", default_value_t = 0, env = "STRESS_ALL_MEM_MB")]
    pub mem_mb: u64,

    /// CPU worker processes (0 = one per logical core)
    #[arg(
        long = "cpu-workers",
        value_name = "N",
        default_value_t = 0,
        env = "STRESS_ALL_CPU_WORKERS"
    )]
    pub cpu_workers: usize,

    /// Disable disk stress
    #[arg(long = "no-disk")]
    pub no_disk: bool,

    /// Disable memory stress
    #[arg(long = "no-mem")]
    pub no_mem: bool,

    /// Disk ring-file quota in GB (0 = 5% of free space, clamped to 256MB..8GB)
    #[arg(long = "disk-gb", value_name = "GB", default_value_t = 0.0, env = "STRESS_ALL_DISK_GB")]
    pub disk_gb: f64,

    /// Directory for the disk stress file (default: fresh temporary directory)
    #[arg(long = "workdir", visible_alias = "temp-dir", value_name = "DIR", env = "STRESS_ALL_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Stop automatically after N seconds ("90", "90s" or "5m"; 0 = run until q)
    #[arg(long = "duration", value_name = "SECS", value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let (digits, scale) = if let Some(m) = s.strip_suffix('m') {
        (m, 60)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else {
        (s, 1)
    };
    let n = digits
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid duration '{}': {}", s, e))?;
    n.checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", s))
}

/// Host facts the defaults are derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostInfo {
    pub mem_total_mb: u64,
    pub disk_free_bytes: u64,
    pub logical_cores: usize,
}

impl HostInfo {
    /// Reads RAM, free space under `workdir` and the core count.
    pub fn detect(reader: &MetricsReader, workdir: &Path) -> Self {
        let disk_free_bytes = match nix::sys::statvfs::statvfs(workdir) {
            Ok(st) => st.blocks_available() as u64 * st.fragment_size() as u64,
            Err(e) => {
                debug!("statvfs({}) failed: {}", workdir.display(), e);
                0
            }
        };
        Self {
            mem_total_mb: reader.memory().total_mb,
            disk_free_bytes,
            logical_cores: num_cpus::get(),
        }
    }
}

/// Immutable run configuration
#[derive(Debug, Clone, PartialEq)]
pub struct StressConfig {
    pub cpu_workers: usize,
    pub mem_enabled: bool,
    pub mem_target_mb: u64,
    pub disk_enabled: bool,
    pub disk_quota_bytes: u64,
    pub workdir: PathBuf,
    pub duration: Option<Duration>,
}

impl StressConfig {
    /// Applies defaults and clamps. Pure, so it can be checked without a host.
    pub fn derive(args: &Args, host: &HostInfo, workdir: PathBuf) -> Result<Self> {
        if !args.disk_gb.is_finite() || args.disk_gb < 0.0 {
            return Err(StressError::config(format!(
                "--disk-gb must be a non-negative number, got {}",
                args.disk_gb
            )));
        }

        let cpu_workers = if args.cpu_workers > 0 {
            args.cpu_workers
        } else {
            host.logical_cores.max(1)
        };

        if args.mem_mb > u64::MAX / MIB {
            return Err(StressError::config(format!(
                "--mem-mb {} is not addressable",
                args.mem_mb
            )));
        }
        if host.mem_total_mb > 0 && args.mem_mb > host.mem_total_mb {
            return Err(StressError::config(format!(
                "--mem-mb {} exceeds total RAM of {} MB",
                args.mem_mb, host.mem_total_mb
            )));
        }

        let mem_target_mb = if args.mem_mb > 0 {
            args.mem_mb
        } else if host.mem_total_mb > 0 {
            ((host.mem_total_mb as f64 * MEM_SHARE) as u64).clamp(MEM_MIN_MB, MEM_MAX_MB)
        } else {
            MEM_FALLBACK_MB
        };

        let disk_quota_bytes = if args.disk_gb > 0.0 {
            (args.disk_gb * GIB as f64) as u64
        } else {
            ((host.disk_free_bytes as f64 * DISK_SHARE) as u64)
                .clamp(DISK_MIN_BYTES, DISK_MAX_BYTES)
        };

        Ok(Self {
            cpu_workers,
            mem_enabled: !args.no_mem,
            mem_target_mb,
            disk_enabled: !args.no_disk,
            disk_quota_bytes,
            workdir,
            duration: args.duration.filter(|d| !d.is_zero()),
        })
    }

    /// Creates the working directory, inspects the host and derives the config.
    /// The returned `TempDir`, if any, owns the directory and removes it on drop.
    pub fn resolve(args: &Args, reader: &MetricsReader) -> Result<(Self, Option<TempDir>)> {
        let (workdir, tempdir) = match &args.workdir {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .with_config_context(&format!("cannot create {}", dir.display()))?;
                (dir.clone(), None)
            }
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("stress_all_")
                    .tempdir()
                    .with_config_context("cannot create temporary directory")?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };
        let host = HostInfo::detect(reader, &workdir);
        debug!(?host, "host detected");
        let config = Self::derive(args, &host, workdir)?;
        Ok((config, tempdir))
    }

    pub fn disk_file(&self) -> PathBuf {
        self.workdir.join("stress_all.dat")
    }

    /// Number of worker units the pool will fork.
    pub fn unit_count(&self) -> usize {
        self.cpu_workers + usize::from(self.mem_enabled) + usize::from(self.disk_enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn host(mem_total_mb: u64, disk_free_bytes: u64) -> HostInfo {
        HostInfo {
            mem_total_mb,
            disk_free_bytes,
            logical_cores: 8,
        }
    }

    fn derive(args: &Args, host: &HostInfo) -> StressConfig {
        StressConfig::derive(args, host, PathBuf::from("/tmp/x")).unwrap()
    }

    #[rstest]
    #[case(16_000, 8192)]
    #[case(8_000, 4800)]
    #[case(300, 256)]
    #[case(0, 512)]
    fn memory_target_defaults(#[case] total_mb: u64, #[case] expected: u64) {
        let cfg = derive(&Args::default(), &host(total_mb, 0));
        assert_eq!(cfg.mem_target_mb, expected);
    }

    #[rstest]
    #[case(0, 256 * MIB)]
    #[case(100 * GIB, 5 * GIB)]
    #[case(1024 * GIB, 8 * GIB)]
    fn disk_quota_defaults(#[case] free: u64, #[case] expected: u64) {
        let cfg = derive(&Args::default(), &host(0, free));
        assert!(cfg.disk_quota_bytes.abs_diff(expected) < MIB, "{}", cfg.disk_quota_bytes);
    }

    #[test]
    fn explicit_values_bypass_clamps() {
        let args = Args {
            mem_mb: 64,
            cpu_workers: 3,
            disk_gb: 0.5,
            no_disk: true,
            ..Default::default()
        };
        let cfg = derive(&args, &host(16_000, 100 * GIB));
        assert_eq!(cfg.mem_target_mb, 64);
        assert_eq!(cfg.cpu_workers, 3);
        assert_eq!(cfg.disk_quota_bytes, GIB / 2);
        assert!(!cfg.disk_enabled);
        assert_eq!(cfg.unit_count(), 4);
    }

    #[test]
    fn cpu_workers_default_to_core_count() {
        let cfg = derive(&Args::default(), &host(0, 0));
        assert_eq!(cfg.cpu_workers, 8);
        let cfg = derive(&Args::default(), &HostInfo::default());
        assert_eq!(cfg.cpu_workers, 1);
    }

    #[test]
    fn negative_disk_quota_is_rejected() {
        let args = Args {
            disk_gb: -1.0,
            ..Default::default()
        };
        let err = StressConfig::derive(&args, &host(0, 0), PathBuf::new()).unwrap_err();
        assert!(matches!(err, StressError::Config(_)));
    }

    #[rstest]
    #[case("90", 90)]
    #[case("90s", 90)]
    #[case("5m", 300)]
    fn durations_parse(#[case] input: &str, #[case] secs: u64) {
        assert_eq!(parse_duration(input).unwrap(), Duration::from_secs(secs));
    }

    #[rstest]
    #[case("307445734561825861m")]
    #[case("18446744073709551615m")]
    #[case("18446744073709551616")]
    fn oversized_durations_are_rejected(#[case] input: &str) {
        assert!(parse_duration(input).is_err());
    }

    #[rstest]
    #[case(u64::MAX, 0)]
    #[case(u64::MAX / MIB + 1, 0)]
    #[case(32_000, 16_000)]
    fn oversized_memory_targets_are_rejected(#[case] mem_mb: u64, #[case] total_mb: u64) {
        let args = Args {
            mem_mb,
            ..Default::default()
        };
        let err = StressConfig::derive(&args, &host(total_mb, 0), PathBuf::new()).unwrap_err();
        assert!(matches!(err, StressError::Config(_)));
    }

    #[test]
    fn oversized_memory_flag_fails_derive() {
        let args = Args::parse_from(["stress_all", "--mem-mb", "18446744073709551615"]);
        assert!(StressConfig::derive(&args, &host(0, 0), PathBuf::new()).is_err());
    }

    #[test]
    fn zero_duration_means_unbounded() {
        let args = Args::parse_from(["stress_all", "--duration", "0", "--no-disk"]);
        let cfg = derive(&args, &host(0, 0));
        assert_eq!(cfg.duration, None);
        assert!(!cfg.disk_enabled);
    }

    #[test]
    fn flags_parse() {
        let args = Args::parse_from([
            "stress_all",
            "--mem-mb",
            "256",
            "--cpu-workers",
            "1",
            "--temp-dir",
            "/var/tmp/s",
        ]);
        assert_eq!(args.mem_mb, 256);
        assert_eq!(args.cpu_workers, 1);
        assert_eq!(args.workdir, Some(PathBuf::from("/var/tmp/s")));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn resolve_uses_given_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/work");
        let args = Args {
            workdir: Some(target.clone()),
            ..Default::default()
        };
        let (cfg, tmp) = StressConfig::resolve(&args, &MetricsReader::new()).unwrap();
        assert!(tmp.is_none());
        assert!(target.is_dir());
        assert_eq!(cfg.disk_file(), target.join("stress_all.dat"));
    }
}
