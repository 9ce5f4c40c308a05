//! Final summary printed after the terminal is restored.

use std::fmt;

use chrono::Local;

use crate::config::StressConfig;
use crate::dashboard::format_bytes;
use crate::metrics::MetricsReader;
use crate::sample::Extrema;
use crate::shared::SharedCounters;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencySummary {
    pub start_khz: u64,
    pub min_khz: u64,
    pub final_khz: u64,
    pub drop_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSummary {
    pub max_c: f64,
    pub final_c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSummary {
    pub bytes_written: u64,
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSummary {
    pub cpu_workers: usize,
    pub mem_target_mb: Option<u64>,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
    pub frequency: Option<FrequencySummary>,
    pub temperature: Option<TemperatureSummary>,
    pub disk: Option<DiskSummary>,
    pub ended_at: String,
}

impl ReportSummary {
    /// Takes a final read of the host and the shared counters. `extrema` is
    /// updated with that read before it is summarised.
    pub fn collect(
        config: &StressConfig,
        reader: &MetricsReader,
        counters: &SharedCounters,
        mut extrema: Extrema,
    ) -> Self {
        let mem = reader.memory();
        let final_khz = reader.cpu_freq_khz();
        let final_temp = reader.temperature_c();
        extrema.observe(final_khz, final_temp);

        let frequency = (extrema.freq_start_khz() > 0).then(|| FrequencySummary {
            start_khz: extrema.freq_start_khz(),
            min_khz: extrema.freq_min_khz(),
            final_khz,
            drop_pct: extrema.freq_drop_pct(),
        });
        let temperature = extrema
            .temp_max_c()
            .filter(|max| *max != 0.0)
            .map(|max_c| TemperatureSummary {
                max_c,
                final_c: final_temp.unwrap_or(0.0),
            });
        let disk = config.disk_enabled.then(|| DiskSummary {
            bytes_written: counters.bytes_written(),
            exhausted: counters.disk_error(),
        });

        Self {
            cpu_workers: config.cpu_workers,
            mem_target_mb: config.mem_enabled.then_some(config.mem_target_mb),
            mem_used_mb: mem.used_mb,
            mem_total_mb: mem.total_mb,
            frequency,
            temperature,
            disk,
            ended_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Stress All Report ===")?;
        writeln!(f, "CPU workers: {}", self.cpu_workers)?;
        match self.mem_target_mb {
            Some(mb) => writeln!(f, "Memory target: {} MB", mb)?,
            None => writeln!(f, "Memory target: off")?,
        }
        writeln!(f, "Memory used: {}/{} MB", self.mem_used_mb, self.mem_total_mb)?;
        if let Some(freq) = &self.frequency {
            writeln!(
                f,
                "CPU freq start/min/final: {}/{}/{} MHz (drop {:.1}%)",
                freq.start_khz / 1000,
                freq.min_khz / 1000,
                freq.final_khz / 1000,
                freq.drop_pct
            )?;
        }
        if let Some(temp) = &self.temperature {
            writeln!(
                f,
                "Temperature max/final: {:.1}/{:.1} C",
                temp.max_c, temp.final_c
            )?;
        }
        if let Some(disk) = &self.disk {
            writeln!(
                f,
                "Disk bytes written: {} ({})",
                disk.bytes_written,
                format_bytes(disk.bytes_written)
            )?;
            if disk.exhausted {
                writeln!(f, "Disk stress stopped due to no space left on device")?;
            }
        }
        write!(f, "Ended at: {}", self.ended_at)
    }
}
