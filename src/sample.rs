//! Per-tick samples and the running state derived from them.

use std::collections::VecDeque;

use crate::metrics::LoadAverage;

/// Frequency drop from the first reading that marks the CPU as throttled.
pub const THROTTLE_DROP_PCT: f64 = 15.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricSample {
    pub cpu_pct: f64,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
    pub disk_mb_s: f64,
    pub freq_khz: u64,
    pub temp_c: Option<f64>,
    pub load: Option<LoadAverage>,
}

impl MetricSample {
    pub fn mem_pct(&self) -> f64 {
        if self.mem_total_mb == 0 {
            0.0
        } else {
            100.0 * self.mem_used_mb as f64 / self.mem_total_mb as f64
        }
    }
}

/// Running extrema since start: first and lowest frequency, hottest zone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Extrema {
    freq_start_khz: u64,
    freq_min_khz: u64,
    temp_max_c: Option<f64>,
}

impl Extrema {
    pub fn observe(&mut self, freq_khz: u64, temp_c: Option<f64>) {
        if freq_khz > 0 {
            if self.freq_start_khz == 0 {
                self.freq_start_khz = freq_khz;
                self.freq_min_khz = freq_khz;
            } else {
                self.freq_min_khz = self.freq_min_khz.min(freq_khz);
            }
        }
        if let Some(t) = temp_c {
            self.temp_max_c = Some(self.temp_max_c.map_or(t, |m| m.max(t)));
        }
    }

    pub fn freq_start_khz(&self) -> u64 {
        self.freq_start_khz
    }

    pub fn freq_min_khz(&self) -> u64 {
        self.freq_min_khz
    }

    pub fn temp_max_c(&self) -> Option<f64> {
        self.temp_max_c
    }

    /// Drop of the running minimum below the first reading, in percent.
    pub fn freq_drop_pct(&self) -> f64 {
        drop_pct(self.freq_start_khz, self.freq_min_khz)
    }

    /// Whether `current_khz` sits at least 15% below the first reading.
    pub fn throttled(&self, current_khz: u64) -> bool {
        current_khz > 0 && drop_pct(self.freq_start_khz, current_khz) >= THROTTLE_DROP_PCT
    }
}

fn drop_pct(start: u64, now: u64) -> f64 {
    if start == 0 || now >= start {
        0.0
    } else {
        100.0 * (start - now) as f64 / start as f64
    }
}

/// Fixed-capacity ring of recent values for one gauge.
#[derive(Debug, Clone)]
pub struct Series {
    values: VecDeque<f64>,
    capacity: usize,
}

impl Series {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, v: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(v);
    }

    /// Shrinks or grows the window, dropping the oldest values first.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }
}

/// Display history for the three gauges, bounded by the terminal width.
#[derive(Debug, Clone)]
pub struct History {
    pub cpu: Series,
    pub mem: Series,
    pub disk: Series,
    disk_peak: f64,
}

impl History {
    pub fn new(width: usize) -> Self {
        Self {
            cpu: Series::new(width),
            mem: Series::new(width),
            disk: Series::new(width),
            disk_peak: 0.0,
        }
    }

    pub fn record(&mut self, sample: &MetricSample) {
        self.cpu.push(sample.cpu_pct);
        self.mem.push(sample.mem_pct());
        self.disk.push(sample.disk_mb_s);
        self.disk_peak = self.disk_peak.max(sample.disk_mb_s);
    }

    pub fn resize(&mut self, width: usize) {
        self.cpu.resize(width);
        self.mem.resize(width);
        self.disk.resize(width);
    }

    /// Highest disk throughput seen since start, the scale of the disk gauge.
    pub fn disk_peak(&self) -> f64 {
        self.disk_peak
    }
}
