//! Live status view.
//!
//! The loop polls input every 200 ms and redraws every 800 ms, so the quit key
//! is never missed by more than one poll interval. Drawing and input go
//! through [`Surface`]; the terminal implementation restores the tty when it
//! is dropped, whichever way the run ends.

use std::io::{self, Stdout, Write};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{
    self, disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use crossterm::{execute, queue};
use tracing::{debug, info};

use crate::config::{StressConfig, MIB};
use crate::error::{ErrorContext, Result};
use crate::metrics::{cpu_percent, CpuTimes, MetricsReader};
use crate::sample::{Extrema, History, MetricSample};
use crate::shared::{SharedCounters, StopSignal};

pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const RENDER_INTERVAL: Duration = Duration::from_millis(800);

const LEVELS: &[u8] = b" .:-=+*#%@";
const LABEL_WIDTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    None,
    Quit,
}

/// One rendered view: full lines for a terminal, one line for a log.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub lines: Vec<String>,
    pub status: String,
}

/// Where the dashboard draws and reads keys from.
pub trait Surface {
    /// Waits up to `timeout` for a key.
    fn poll_input(&mut self, timeout: Duration) -> Result<Input>;
    fn width(&self) -> usize;
    fn draw(&mut self, frame: &Frame) -> Result<()>;
}

/// Raw-mode alternate screen. Restored on drop.
pub struct TerminalSurface {
    out: Stdout,
}

impl TerminalSurface {
    pub fn acquire() -> Result<Self> {
        enable_raw_mode().with_terminal_context("cannot enable raw mode")?;
        let mut out = io::stdout();
        if let Err(e) = execute!(out, EnterAlternateScreen, Hide) {
            let _ = disable_raw_mode();
            return Err(e).with_terminal_context("cannot enter alternate screen");
        }
        debug!("terminal acquired");
        Ok(Self { out })
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        let _ = execute!(self.out, Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
        debug!("terminal restored");
    }
}

fn is_quit(key: &KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => true,
        // Raw mode turns Ctrl+C into a key instead of SIGINT.
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

impl Surface for TerminalSurface {
    fn poll_input(&mut self, timeout: Duration) -> Result<Input> {
        if !event::poll(timeout).with_terminal_context("input poll failed")? {
            return Ok(Input::None);
        }
        match event::read().with_terminal_context("input read failed")? {
            Event::Key(key) if is_quit(&key) => Ok(Input::Quit),
            _ => Ok(Input::None),
        }
    }

    fn width(&self) -> usize {
        terminal::size().map(|(w, _)| w as usize).unwrap_or(80)
    }

    fn draw(&mut self, frame: &Frame) -> Result<()> {
        let width = self.width();
        queue!(self.out, MoveTo(0, 0), Clear(ClearType::All))
            .with_terminal_context("draw failed")?;
        for (row, line) in frame.lines.iter().enumerate() {
            let clipped: String = line.chars().take(width).collect();
            queue!(self.out, MoveTo(0, row as u16), Print(clipped))
                .with_terminal_context("draw failed")?;
        }
        self.out.flush().with_terminal_context("draw failed")
    }
}

/// Used when stdout is not a terminal: no input, one status line per render.
pub struct PlainSurface<W: Write> {
    out: W,
}

impl<W: Write> PlainSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Surface for PlainSurface<W> {
    fn poll_input(&mut self, timeout: Duration) -> Result<Input> {
        thread::sleep(timeout);
        Ok(Input::None)
    }

    fn width(&self) -> usize {
        std::env::var("COLUMNS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(80)
    }

    fn draw(&mut self, frame: &Frame) -> Result<()> {
        writeln!(self.out, "{}", frame.status)?;
        self.out.flush()?;
        Ok(())
    }
}

pub struct Dashboard {
    reader: MetricsReader,
    counters: SharedCounters,
    stop: StopSignal,
    config: StressConfig,
    poll: Duration,
    render_every: Duration,
    started: Instant,
    prev_cpu: Option<CpuTimes>,
    prev_bytes: u64,
    prev_at: Instant,
    history: History,
    extrema: Extrema,
    last: MetricSample,
}

impl Dashboard {
    pub fn new(
        reader: MetricsReader,
        counters: SharedCounters,
        stop: StopSignal,
        config: StressConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            prev_cpu: reader.cpu_times(),
            prev_bytes: counters.bytes_written(),
            reader,
            counters,
            stop,
            config,
            poll: POLL_INTERVAL,
            render_every: RENDER_INTERVAL,
            started: now,
            prev_at: now,
            history: History::new(80),
            extrema: Extrema::default(),
            last: MetricSample::default(),
        }
    }

    /// Overrides the poll and render cadence.
    pub fn with_intervals(mut self, poll: Duration, render_every: Duration) -> Self {
        self.poll = poll;
        self.render_every = render_every.max(poll);
        self
    }

    /// Runs until the stop signal, the quit key, the configured duration, or a
    /// failing `supervise` check. The stop signal is set on every exit path
    /// except a failing check, which the caller handles.
    pub fn run<S, F>(&mut self, surface: &mut S, mut supervise: F) -> Result<()>
    where
        S: Surface + ?Sized,
        F: FnMut() -> Result<()>,
    {
        let mut next_render = Instant::now();
        loop {
            if self.stop.is_set() {
                debug!("stop signal observed");
                break;
            }
            if let Some(limit) = self.config.duration {
                if self.started.elapsed() >= limit {
                    info!("run duration of {}s reached", limit.as_secs());
                    self.stop.set();
                    break;
                }
            }
            if surface.poll_input(self.poll)? == Input::Quit {
                info!("quit key pressed");
                self.stop.set();
                break;
            }
            supervise()?;

            let now = Instant::now();
            if now >= next_render {
                let width = surface.width();
                self.history.resize(spark_width(width));
                self.sample(now);
                surface.draw(&self.render(width))?;
                next_render = now + self.render_every;
            }
        }
        Ok(())
    }

    /// Reads every source once and folds the result into history and extrema.
    pub fn sample(&mut self, now: Instant) -> MetricSample {
        let cur_cpu = self.reader.cpu_times();
        let cpu_pct = cpu_percent(self.prev_cpu, cur_cpu);
        if cur_cpu.is_some() {
            self.prev_cpu = cur_cpu;
        }

        let bytes = self.counters.bytes_written();
        let dt = now.saturating_duration_since(self.prev_at).as_secs_f64();
        let disk_mb_s = if dt > 0.001 {
            bytes.saturating_sub(self.prev_bytes) as f64 / MIB as f64 / dt
        } else {
            0.0
        };
        self.prev_bytes = bytes;
        self.prev_at = now;

        let mem = self.reader.memory();
        let sample = MetricSample {
            cpu_pct,
            mem_used_mb: mem.used_mb,
            mem_total_mb: mem.total_mb,
            disk_mb_s,
            freq_khz: self.reader.cpu_freq_khz(),
            temp_c: self.reader.temperature_c(),
            load: self.reader.load_average(),
        };
        self.extrema.observe(sample.freq_khz, sample.temp_c);
        self.history.record(&sample);
        self.last = sample;
        sample
    }

    pub fn render(&self, width: usize) -> Frame {
        let s = &self.last;
        let bar = bar_width(width);
        let mut lines = vec![
            "Stress All - press q to stop".to_string(),
            format!(
                "Uptime: {}s  CPU workers: {}  Memory target: {}  Disk: {}",
                self.started.elapsed().as_secs(),
                self.config.cpu_workers,
                if self.config.mem_enabled {
                    format!("{} MB", self.config.mem_target_mb)
                } else {
                    "off".to_string()
                },
                if self.config.disk_enabled {
                    format!("on (quota {})", format_bytes(self.config.disk_quota_bytes))
                } else {
                    "off".to_string()
                },
            ),
            match s.load {
                Some(l) => format!(
                    "Load: {:.2} {:.2} {:.2}  Memory: {}/{} MB",
                    l.one, l.five, l.fifteen, s.mem_used_mb, s.mem_total_mb
                ),
                None => format!("Load: n/a  Memory: {}/{} MB", s.mem_used_mb, s.mem_total_mb),
            },
            String::new(),
        ];

        let disk_max = self.history.disk_peak().max(1.0);
        lines.push(gauge_line(
            &format!("CPU  {:6.1}%", s.cpu_pct),
            s.cpu_pct,
            100.0,
            bar,
            &sparkline(self.history.cpu.iter(), 100.0),
        ));
        lines.push(gauge_line(
            &format!("MEM  {:6.1}%", s.mem_pct()),
            s.mem_pct(),
            100.0,
            bar,
            &sparkline(self.history.mem.iter(), 100.0),
        ));
        lines.push(gauge_line(
            &format!("DSK  {:6.1}MB/s", s.disk_mb_s),
            s.disk_mb_s,
            disk_max,
            bar,
            &sparkline(self.history.disk.iter(), disk_max),
        ));
        lines.push(String::new());

        lines.push(if self.extrema.freq_start_khz() > 0 {
            format!(
                "FREQ {}  start {}  min {}  drop {:.1}%  throttled: {}",
                format_ghz(s.freq_khz),
                format_ghz(self.extrema.freq_start_khz()),
                format_ghz(self.extrema.freq_min_khz()),
                self.extrema.freq_drop_pct(),
                self.extrema.throttled(s.freq_khz),
            )
        } else {
            "FREQ n/a".to_string()
        });
        lines.push(match (s.temp_c, self.extrema.temp_max_c()) {
            (Some(t), Some(max)) => format!("TEMP {:.1}C  max {:.1}C", t, max),
            (None, Some(max)) => format!("TEMP n/a  max {:.1}C", max),
            _ => "TEMP n/a".to_string(),
        });

        let disk_error = self.counters.disk_error();
        if disk_error {
            lines.push(String::new());
            lines.push("DISK ERROR: no space left on device, disk stress stopped".to_string());
        }

        let status = format!(
            "t={:.1}s cpu={:.1}% mem={:.1}% disk={:.1}MB/s freq={} temp={}{}",
            self.started.elapsed().as_secs_f64(),
            s.cpu_pct,
            s.mem_pct(),
            s.disk_mb_s,
            format_ghz(s.freq_khz),
            s.temp_c
                .map(|t| format!("{:.1}C", t))
                .unwrap_or_else(|| "n/a".to_string()),
            if disk_error { " DISK ERROR" } else { "" },
        );
        Frame { lines, status }
    }

    pub fn extrema(&self) -> Extrema {
        self.extrema
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn last_sample(&self) -> MetricSample {
        self.last
    }
}

fn bar_width(width: usize) -> usize {
    (width / 3).clamp(10, 40)
}

/// Columns left for the sparkline after the label and the gauge bar.
fn spark_width(width: usize) -> usize {
    width
        .saturating_sub(LABEL_WIDTH + bar_width(width) + 3)
        .max(10)
}

fn gauge_line(label: &str, value: f64, max: f64, bar: usize, spark: &str) -> String {
    format!("{:<w$}|{}| {}", label, gauge(value, max, bar), spark, w = LABEL_WIDTH)
}

/// Proportional bar of `width` cells, `#` filled and `-` empty.
pub fn gauge(value: f64, max: f64, width: usize) -> String {
    let ratio = if max > 0.0 {
        (value / max).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = (ratio * width as f64).round() as usize;
    format!("{}{}", "#".repeat(filled), "-".repeat(width - filled))
}

/// One character per value, scaled against `max`.
pub fn sparkline(values: impl Iterator<Item = f64>, max: f64) -> String {
    let max = if max > 0.0 { max } else { 1.0 };
    let top = (LEVELS.len() - 1) as f64;
    values
        .map(|v| {
            let idx = ((v / max).clamp(0.0, 1.0) * top) as usize;
            LEVELS[idx] as char
        })
        .collect()
}

fn format_ghz(khz: u64) -> String {
    if khz == 0 {
        "n/a".to_string()
    } else {
        format!("{:.2}GHz", khz as f64 / 1_000_000.0)
    }
}

/// Binary-scaled size, e.g. `1.50 GiB`.
pub fn format_bytes(bytes: u64) -> String {
    let value = bytes as f64;
    let (scaled, suffix) = if value >= (1u64 << 40) as f64 {
        (value / (1u64 << 40) as f64, "TiB")
    } else if value >= (1u64 << 30) as f64 {
        (value / (1u64 << 30) as f64, "GiB")
    } else if value >= (1u64 << 20) as f64 {
        (value / (1u64 << 20) as f64, "MiB")
    } else if value >= 1024.0 {
        (value / 1024.0, "KiB")
    } else {
        return format!("{} B", bytes);
    };
    format!("{:.2} {}", scaled, suffix)
}
