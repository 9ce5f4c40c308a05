use std::collections::VecDeque;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::kill;

use stress_all::config::MIB;
use stress_all::controller::JOIN_TIMEOUT;
use stress_all::dashboard::{Frame, Input, Surface};
use stress_all::metrics::MetricsReader;
use stress_all::{Controller, Phase, Result, RunOutcome, StressConfig, StressError};

/// Surface that plays back a fixed key script and records frames.
struct Scripted {
    keys: VecDeque<Input>,
    frames: usize,
}

impl Scripted {
    fn idle() -> Self {
        Self::keys([])
    }

    fn keys(keys: impl IntoIterator<Item = Input>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            frames: 0,
        }
    }
}

impl Surface for Scripted {
    fn poll_input(&mut self, timeout: Duration) -> Result<Input> {
        thread::sleep(timeout);
        Ok(self.keys.pop_front().unwrap_or(Input::None))
    }

    fn width(&self) -> usize {
        80
    }

    fn draw(&mut self, _frame: &Frame) -> Result<()> {
        self.frames += 1;
        Ok(())
    }
}

fn config(workdir: PathBuf) -> StressConfig {
    StressConfig {
        cpu_workers: 1,
        mem_enabled: true,
        mem_target_mb: 64,
        disk_enabled: true,
        disk_quota_bytes: 16 * MIB,
        workdir,
        duration: None,
    }
}

fn controller(config: StressConfig) -> Controller {
    Controller::new(config)
        .unwrap()
        .with_dashboard_intervals(Duration::from_millis(20), Duration::from_millis(60))
}

fn assert_all_reaped(outcome: &RunOutcome) {
    assert!(!outcome.shutdown.pids.is_empty());
    for pid in &outcome.shutdown.pids {
        assert_eq!(kill(*pid, None), Err(Errno::ESRCH), "pid {} still exists", pid);
    }
}

#[test]
fn external_stop_reaches_reported_within_join_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(config(dir.path().to_path_buf()));
    let stop = controller.stop_signal();

    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(500));
        stop.set();
        Instant::now()
    });
    let outcome = controller.run(Scripted::idle());
    let finished = Instant::now();
    let stopped_at = trigger.join().unwrap();

    assert!(outcome.result.is_ok(), "{:?}", outcome.result);
    assert_eq!(outcome.phase, Phase::Reported);
    assert!(finished.duration_since(stopped_at) < JOIN_TIMEOUT + Duration::from_secs(2));
    assert_eq!(outcome.shutdown.exited + outcome.shutdown.killed, 3);
    assert_all_reaped(&outcome);

    let disk = outcome.report.disk.unwrap();
    assert!(disk.bytes_written % (4 * MIB) == 0);
    assert!(!dir.path().join("stress_all.dat").exists());
}

#[test]
fn quit_key_without_disk_omits_disk_lines() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path().to_path_buf());
    cfg.disk_enabled = false;
    let mut keys = vec![Input::None; 10];
    keys.push(Input::Quit);

    let outcome = controller(cfg).run(Scripted::keys(keys));

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.phase, Phase::Reported);
    assert_all_reaped(&outcome);
    let text = outcome.report.to_string();
    assert!(text.contains("CPU workers: 1"));
    assert!(text.contains("Memory target: 64 MB"));
    assert!(!text.contains("Disk bytes written"));
    assert!(!text.contains("no space"));
}

#[test]
fn fatal_disk_failure_still_reports_and_reaps() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path().join("missing"));
    cfg.mem_enabled = false;

    let outcome = controller(cfg).run(Scripted::idle());

    assert!(matches!(
        outcome.result,
        Err(StressError::WorkerFailed { .. })
    ));
    assert_eq!(outcome.phase, Phase::Reported);
    assert_all_reaped(&outcome);
    assert!(outcome.report.to_string().starts_with("=== Stress All Report ==="));
}

#[test]
fn duration_limit_ends_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path().to_path_buf());
    cfg.duration = Some(Duration::from_millis(400));
    let started = Instant::now();

    let outcome = controller(cfg).run(Scripted::idle());

    assert!(outcome.result.is_ok());
    assert!(started.elapsed() < Duration::from_millis(400) + JOIN_TIMEOUT + Duration::from_secs(2));
    assert_all_reaped(&outcome);
}

/// Depends on nothing else allocating on the host while it runs.
#[test]
#[ignore = "reads host-wide memory usage"]
fn memory_worker_raises_usage_by_target() {
    let reader = MetricsReader::new();
    let baseline = reader.memory().used_mb;
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path().to_path_buf());
    cfg.disk_enabled = false;
    cfg.mem_target_mb = 256;
    let controller = controller(cfg);
    let stop = controller.stop_signal();

    let sampler = thread::spawn(move || {
        thread::sleep(Duration::from_secs(3));
        let used = MetricsReader::new().memory().used_mb;
        stop.set();
        used
    });
    let outcome = controller.run(Scripted::idle());
    let used = sampler.join().unwrap();

    assert!(outcome.result.is_ok());
    let delta = used.saturating_sub(baseline);
    assert!(delta.abs_diff(256) <= 64, "memory grew by {} MB", delta);
}
