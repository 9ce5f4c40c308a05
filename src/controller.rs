//! Run lifecycle: Init → Running → Stopping → Reported, exactly once.

use std::fs;
use std::io;
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::SigId;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::config::StressConfig;
use crate::dashboard::{Dashboard, Surface, POLL_INTERVAL, RENDER_INTERVAL};
use crate::error::{Result, StressError};
use crate::metrics::MetricsReader;
use crate::report::ReportSummary;
use crate::shared::{self, SharedCounters, StopSignal};
use crate::workers::{self, ShutdownReport, WorkerPool};

/// How long stopped workers get to exit before they are killed.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Running,
    Stopping,
    Reported,
}

/// Everything a finished run produced. `report` exists even when `result`
/// carries a fatal error.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: ReportSummary,
    pub shutdown: ShutdownReport,
    pub phase: Phase,
    pub result: Result<()>,
}

pub struct Controller {
    config: StressConfig,
    reader: MetricsReader,
    counters: SharedCounters,
    stop: StopSignal,
    signals: Vec<SigId>,
    phase: Phase,
    join_timeout: Duration,
    poll: Duration,
    render_every: Duration,
    workdir_guard: Option<TempDir>,
}

impl Controller {
    /// Init: maps the shared region and routes SIGINT/SIGTERM to the stop
    /// signal.
    pub fn new(config: StressConfig) -> Result<Self> {
        let (counters, stop) = shared::create()?;
        let mut signals = Vec::new();
        for sig in [SIGINT, SIGTERM] {
            let handler_stop = stop.clone();
            // SAFETY: the handler performs a single atomic swap, which is
            // async-signal-safe, and never allocates or locks.
            let id = unsafe {
                signal_hook::low_level::register(sig, move || {
                    handler_stop.set();
                })
            }
            .map_err(|e| StressError::Signal(format!("signal {}: {}", sig, e)))?;
            signals.push(id);
        }
        debug!(?config, "controller initialised");

        Ok(Self {
            config,
            reader: MetricsReader::new(),
            counters,
            stop,
            signals,
            phase: Phase::Init,
            join_timeout: JOIN_TIMEOUT,
            poll: POLL_INTERVAL,
            render_every: RENDER_INTERVAL,
            workdir_guard: None,
        })
    }

    /// Keeps a temporary working directory alive until the controller drops.
    pub fn with_workdir_guard(mut self, guard: Option<TempDir>) -> Self {
        self.workdir_guard = guard;
        self
    }

    pub fn with_metrics_reader(mut self, reader: MetricsReader) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_dashboard_intervals(mut self, poll: Duration, render_every: Duration) -> Self {
        self.poll = poll;
        self.render_every = render_every;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn counters(&self) -> SharedCounters {
        self.counters.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &StressConfig {
        &self.config
    }

    /// Runs the whole lifecycle. `surface` is dropped, restoring the terminal,
    /// before workers are joined and the report is taken.
    pub fn run<S: Surface>(mut self, surface: S) -> RunOutcome {
        self.enter(Phase::Running);
        let mut pool = WorkerPool::new(self.stop.clone(), self.counters.clone());
        let mut dashboard = Dashboard::new(
            self.reader.clone(),
            self.counters.clone(),
            self.stop.clone(),
            self.config.clone(),
        )
        .with_intervals(self.poll, self.render_every);

        let result = self.drive(&mut pool, &mut dashboard, surface);

        self.enter(Phase::Stopping);
        if let Err(e) = &result {
            error!("run aborted: {}", e);
        }
        self.stop.set();
        let shutdown = pool.shutdown(self.join_timeout);
        self.remove_disk_file();

        self.enter(Phase::Reported);
        let report = ReportSummary::collect(
            &self.config,
            &self.reader,
            &self.counters,
            dashboard.extrema(),
        );
        RunOutcome {
            report,
            shutdown,
            phase: self.phase,
            result,
        }
    }

    fn drive<S: Surface>(
        &self,
        pool: &mut WorkerPool,
        dashboard: &mut Dashboard,
        mut surface: S,
    ) -> Result<()> {
        pool.spawn_all(&workers::plan(&self.config))?;
        info!(
            cpu_workers = self.config.cpu_workers,
            mem_target_mb = self.config.mem_target_mb,
            disk = self.config.disk_enabled,
            "stress running"
        );
        dashboard.run(&mut surface, || pool.check())
    }

    fn enter(&mut self, next: Phase) {
        debug!(from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
    }

    fn remove_disk_file(&self) {
        if !self.config.disk_enabled {
            return;
        }
        let path = self.config.disk_file();
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "disk stress file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("cannot remove {}: {}", path.display(), e),
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        for id in self.signals.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
