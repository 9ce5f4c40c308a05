//! Worker pool: every stressor runs as its own forked process.
//!
//! Children share nothing with the parent except the mapped
//! [`SharedCounters`]/[`StopSignal`] region. They poll the stop flag and never
//! install their own signal handling; the parent reaps them and kills any
//! that outlive the join timeout. A child's stdout and stderr point at
//! `/dev/null` so nothing it prints can land on the dashboard; failures reach
//! the parent through the exit status.

pub mod cpu;
pub mod disk;
pub mod memory;

use std::fmt;
use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{debug, info, warn};

use crate::config::StressConfig;
use crate::error::{Result, StressError};
use crate::shared::{SharedCounters, StopSignal};

const EXIT_OK: i32 = 0;
const EXIT_FATAL: i32 = 3;
const EXIT_IO: i32 = 4;
const EXIT_PANIC: i32 = 101;

const REAP_POLL: Duration = Duration::from_millis(20);
/// How long a SIGKILLed child gets to show up in `waitpid`.
pub const KILL_GRACE: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerKind {
    Cpu,
    Memory,
    Disk,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Cpu => write!(f, "CPU"),
            WorkerKind::Memory => write!(f, "Memory"),
            WorkerKind::Disk => write!(f, "Disk"),
        }
    }
}

/// What a forked unit runs.
#[derive(Clone, Debug)]
pub enum Routine {
    Cpu,
    Memory { target_mb: u64 },
    Disk { path: PathBuf, quota: u64 },
}

impl Routine {
    pub fn kind(&self) -> WorkerKind {
        match self {
            Routine::Cpu => WorkerKind::Cpu,
            Routine::Memory { .. } => WorkerKind::Memory,
            Routine::Disk { .. } => WorkerKind::Disk,
        }
    }

    fn execute(&self, stop: &StopSignal, counters: &SharedCounters) -> Result<()> {
        match self {
            Routine::Cpu => {
                cpu::run(stop);
            }
            Routine::Memory { target_mb } => {
                memory::run(stop, *target_mb);
            }
            Routine::Disk { path, quota } => {
                disk::run(stop, counters.clone(), path, *quota)?;
            }
        }
        Ok(())
    }
}

/// Units for a config: one CPU routine per worker, then memory, then disk.
pub fn plan(config: &StressConfig) -> Vec<Routine> {
    let mut routines = vec![Routine::Cpu; config.cpu_workers];
    if config.mem_enabled {
        routines.push(Routine::Memory {
            target_mb: config.mem_target_mb,
        });
    }
    if config.disk_enabled {
        routines.push(Routine::Disk {
            path: config.disk_file(),
            quota: config.disk_quota_bytes,
        });
    }
    routines
}

#[derive(Debug)]
struct Worker {
    kind: WorkerKind,
    pid: Pid,
    status: Option<WaitStatus>,
    killed: bool,
}

impl Worker {
    fn alive(&self) -> bool {
        self.status.is_none() && !self.killed
    }
}

/// How the pool's children ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub exited: usize,
    pub killed: usize,
    pub pids: Vec<Pid>,
}

pub struct WorkerPool {
    stop: StopSignal,
    counters: SharedCounters,
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(stop: StopSignal, counters: SharedCounters) -> Self {
        Self {
            stop,
            counters,
            workers: Vec::new(),
        }
    }

    /// Forks every routine. Units already started stay owned by the pool when
    /// a later fork fails.
    pub fn spawn_all(&mut self, routines: &[Routine]) -> Result<()> {
        for routine in routines {
            self.spawn(routine)?;
        }
        info!(workers = self.workers.len(), "worker pool started");
        Ok(())
    }

    pub fn spawn(&mut self, routine: &Routine) -> Result<Pid> {
        let kind = routine.kind();
        // SAFETY: the parent forks from its only thread; the child runs the
        // routine and leaves through `_exit` without returning to the caller.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                debug!(%kind, pid = child.as_raw(), "worker forked");
                self.workers.push(Worker {
                    kind,
                    pid: child,
                    status: None,
                    killed: false,
                });
                Ok(child)
            }
            Ok(ForkResult::Child) => {
                detach_stdio();
                let code = run_child(routine, &self.stop, &self.counters);
                // SAFETY: skip atexit handlers and buffers inherited from the parent.
                unsafe { libc::_exit(code) }
            }
            Err(e) => Err(StressError::WorkerSpawn {
                kind,
                reason: e.to_string(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn alive(&self) -> usize {
        self.workers.iter().filter(|w| w.alive()).count()
    }

    /// Reaps finished children without blocking. A child that ended with a
    /// failure status is an error; a clean early exit (disk full) is not.
    pub fn check(&mut self) -> Result<()> {
        for worker in self.workers.iter_mut().filter(|w| w.alive()) {
            match waitpid(worker.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(status) => {
                    worker.status = Some(status);
                    if let Some(desc) = failure(status) {
                        return Err(StressError::WorkerFailed {
                            kind: worker.kind,
                            status: desc,
                        });
                    }
                    debug!(kind = %worker.kind, "worker exited cleanly");
                }
                Err(Errno::ECHILD) => worker.status = Some(WaitStatus::Exited(worker.pid, 0)),
                Err(e) => warn!(kind = %worker.kind, "waitpid failed: {}", e),
            }
        }
        Ok(())
    }

    /// Sets the stop signal, waits up to `timeout` for every child, then
    /// kills whatever is left.
    pub fn shutdown(&mut self, timeout: Duration) -> ShutdownReport {
        self.stop.set();
        let deadline = Instant::now() + timeout;
        loop {
            self.reap_quietly();
            if self.alive() == 0 || Instant::now() >= deadline {
                break;
            }
            thread::sleep(REAP_POLL);
        }

        let mut report = ShutdownReport {
            pids: self.workers.iter().map(|w| w.pid).collect(),
            ..Default::default()
        };
        for worker in &mut self.workers {
            if worker.alive() {
                warn!(kind = %worker.kind, pid = worker.pid.as_raw(), "worker missed join timeout, killing");
                force_kill(worker);
                report.killed += 1;
            } else {
                report.exited += 1;
            }
        }
        info!(exited = report.exited, killed = report.killed, "worker pool stopped");
        report
    }

    fn reap_quietly(&mut self) {
        for worker in self.workers.iter_mut().filter(|w| w.alive()) {
            match waitpid(worker.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(status) => {
                    if let Some(desc) = failure(status) {
                        warn!(kind = %worker.kind, "worker ended with {}", desc);
                    }
                    worker.status = Some(status);
                }
                Err(_) => worker.status = Some(WaitStatus::Exited(worker.pid, 0)),
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in self.workers.iter_mut().filter(|w| w.status.is_none()) {
            if worker.killed {
                let _ = waitpid(worker.pid, Some(WaitPidFlag::WNOHANG));
            } else {
                force_kill(worker);
            }
        }
    }
}

/// Sends SIGKILL and waits at most [`KILL_GRACE`] for the exit. A child stuck
/// in uninterruptible sleep still counts as killed; the kernel tears it down
/// once the sleep ends and only the zombie is left unreaped.
fn force_kill(worker: &mut Worker) {
    if let Err(e) = kill(worker.pid, Signal::SIGKILL) {
        debug!(pid = worker.pid.as_raw(), "kill failed: {}", e);
    }
    worker.killed = true;
    worker.status = reap_within(worker.pid, KILL_GRACE);
    if worker.status.is_none() {
        warn!(kind = %worker.kind, pid = worker.pid.as_raw(), "killed worker not reaped within {:?}", KILL_GRACE);
    }
}

/// Polls `waitpid` without blocking until the child is gone or `grace`
/// elapses. `None` means it is still there.
fn reap_within(pid: Pid, grace: Duration) -> Option<WaitStatus> {
    let deadline = Instant::now() + grace;
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => {}
            Ok(status) => return Some(status),
            Err(Errno::ECHILD) => return Some(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Err(e) => {
                debug!(pid = pid.as_raw(), "waitpid failed: {}", e);
                return None;
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(REAP_POLL);
    }
}

/// Points stdout and stderr at `/dev/null`.
fn detach_stdio() {
    let Ok(null) = OpenOptions::new().write(true).open("/dev/null") else {
        return;
    };
    for fd in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are open and owned by this process.
        unsafe { libc::dup2(null.as_raw_fd(), fd) };
    }
}

fn failure(status: WaitStatus) -> Option<String> {
    match status {
        WaitStatus::Exited(_, EXIT_OK) => None,
        WaitStatus::Exited(_, EXIT_FATAL) => Some("fatal error, exit status 3".to_string()),
        WaitStatus::Exited(_, EXIT_IO) => Some("I/O error, exit status 4".to_string()),
        WaitStatus::Exited(_, EXIT_PANIC) => Some("panicked".to_string()),
        WaitStatus::Exited(_, code) => Some(format!("exit status {}", code)),
        WaitStatus::Signaled(_, sig, _) => Some(format!("killed by {}", sig)),
        _ => None,
    }
}

fn run_child(routine: &Routine, stop: &StopSignal, counters: &SharedCounters) -> i32 {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| routine.execute(stop, counters)));
    match outcome {
        Ok(Ok(())) => EXIT_OK,
        Ok(Err(e)) => {
            warn!(kind = %routine.kind(), "worker failed: {}", e);
            exit_code(&e)
        }
        Err(_) => EXIT_PANIC,
    }
}

fn exit_code(err: &StressError) -> i32 {
    match err {
        StressError::Io(_) | StressError::DiskWrite(_) => EXIT_IO,
        _ => EXIT_FATAL,
    }
}
