//! Error types for the stress harness.
//!
//! Metric sources that are missing never show up here: the reader maps them to
//! neutral values. Disk exhaustion is not an error either, the disk worker
//! latches `disk_error` and stops on its own.

use std::io;

use thiserror::Error;

use crate::workers::WorkerKind;

/// Main error type for stress_all
#[derive(Error, Debug)]
pub enum StressError {
    /// Invalid flags or an unusable working directory
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O failure outside the disk worker's write path
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The cross-process counter region could not be mapped
    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    /// Signal handler registration failed
    #[error("Signal setup error: {0}")]
    Signal(String),

    /// Raw mode, alternate screen or drawing failed
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// fork() failed for a worker unit
    #[error("Failed to start {kind} worker: {reason}")]
    WorkerSpawn { kind: WorkerKind, reason: String },

    /// A worker process exited with a failure status
    #[error("{kind} worker failed ({status})")]
    WorkerFailed { kind: WorkerKind, status: String },

    /// A disk write failed for a reason other than running out of space
    #[error("Disk write failed: {0}")]
    DiskWrite(io::Error),
}

/// Result type using StressError
pub type Result<T> = std::result::Result<T, StressError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_config_context(self, msg: &str) -> Result<T>;
    fn with_terminal_context(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_config_context(self, msg: &str) -> Result<T> {
        self.map_err(|e| StressError::Config(format!("{}: {}", msg, e)))
    }

    fn with_terminal_context(self, msg: &str) -> Result<T> {
        self.map_err(|e| StressError::Terminal(format!("{}: {}", msg, e)))
    }
}

impl StressError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        StressError::Config(msg.into())
    }

    /// Exit status the binary uses for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            StressError::Config(_) => 2,
            _ => 1,
        }
    }
}
