//! # stress_all
//!
//! Drives CPU, memory and disk to a configurable load while a live terminal
//! dashboard samples the host, then prints a summary on exit.
//!
//! - [`config`]: CLI flags and the derived run configuration
//! - [`shared`]: cross-process byte counter, disk-error flag and stop signal
//! - [`workers`]: forked CPU, memory and disk stressors
//! - [`metrics`]: proc/sysfs readers
//! - [`sample`]: per-tick samples, extrema and display history
//! - [`dashboard`]: render/input loop and terminal surfaces
//! - [`report`]: final summary
//! - [`controller`]: lifecycle and shutdown

pub mod config;
pub mod controller;
pub mod dashboard;
pub mod error;
pub mod metrics;
pub mod report;
pub mod sample;
pub mod shared;
pub mod workers;

pub use config::{Args, StressConfig};
pub use controller::{Controller, Phase, RunOutcome};
pub use error::{Result, StressError};
