use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::process;
use std::sync::Mutex;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stress_all::dashboard::{PlainSurface, TerminalSurface};
use stress_all::metrics::MetricsReader;
use stress_all::{Args, Controller, Result, RunOutcome, StressConfig};

fn main() {
    let args = Args::parse();
    init_logging(&args);

    match run(&args) {
        Ok(outcome) => {
            println!("{}", outcome.report);
            if let Err(e) = outcome.result {
                error!("Stress run failed: {}", e);
                eprintln!("stress_all: {}", e);
                process::exit(e.exit_code());
            }
        }
        Err(e) => {
            error!("Startup failed: {}", e);
            eprintln!("stress_all: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn run(args: &Args) -> Result<RunOutcome> {
    let reader = MetricsReader::new();
    let (config, workdir_guard) = StressConfig::resolve(args, &reader)?;
    info!(
        "Version {}, writing to {}",
        env!("CARGO_PKG_VERSION"),
        config.workdir.display()
    );

    let controller = Controller::new(config)?
        .with_metrics_reader(reader)
        .with_workdir_guard(workdir_guard);

    if !io::stdout().is_terminal() {
        return Ok(controller.run(PlainSurface::new(io::stdout())));
    }
    match TerminalSurface::acquire() {
        Ok(surface) => Ok(controller.run(surface)),
        Err(e) => {
            warn!("{}, falling back to plain output", e);
            Ok(controller.run(PlainSurface::new(io::stdout())))
        }
    }
}

/// Initialize logging based on flags; `RUST_LOG` still overrides.
fn init_logging(args: &Args) {
    let level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stress_all={}", level)));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact();

    let installed = match &args.log_file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => tracing::subscriber::set_global_default(
                builder.with_ansi(false).with_writer(Mutex::new(file)).finish(),
            ),
            Err(e) => {
                eprintln!("cannot open log file {}: {}", path.display(), e);
                tracing::subscriber::set_global_default(builder.with_writer(io::stderr).finish())
            }
        },
        None => tracing::subscriber::set_global_default(builder.with_writer(io::stderr).finish()),
    };
    if let Err(e) = installed {
        eprintln!("failed to install log subscriber: {}", e);
    }
}
