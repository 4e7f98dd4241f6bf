//! `stormbatch`
//!
//! Runs the localisation analysis over every sufficiently long movie in a
//! directory, a bounded number of processes at a time. Ctrl+C stops new
//! submissions, interrupts running analyses and waits for them to exit.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stormbatch_core::config::load_config;
use stormbatch_core::{Config, DaxInspector, InspectFailurePolicy};
use stormbatch_runner::{CommandLauncher, DiscoveryConfig, RunReport, Supervisor, discover};

/// Exit status of a run stopped by an interrupt.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "stormbatch")]
#[command(version, about = "Batch localisation analysis over a directory of movies")]
struct Args {
    /// Directory containing the movies to analyse
    input_dir: PathBuf,

    /// Directory receiving one localisation list per movie
    output_dir: PathBuf,

    /// Analysis parameters file passed to every job
    config_xml: PathBuf,

    /// Analysis script or executable
    #[arg(long, env = "STORMBATCH_ENTRY_POINT")]
    entry_point: Option<PathBuf>,

    /// Interpreter that runs the entry point (default: python)
    #[arg(long, conflicts_with = "no_interpreter")]
    interpreter: Option<String>,

    /// Execute the entry point directly instead of through an interpreter
    #[arg(long)]
    no_interpreter: bool,

    /// Maximum concurrent analysis processes
    #[arg(long)]
    max_processes: Option<usize>,

    /// Movies need strictly more frames than this to be analysed
    #[arg(long)]
    minimum_length: Option<u64>,

    /// Fail the whole batch when a movie header cannot be read
    #[arg(long)]
    abort_on_inspect_error: bool,

    /// Seconds to wait after an interrupt before killing analyses that are still running
    #[arg(long)]
    kill_after: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation)
    #[arg(long)]
    log_json: bool,

    /// Directory holding `.stormbatch/settings.json` (default: current directory)
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// OpenTelemetry OTLP endpoint for trace export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "STORMBATCH_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of the resolved configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(n) = self.max_processes {
            config.batch.max_processes = n;
        }
        if let Some(n) = self.minimum_length {
            config.batch.minimum_length = n;
        }
        if self.abort_on_inspect_error {
            config.batch.on_inspect_error = InspectFailurePolicy::Abort;
        }
        if self.no_interpreter {
            config.analysis.interpreter = None;
        } else if let Some(interpreter) = &self.interpreter {
            config.analysis.interpreter = Some(interpreter.clone());
        }
        if let Some(entry_point) = &self.entry_point {
            config.analysis.entry_point = Some(entry_point.clone());
        }
        if let Some(secs) = self.kill_after {
            config.cancellation.kill_after_secs = Some(secs);
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if self.log_json {
            config.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let project_dir = args
        .project_dir
        .clone()
        .or_else(|| std::env::current_dir().ok());
    let mut config = load_config(project_dir.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    #[cfg(feature = "metrics")]
    let metrics_endpoint = args.metrics_endpoint.as_deref();
    #[cfg(not(feature = "metrics"))]
    let metrics_endpoint: Option<&str> = None;

    let level = &config.logging.level;
    let log_filter =
        format!("stormbatch={level},stormbatch_runner={level},stormbatch_core={level}");
    let telemetry = stormbatch_core::tracing_init::init_tracing_with_metrics(
        &log_filter,
        config.logging.json,
        metrics_endpoint,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        input_dir = %args.input_dir.display(),
        output_dir = %args.output_dir.display(),
        max_processes = config.batch.max_processes,
        "Starting stormbatch"
    );

    let cancel = CancellationToken::new();
    let listener = spawn_interrupt_listener(cancel.clone());
    let result = run_batch(&args, &config, &cancel).await;
    listener.abort();
    telemetry.shutdown();

    let report = result?;
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        not_submitted = report.not_submitted,
        "Batch complete"
    );

    if report.cancelled {
        Ok(ExitCode::from(EXIT_CANCELLED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Discover the movies and run the batch. Telemetry stays up until this
/// returns, whatever the outcome.
async fn run_batch(
    args: &Args,
    config: &Config,
    cancel: &CancellationToken,
) -> anyhow::Result<RunReport> {
    let entry_point = config.analysis.entry_point.clone().context(
        "No analysis entry point configured (use --entry-point or analysis.entry_point)",
    )?;

    std::fs::create_dir_all(&args.output_dir).with_context(|| {
        format!(
            "Cannot create output directory {}",
            args.output_dir.display()
        )
    })?;

    let discovery = DiscoveryConfig::from_config(
        config,
        args.input_dir.clone(),
        args.output_dir.clone(),
        args.config_xml.clone(),
    );
    let jobs = discover(&discovery, &DaxInspector)?;
    info!(jobs = jobs.len(), "Movies selected for analysis");

    let launcher = CommandLauncher::new(entry_point)
        .with_interpreter(config.analysis.interpreter.clone());
    let supervisor = Supervisor::new(launcher, config.batch.max_processes)
        .with_kill_after(config.cancellation.kill_after());

    Ok(supervisor.run(jobs, cancel).await?)
}

/// Cancel `cancel` on Ctrl+C or, on Unix, SIGTERM.
fn spawn_interrupt_listener(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => Some(signal),
                Err(e) => {
                    warn!(error = %e, "Cannot listen for SIGTERM");
                    None
                }
            };

        #[cfg(unix)]
        let sigterm_future = async {
            match sigterm.as_mut() {
                Some(signal) => {
                    signal.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<()>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Cannot listen for Ctrl+C");
                    return;
                }
                info!("Received Ctrl+C, stopping submission");
            }
            () = sigterm_future => {
                info!("Received SIGTERM, stopping submission");
            }
        }

        cancel.cancel();
    })
}
