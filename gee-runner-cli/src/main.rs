//! gee-runner - run Earth Engine Code Editor scripts headlessly
//!
//! Loads one JSON parameter bundle (or every bundle in a directory), injects
//! it into the caller script and runs the script against the Earth Engine
//! client, with `users/...` imports served from a local module root.

use clap::{Parser, Subcommand};
use colored::Colorize;
use convenient_gee::orchestrator::{DEFAULT_KEY_FILE, DEFAULT_LOG_DIR, KEY_FILE_ENV};
use convenient_gee::sandbox::INJECTED_PARAMETERS;
use convenient_gee::{
    BatchSummary, ExperimentReport, LocalEarthEngine, Orchestrator, OutputMode, RunnerConfig,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gee-runner")]
#[command(about = "Run Google Earth Engine Code Editor scripts against JSON parameter bundles")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a caller script once per parameter bundle
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Caller script to execute
    caller_script: PathBuf,

    /// Local checkout of the users/<account>/<repo> repositories
    module_root: PathBuf,

    /// Parameter bundle, or a directory of bundles with --batch
    sidecar: PathBuf,

    /// Validate the bundle(s) and stop before authentication
    #[arg(long)]
    dry_run: bool,

    /// Show debug output
    #[arg(short, long, conflicts_with_all = ["quiet", "silent"])]
    verbose: bool,

    /// Hide progress output
    #[arg(short, long, conflicts_with = "silent")]
    quiet: bool,

    /// Hide progress and script output
    #[arg(long)]
    silent: bool,

    /// Do not write per-experiment log files
    #[arg(long)]
    no_log: bool,

    /// Run every *.json bundle in the sidecar directory
    #[arg(long)]
    batch: bool,

    /// Requested number of concurrent experiments (experiments run sequentially)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    parallel: u16,

    /// Service account key file
    #[arg(long, env = KEY_FILE_ENV, default_value = DEFAULT_KEY_FILE)]
    key_file: PathBuf,

    /// Directory for experiment log files
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Log exports instead of submitting them
    #[arg(long)]
    no_submit: bool,

    /// Leave submitted tasks unstarted
    #[arg(long)]
    no_auto_start: bool,

    /// Write the run report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Name the parameter bundle is bound to in the caller script
    #[arg(long, default_value = INJECTED_PARAMETERS)]
    injected_name: String,
}

impl RunArgs {
    fn output_mode(&self) -> OutputMode {
        if self.verbose {
            OutputMode::Verbose
        } else if self.silent {
            OutputMode::Silent
        } else if self.quiet {
            OutputMode::Quiet
        } else {
            OutputMode::Normal
        }
    }

    fn runner_config(&self) -> RunnerConfig {
        let mut config = RunnerConfig::new(&self.caller_script, &self.module_root);
        config.dry_run = self.dry_run;
        config.output_mode = self.output_mode();
        config.log_dir.clone_from(&self.log_dir);
        config.log_to_file = !self.no_log;
        config.key_file.clone_from(&self.key_file);
        config.parallelism = usize::from(self.parallel);
        config.submit_exports = !self.no_submit;
        config.auto_start = !self.no_auto_start;
        config.injected_name.clone_from(&self.injected_name);
        config
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let Commands::Run(args) = cli.command;

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    tokio::spawn(watch_signals());

    let succeeded = run(&args).await;
    process::exit(if succeeded { 0 } else { 1 });
}

async fn run(args: &RunArgs) -> bool {
    let orchestrator = Orchestrator::new(args.runner_config(), Rc::new(LocalEarthEngine::new()));

    if args.batch {
        let summary = match orchestrator.run_batch(&args.sidecar).await {
            Ok(summary) => summary,
            Err(err) => {
                error!("{}", err);
                return false;
            }
        };
        print_summary(&summary);
        write_report(args.report.as_deref(), &summary);
        summary.succeeded()
    } else {
        let report = orchestrator.run_experiment(&args.sidecar).await;
        print_report(&report);
        write_report(args.report.as_deref(), &report);
        report.succeeded()
    }
}

fn print_report(report: &ExperimentReport) {
    let line = report.to_string();
    if report.succeeded() {
        println!("{}", line.green());
    } else {
        println!("{}", line.red());
    }
}

fn print_summary(summary: &BatchSummary) {
    println!();
    for report in &summary.reports {
        print_report(report);
    }
    let totals = format!("{} passed, {} failed", summary.passed(), summary.failed());
    if summary.succeeded() {
        println!("{}", totals.bold().green());
    } else {
        println!("{}", totals.bold().red());
    }
}

fn write_report<T: Serialize>(path: Option<&Path>, report: &T) {
    let Some(path) = path else {
        return;
    };
    let written = serde_json::to_string_pretty(report)
        .map_err(|e| e.to_string())
        .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));
    match written {
        Ok(()) => info!("Report written to {}", path.display()),
        Err(err) => error!("Failed to write report {}: {}", path.display(), err),
    }
}

/// Exit on Ctrl-C (130) or SIGTERM (143) without cleaning up in-flight work
async fn watch_signals() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                error!("Cannot listen for SIGTERM: {}", err);
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown("SIGINT", 130);
                }
                return;
            }
        };
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    shutdown("SIGINT", 130);
                }
            }
            _ = terminate.recv() => shutdown("SIGTERM", 143),
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown("SIGINT", 130);
        }
    }
}

fn shutdown(signal: &str, code: i32) {
    eprintln!("\n🛑 Received {signal}, shutting down");
    process::exit(code);
}
