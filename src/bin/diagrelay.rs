//! # diagrelay CLI - GC log shipping sidecar
//!
//! Ships the JVM garbage-collection log of a pod to the diagnostic service.
//!
//! ## Usage
//! ```bash
//! # One cycle: sweep rotated logs, ship new bytes of gc.log
//! diagrelay poll
//!
//! # Run forever at DIAGNOSTIC_SCAN_INTERVAL (default 5s)
//! diagrelay schedule
//!
//! # Ten cycles, one second apart, whole-file overwrite mode
//! diagrelay --delivery overwrite schedule --interval 1s --cycles 10
//!
//! # Show the effective configuration
//! diagrelay config
//! ```
//!
//! Every flag can also be given through the environment variable named in
//! `--help`.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use diagrelay::utils::{format_bytes, shorten_target};
use diagrelay::{
    ActiveOutcome, DeliveryPolicy, GcLogRelay, PollReport, RelayConfig, RelayError,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code of `poll` when any step of the cycle failed
const EXIT_CYCLE_FAILED: i32 = 2;

/// diagrelay - ship rotating GC logs to the diagnostic service
#[derive(Parser)]
#[command(name = "diagrelay")]
#[command(version)]
#[command(about = "Ship rotating JVM GC logs to a remote diagnostic store")]
#[command(long_about = None)]
struct Cli {
    /// Load the configuration from a JSON file instead of the environment
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Diagnostic log root; GC logs are read from its `gc` subdirectory
    #[arg(long, global = true, env = "NC_DIAGNOSTIC_LOG_FOLDER")]
    log_root: Option<PathBuf>,

    /// Exact directory holding the GC log (overrides --log-root)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Name of the active log
    #[arg(long, global = true)]
    file_name: Option<String>,

    /// Base URL of the diagnostic service
    #[arg(long, global = true, env = "NC_DIAGNOSTIC_AGENT_SERVICE")]
    service: Option<String>,

    /// Namespace segment of remote targets
    #[arg(long, global = true, env = "CLOUD_NAMESPACE")]
    namespace: Option<String>,

    /// Pod segment of remote targets (defaults to the host name)
    #[arg(long, global = true, env = "POD_NAME")]
    pod: Option<String>,

    /// How growth of the active log is shipped
    #[arg(long, global = true, value_enum, env = "NC_DIAGNOSTIC_GC_DELIVERY")]
    delivery: Option<DeliveryMode>,

    /// Per-request timeout, e.g. "30s"
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Print reports as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single cycle
    Poll,

    /// Run cycles periodically until interrupted
    #[command(alias = "run")]
    Schedule {
        /// Time between cycles, e.g. "5s"
        #[arg(short, long, env = "DIAGNOSTIC_SCAN_INTERVAL", value_parser = humantime::parse_duration)]
        interval: Option<Duration>,

        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum DeliveryMode {
    Append,
    Overwrite,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let message = match e.downcast_ref::<RelayError>() {
                Some(relay_error) => relay_error.user_message(),
                None => format!("{:#}", e),
            };
            eprintln!("{}: {}", "Error".red().bold(), message);
            std::process::exit(1);
        }
    }
}

/// Main command runner, returns the process exit code
fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = effective_config(&cli)?;

    match cli.command {
        Commands::Poll => cmd_poll(config, cli.json),
        Commands::Schedule { interval, cycles } => {
            if let Some(interval) = interval {
                config.scan_interval = interval;
            }
            cmd_schedule(config, cycles, cli.json)
        }
        Commands::Config => cmd_config(&config),
    }
}

/// Environment (or file) first, then explicit flags on top
fn effective_config(cli: &Cli) -> anyhow::Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RelayConfig::from_env()?,
    };

    if let Some(root) = &cli.log_root {
        config.log_dir = root.join(diagrelay::config::GC_LOG_SUBFOLDER);
    }
    if let Some(dir) = &cli.log_dir {
        config.log_dir = dir.clone();
    }
    if let Some(name) = &cli.file_name {
        config.file_name = name.clone();
    }
    if let Some(service) = &cli.service {
        config.remote.service_url = service.clone();
    }
    if let Some(namespace) = &cli.namespace {
        config.remote.namespace = namespace.clone();
    }
    if let Some(pod) = &cli.pod {
        config.remote.pod_name = pod.clone();
    }
    if let Some(mode) = cli.delivery {
        config.policy = match mode {
            DeliveryMode::Append => DeliveryPolicy::Append,
            DeliveryMode::Overwrite => DeliveryPolicy::overwrite_default(),
        };
    }
    if let Some(timeout) = cli.timeout {
        config.request_timeout = timeout;
    }

    Ok(config)
}

/// Run one cycle and print its report
fn cmd_poll(config: RelayConfig, json: bool) -> anyhow::Result<i32> {
    let mut relay = GcLogRelay::from_config(config)?;
    let report = relay.poll_once();
    print_report(&report, json)?;

    Ok(if report.has_failures() { EXIT_CYCLE_FAILED } else { 0 })
}

/// Run cycles until SIGINT/SIGTERM or the cycle limit
fn cmd_schedule(config: RelayConfig, cycles: Option<u64>, json: bool) -> anyhow::Result<i32> {
    let mut relay = GcLogRelay::from_config(config)?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = stop.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, finishing current cycle...");
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("installing signal handler")?;

    let ran = relay.run_with(&stop, cycles, |report| {
        if let Err(e) = print_report(report, json) {
            warn!("Failed to print report: {}", e);
        }
    });

    if !json {
        println!("{} Stopped after {} cycles", "✓".green().bold(), ran);
    }
    Ok(0)
}

/// Print the effective configuration as JSON
fn cmd_config(config: &RelayConfig) -> anyhow::Result<i32> {
    println!("{}", config.to_json()?);
    if let Err(e) = config.validate() {
        eprintln!("{}: {}", "Warning".yellow().bold(), e.user_message());
    }
    Ok(0)
}

fn print_report(report: &PollReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    let time = report.started_at.format("%H:%M:%S").to_string();
    if !report.directory_present {
        println!("{} {}", time.dimmed(), "log directory missing, nothing to do".dimmed());
        return Ok(());
    }

    let marker = if report.has_failures() {
        "✗".red().bold()
    } else {
        "✓".green().bold()
    };

    let sweep = &report.sweep;
    let rotated = if sweep.found == 0 {
        "no rotated logs".dimmed().to_string()
    } else {
        format!(
            "rotated: {} found, {} uploaded, {} deleted{}",
            sweep.found,
            sweep.uploaded,
            sweep.deleted,
            if sweep.failed > 0 {
                format!(", {} failed", sweep.failed).red().to_string()
            } else {
                String::new()
            }
        )
    };

    println!("{} {} {} | {}", marker, time.dimmed(), rotated, describe_active(report.active.as_ref()));
    Ok(())
}

fn describe_active(outcome: Option<&ActiveOutcome>) -> String {
    match outcome {
        None | Some(ActiveOutcome::Missing) => "active: missing".dimmed().to_string(),
        Some(ActiveOutcome::Empty) => "active: empty".dimmed().to_string(),
        Some(ActiveOutcome::Skipped { .. }) => "active: up to date".dimmed().to_string(),
        Some(ActiveOutcome::Delivered { cause, offset, bytes, target }) => format!(
            "active: {} at offset {} ({}) -> {}",
            format_bytes(*bytes).cyan(),
            offset,
            cause.to_string().yellow(),
            shorten_target(target, 60)
        ),
        Some(ActiveOutcome::Failed { stage, error }) => {
            format!("active: {} ({:?})", error, stage).red().to_string()
        }
    }
}
