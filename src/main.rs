//! ferry - run a playbook against a fleet of hosts over SSH
//!
//! This is the main entry point for the ferry CLI.

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use cli::{Cli, LogFormat};
use ferry::config::Settings;
use ferry::context::ExecContext;
use ferry::error::Error;
use ferry::executor::{Executor, RunSummary};
use ferry::inventory::Inventory;
use ferry::playbook::Playbook;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status after an interrupt or termination signal.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity(), cli.log_format);

    let exit_code = match run(&cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            err.downcast_ref::<Error>()
                .map_or(1, Error::exit_code)
        }
    };

    std::process::exit(exit_code);
}

/// Initialize the tracing subscriber.
fn init_logging(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(verbosity >= 2))
            .init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn run(cli: &Cli) -> Result<i32> {
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    let config = settings
        .merge(cli.settings())
        .into_run_config(&cli.playbook)?;

    let inventory = Inventory::from_file(&config.inventory)?;
    let playbook = Playbook::from_file(&config.playbook).await?;
    info!(
        playbook = %config.playbook.display(),
        hosts = inventory.len(),
        tasks = playbook.tasks.len(),
        "Loaded playbook"
    );

    let ctx = ExecContext::new();
    spawn_signal_handler(ctx.clone());

    let summary = Executor::new(config)
        .run(&ctx, Arc::new(playbook), &inventory)
        .await;
    report(&inventory, &summary);

    if let Some(cause) = ctx.err() {
        error!(cause = %cause, "Abnormal termination");
        return Ok(EXIT_INTERRUPTED);
    }

    Ok(0)
}

/// Cancel `ctx` on the first interrupt or termination signal.
fn spawn_signal_handler(ctx: ExecContext) {
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(signal) => {
                warn!(signal, "Received signal, cancelling remote commands");
                ctx.cancel();
            }
            Err(e) => error!(error = %e, "Failed to install signal handler"),
        }
    });
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for SIGINT")?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    Ok("ctrl-c")
}

fn report(inventory: &Inventory, summary: &RunSummary) {
    info!(
        batches = summary.batches,
        duration = ?summary.duration,
        "Run finished"
    );

    if !summary.completed.is_empty() {
        info!("Completed: {}", summary.completed.join(", "));
    }

    for host in inventory.hosts() {
        if let Some(err) = host.error() {
            if host.is_unreachable() {
                warn!(host = %host.address(), "Unreachable: {}", err);
            } else {
                warn!(host = %host.address(), "Failed: {}", err);
            }
        }
    }

    if !summary.pending.is_empty() {
        warn!("Not run: {}", summary.pending.join(", "));
    }
}
