//! Clipforge launcher.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use clipforge::{Collaborators, Orchestrator};
use clipforge_logging::{init_logging, LogConfig};
use clipforge_protocol::{defaults, OrchestratorConfig};
use clipforge_store::Store;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "clipforge", about = "Media processing orchestrator")]
struct Cli {
    /// Data root for the store, logs and project artifacts.
    #[arg(long, env = "CLIPFORGE_DATA_ROOT")]
    data_root: Option<PathBuf>,

    /// Mirror the full log stream to stderr.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the orchestrator service (the default).
    Serve {
        /// Dispatcher worker count.
        #[arg(long, env = "CLIPFORGE_WORKERS")]
        workers: Option<usize>,
    },
    /// Delete terminal jobs older than the retention window.
    Cleanup {
        #[arg(long, default_value_t = defaults::DEFAULT_RETENTION_DAYS)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let data_root = match cli.data_root {
        Some(root) => root,
        None => dirs::home_dir()
            .context("could not determine home directory; pass --data-root")?
            .join(".clipforge"),
    };
    let mut config = OrchestratorConfig::from_env(&data_root);

    let logs = init_logging(LogConfig {
        app_name: "clipforge",
        logs_dir: config.logs_dir(),
        verbose: cli.verbose,
    })?;

    match cli.command.unwrap_or(Command::Serve { workers: None }) {
        Command::Serve { workers } => {
            if let Some(workers) = workers {
                config.worker_count = workers.max(1);
            }
            let orchestrator = Orchestrator::start(config, logs, Collaborators::default())
                .await
                .context("failed to start orchestrator")?;
            wait_for_shutdown().await;
            orchestrator.shutdown().await;
            info!("goodbye");
        }
        Command::Cleanup { days } => {
            let store = Store::open(&config.data_root.join(defaults::DB_FILE_NAME))
                .await
                .context("failed to open store")?;
            let deleted = store
                .jobs
                .purge_older_than(Utc::now() - ChronoDuration::days(days))
                .await?;
            println!("Deleted {deleted} terminal job(s) older than {days} day(s)");
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!(%err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received ctrl-c");
}
