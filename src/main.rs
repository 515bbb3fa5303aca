// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use icingadb::{Config, Daemon, SyncError};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Synchronize Icinga 2 state from Redis into the database.
#[derive(Debug, Parser)]
#[command(name = "icingadb", version)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/icingadb/config.yml")]
    config: PathBuf,
}

fn load_config(path: &PathBuf) -> Result<Config, SyncError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SyncError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    serde_yaml::from_str(&raw).map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
}

async fn run(args: Args) -> Result<(), SyncError> {
    let config = load_config(&args.config)?;
    let daemon = Daemon::connect(config).await?;

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = stop.send(true);
        }
    });

    daemon.run(shutdown).await
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Fatal error");
            ExitCode::FAILURE
        }
    }
}
