//! Beacon - availability monitor with supervised notification delivery.
//!
//! Main entry point for the Beacon CLI and daemon.

mod cli;
mod cmd_probe;
mod server;

use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use beacon_config::ConfigLoader;
use beacon_storage::SourceStatus;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = ConfigLoader::load_or_default(&cli.config)?;
    config.validate().map_err(anyhow::Error::msg)?;

    match cli.command {
        Some(Commands::Probe { kind, target }) => {
            server::init_console_tracing();
            let status = cmd_probe::run_probe(&config, &kind, &target).await?;
            println!("{}: {}", target, status);
            Ok(if status == SourceStatus::Online {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Some(Commands::Run { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run(config).await
        }
        None => run(config).await,
    }
}

async fn run(config: beacon_config::BeaconConfig) -> anyhow::Result<ExitCode> {
    server::init_tracing(&config.logging)?;
    info!("Using database {}", config.storage.path.display());
    server::run_server(config).await?;
    Ok(ExitCode::SUCCESS)
}
