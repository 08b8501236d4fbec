//! CLI definitions for Beacon.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Beacon CLI.
#[derive(Debug, Parser)]
#[command(name = "beacon")]
#[command(about = "Availability monitor with supervised notification delivery")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config/beacon.toml",
        env = "BEACON_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Run the monitor and API server in foreground (default)
    Run {
        /// API server host, overrides the config file
        #[arg(long)]
        host: Option<String>,

        /// API server port, overrides the config file
        #[arg(long)]
        port: Option<u16>,
    },

    /// Check one target once with the stored settings
    Probe {
        /// Check kind: probe-address (ping) or probe-url (http)
        kind: String,

        /// Host address or URL
        target: String,
    },
}
