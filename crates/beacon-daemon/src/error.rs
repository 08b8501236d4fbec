//! Supervisor errors.

use beacon_config::ConfigError;
use beacon_monitor::MonitorError;
use thiserror::Error;

/// Errors raised while managing the notifying process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// `start` was called while a process is already registered.
    #[error("Notifying process already running")]
    AlreadyRunning,

    /// The supervisor was shut down and no longer starts processes.
    #[error("Supervisor is shut down")]
    ShutDown,

    /// Settings the process cannot run with.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The monitor or a channel failed to come up.
    #[error("{0}")]
    Monitor(#[from] MonitorError),

    /// The process died, panicked or reported an unrecoverable fault.
    #[error("{0}")]
    Fault(String),

    /// Failed to set up signal handlers.
    #[error("Failed to set up signal handlers: {0}")]
    SignalSetup(String),
}

impl SupervisorError {
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault(message.into())
    }
}
