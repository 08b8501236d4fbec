//! # Beacon Daemon
//!
//! Keeps the notifying process alive.
//!
//! ## Features
//!
//! - Supervised start/stop/restart of the notifying process
//! - Exponential backoff auto-restart with a cancelable timer
//! - Panic and fault containment at the process boundary
//! - Configuration changes and SIGHUP turned into restarts
//! - Health snapshot for the status endpoint
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_daemon::{NotifierLauncher, RestartCoordinator, Supervisor};
//!
//! let launcher = Arc::new(NotifierLauncher::new(repo.clone()));
//! let supervisor = Arc::new(Supervisor::new(launcher, &config.supervisor));
//! let coordinator = RestartCoordinator::new(supervisor.clone(), store.clone());
//! supervisor.start(store.settings()).await?;
//! coordinator.spawn_listener(cancel.child_token());
//! ```

pub mod backoff;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod launcher;
pub mod signal;
pub mod supervisor;

pub use backoff::BackoffPolicy;
pub use coordinator::RestartCoordinator;
pub use error::SupervisorError;
pub use health::{HealthSnapshot, HealthStatus, ProcessHealth};
pub use launcher::{LaunchedProcess, NotifierLauncher, ProcessLauncher, ProcessMode};
pub use signal::{DaemonSignal, SignalHandler};
pub use supervisor::{RestartHook, Supervisor};
