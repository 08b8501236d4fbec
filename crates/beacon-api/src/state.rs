//! Application state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_config::{ConfigStore, keys};
use beacon_daemon::{RestartCoordinator, Supervisor};
use beacon_storage::Repository;

/// State shared across handlers.
pub struct AppState {
    pub repo: Repository,
    pub config: Arc<ConfigStore>,
    pub coordinator: Arc<RestartCoordinator>,
    start_time: Instant,
}

impl AppState {
    pub fn new(
        repo: Repository,
        config: Arc<ConfigStore>,
        coordinator: Arc<RestartCoordinator>,
    ) -> Self {
        Self {
            repo,
            config,
            coordinator,
            start_time: Instant::now(),
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        self.coordinator.supervisor()
    }

    /// Time since the API state was created.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Admin key currently required, read live so a change applies at once.
    pub fn api_key(&self) -> Option<String> {
        self.config.get(keys::API_KEY).filter(|k| !k.is_empty())
    }
}
