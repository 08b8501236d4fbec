//! Restart coordinator: configuration changes drive supervisor restarts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use beacon_config::{ConfigChange, ConfigStore};
use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::health::HealthSnapshot;
use crate::error::SupervisorError;
use crate::supervisor::Supervisor;

/// Bridges the configuration store to the supervisor.
pub struct RestartCoordinator {
    supervisor: Arc<Supervisor>,
    config: Arc<ConfigStore>,
    restarts: AtomicU64,
}

impl RestartCoordinator {
    /// Create the coordinator and make it the supervisor's restart hook, so
    /// timer-driven restarts also pick up the latest settings.
    pub fn new(supervisor: Arc<Supervisor>, config: Arc<ConfigStore>) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            supervisor,
            config,
            restarts: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&coordinator);
        coordinator.supervisor.set_restart_hook(Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.restart_now("auto-restart").await;
                }
            }) as BoxFuture<'static, ()>
        }));
        coordinator
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// A configuration value was committed. Restarts in the background.
    pub fn on_config_changed(self: &Arc<Self>, change: &ConfigChange) -> JoinHandle<()> {
        info!("Config changed ({}), triggering restart...", change.key);
        self.spawn_restart("config change")
    }

    /// Operator-requested restart, bypassing any armed backoff timer.
    pub fn force_reload(self: &Arc<Self>) -> JoinHandle<()> {
        info!("Forced reload requested");
        self.spawn_restart("forced reload")
    }

    /// Follow the configuration store until cancelled.
    pub fn spawn_listener(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut changes = self.config.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(change) => {
                            coordinator.on_config_changed(&change);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            // Settings are re-read on restart, so one covers them all.
                            warn!("Missed {} config changes, restarting once", skipped);
                            coordinator.spawn_restart("config change");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Number of restarts this coordinator has performed.
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Aggregate health of the notifying process. No side effects.
    pub fn status(&self) -> HealthSnapshot {
        let settings = self
            .supervisor
            .settings()
            .unwrap_or_else(|| self.config.settings());
        let policy = BackoffPolicy::from_settings(&settings.auto_restart);
        HealthSnapshot::assemble(&self.supervisor.health(), &policy, Utc::now())
    }

    fn spawn_restart(self: &Arc<Self>, reason: &'static str) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.restart_now(reason).await })
    }

    async fn restart_now(&self, reason: &str) {
        let settings = self.config.settings();
        info!("Restarting notifying process ({})", reason);
        match self.supervisor.restart(settings).await {
            Ok(()) if self.supervisor.is_healthy() => info!("Notifying process restarted"),
            Ok(()) => warn!(
                "Notifying process restarted with errors: {}",
                self.supervisor.last_error().unwrap_or_default()
            ),
            Err(SupervisorError::ShutDown) => {
                debug!("Skipping restart ({}): supervisor is shut down", reason);
                return;
            }
            Err(e) => error!("Failed to restart notifying process: {}", e),
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
