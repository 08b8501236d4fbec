//! Supervisor of the notifying process.
//!
//! The supervisor never lets the process take the host down. Initialization
//! failures, unexpected exits, runtime faults and panics all end up in the
//! same place: the process is marked unhealthy with a recorded error, the
//! attempt counter goes up, and a restart is scheduled on the backoff policy.
//!
//! Lifecycle calls (`start`, `stop`, `restart`) are serialized by an async
//! mutex. The health state lives behind its own short-lived lock that is
//! never held across an await.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use beacon_config::{Settings, SupervisorConfig, format_duration};
use beacon_monitor::SourceMonitor;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::SupervisorError;
use crate::health::{PendingRestart, ProcessHealth};
use crate::launcher::{ProcessLauncher, ProcessMode};

/// Invoked when a restart timer fires.
pub type RestartHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct RestartTimer {
    id: u64,
    delay: Duration,
    due: DateTime<Utc>,
    handle: JoinHandle<()>,
}

struct RunningProcess {
    cancel: CancellationToken,
    monitor: Option<Arc<SourceMonitor>>,
    mode: Option<ProcessMode>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ProcessState {
    running: bool,
    healthy: bool,
    last_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    attempts: u32,
    timer: Option<RestartTimer>,
    process: Option<RunningProcess>,
    settings: Option<Settings>,
    /// Bumped on every start and stop so stale exit reports are ignored.
    generation: u64,
}

/// Owns the notifying process and drives its recovery.
pub struct Supervisor {
    launcher: Arc<dyn ProcessLauncher>,
    state: Mutex<ProcessState>,
    lifecycle: tokio::sync::Mutex<()>,
    restart_hook: RwLock<Option<RestartHook>>,
    shutdown_grace: Duration,
    settle_delay: Duration,
    timer_seq: AtomicU64,
    closed: AtomicBool,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, config: &SupervisorConfig) -> Self {
        Self {
            launcher,
            state: Mutex::new(ProcessState::default()),
            lifecycle: tokio::sync::Mutex::new(()),
            restart_hook: RwLock::new(None),
            shutdown_grace: config.shutdown_grace(),
            settle_delay: config.settle_delay(),
            timer_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Callback run by restart timers. Without one, a timer restarts with
    /// the settings of the last start.
    pub fn set_restart_hook(&self, hook: RestartHook) {
        *self.restart_hook.write() = Some(hook);
    }

    /// Launch the notifying process.
    ///
    /// Only [`SupervisorError::AlreadyRunning`] and, after [`Self::shutdown`],
    /// [`SupervisorError::ShutDown`] are returned. A launch failure
    /// leaves the process registered as running but unhealthy, with a restart
    /// scheduled.
    pub async fn start(self: &Arc<Self>, settings: Settings) -> Result<(), SupervisorError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.start_locked(settings).await
    }

    /// Stop the process and cancel any pending restart. Idempotent.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    /// Stop, wait the settle delay, then start with `settings`.
    pub async fn restart(self: &Arc<Self>, settings: Settings) -> Result<(), SupervisorError> {
        let _lifecycle = self.lifecycle.lock().await;
        info!("Restarting notifying process with new config...");
        self.stop_locked().await;
        tokio::time::sleep(self.settle_delay).await;
        self.start_locked(settings).await
    }

    /// Stop for good. Later timers and failures no longer schedule restarts.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop().await;
    }

    async fn start_locked(self: &Arc<Self>, settings: Settings) -> Result<(), SupervisorError> {
        // A restart timer that fired just before shutdown must not relaunch.
        if self.closed.load(Ordering::SeqCst) {
            return Err(SupervisorError::ShutDown);
        }
        let generation = {
            let mut state = self.state.lock();
            if state.running {
                return Err(SupervisorError::AlreadyRunning);
            }
            state.settings = Some(settings.clone());
            state.started_at = Some(Utc::now());
            state.last_error = None;
            state.healthy = false;
            state.generation += 1;
            state.generation
        };

        info!("Starting notifying process...");
        let cancel = CancellationToken::new();

        match self.launcher.launch(&settings, cancel.clone()).await {
            Ok(launched) => {
                let mut state = self.state.lock();
                let watcher = Arc::downgrade(self);
                let exit_cancel = cancel.clone();
                let run = tokio::spawn(launched.run);
                let task = tokio::spawn(async move {
                    let fault = exit_fault(run.await, &exit_cancel);
                    if let Some(supervisor) = watcher.upgrade() {
                        supervisor.on_process_exit(generation, fault);
                    }
                });

                state.running = true;
                state.healthy = true;
                state.attempts = 0;
                state.process = Some(RunningProcess {
                    cancel,
                    monitor: launched.monitor,
                    mode: Some(launched.mode),
                    task: Some(task),
                });
                info!("Notifying process started ({} mode)", launched.mode);
            }
            Err(e) => {
                {
                    let mut state = self.state.lock();
                    state.running = true;
                    state.healthy = false;
                    state.last_error = Some(e.to_string());
                    state.attempts += 1;
                    state.process = Some(RunningProcess {
                        cancel,
                        monitor: None,
                        mode: None,
                        task: None,
                    });
                }
                error!("Notifying process failed to start: {}", e);
                self.schedule_auto_restart();
            }
        }
        Ok(())
    }

    async fn stop_locked(&self) {
        let (process, timer) = {
            let mut state = self.state.lock();
            let timer = state.timer.take();
            if !state.running {
                (None, timer)
            } else {
                state.running = false;
                state.healthy = false;
                state.generation += 1;
                (state.process.take(), timer)
            }
        };

        if let Some(timer) = timer {
            timer.handle.abort();
            info!("Cancelled pending auto-restart");
        }
        let Some(process) = process else {
            return;
        };

        info!("Stopping notifying process...");
        process.cancel.cancel();
        let drain = async {
            if let Some(task) = process.task {
                let _ = task.await;
            }
            // A faulted process exits without draining its monitor.
            if let Some(monitor) = process.monitor {
                monitor.shutdown().await;
            }
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!(
                "Notifying process did not stop within {}",
                format_duration(self.shutdown_grace)
            );
        }
        info!("Notifying process stopped");
    }

    /// Arm a restart timer according to the backoff policy.
    ///
    /// No-op when auto-restart is disabled, the attempt limit is reached, or
    /// the supervisor has been shut down. Replaces any armed timer.
    pub fn schedule_auto_restart(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock();
        let Some(settings) = state.settings.as_ref() else {
            return;
        };
        let policy = BackoffPolicy::from_settings(&settings.auto_restart);
        if !policy.enabled {
            info!("Auto-restart disabled, not scheduling restart");
            return;
        }
        if !policy.allows(state.attempts) {
            warn!(
                "Max restart attempts ({}) reached, not scheduling restart",
                policy.max_attempts
            );
            return;
        }

        let delay = policy.delay(state.attempts.saturating_sub(1));
        let id = self.timer_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let supervisor = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(supervisor) = supervisor.upgrade() {
                supervisor.fire_restart(id).await;
            }
        });

        let due = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if let Some(old) = state.timer.replace(RestartTimer {
            id,
            delay,
            due,
            handle,
        }) {
            old.handle.abort();
        }
        info!(
            "Scheduling auto-restart in {} (attempt {})",
            format_duration(delay),
            state.attempts
        );
    }

    async fn fire_restart(self: Arc<Self>, id: u64) {
        let settings = {
            let mut state = self.state.lock();
            match &state.timer {
                Some(timer) if timer.id == id => {}
                _ => return,
            }
            // Disarm first: the restart below stops the process, and stop
            // aborts whatever timer is armed.
            state.timer = None;
            state.settings.clone()
        };
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        info!("Auto-restart timer triggered");
        let hook = self.restart_hook.read().clone();
        match (hook, settings) {
            (Some(hook), _) => hook().await,
            (None, Some(settings)) => {
                if let Err(e) = self.restart(settings).await {
                    error!("Auto-restart failed: {}", e);
                }
            }
            (None, None) => warn!("No settings recorded, cannot auto-restart"),
        }
    }

    fn on_process_exit(self: &Arc<Self>, generation: u64, fault: Option<String>) {
        let Some(fault) = fault else {
            debug!("Notifying process exited after cancellation");
            return;
        };
        {
            let mut state = self.state.lock();
            if state.generation != generation || !state.running {
                return;
            }
            state.healthy = false;
            state.last_error = Some(fault.clone());
            state.attempts += 1;
        }
        error!("Notifying process failed: {}", fault);
        self.schedule_auto_restart();
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn is_healthy(&self) -> bool {
        let state = self.state.lock();
        state.running && state.healthy
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// Monitor of the running process, if it came up.
    pub fn monitor(&self) -> Option<Arc<SourceMonitor>> {
        let state = self.state.lock();
        state.process.as_ref().and_then(|p| p.monitor.clone())
    }

    /// Settings of the most recent start.
    pub fn settings(&self) -> Option<Settings> {
        self.state.lock().settings.clone()
    }

    pub fn health(&self) -> ProcessHealth {
        let state = self.state.lock();
        let process = state.process.as_ref();
        ProcessHealth {
            running: state.running,
            healthy: state.running && state.healthy,
            last_error: state.last_error.clone(),
            started_at: state.started_at,
            attempts: state.attempts,
            pending: state.timer.as_ref().map(|t| PendingRestart {
                delay: t.delay,
                due: t.due,
            }),
            mode: process.and_then(|p| p.mode),
            active_sources: process
                .and_then(|p| p.monitor.as_ref())
                .map(|m| m.active_count())
                .unwrap_or(0),
        }
    }
}

/// Classify how the process task ended. `None` means a requested stop.
fn exit_fault(
    result: Result<Result<(), SupervisorError>, JoinError>,
    cancel: &CancellationToken,
) -> Option<String> {
    match result {
        Ok(_) if cancel.is_cancelled() => None,
        Ok(Ok(())) => Some("notifying process stopped unexpectedly".to_string()),
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) if e.is_panic() => Some(format!(
            "notifying process panicked: {}",
            panic_message(e.into_panic())
        )),
        Err(_) if cancel.is_cancelled() => None,
        Err(e) => Some(format!("notifying process aborted: {}", e)),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
