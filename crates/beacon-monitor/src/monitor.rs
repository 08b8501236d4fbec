//! Source monitor: one check task per source.
//!
//! Each source gets its own task that checks immediately, then on every tick
//! of its interval. Detected transitions are written to storage before the
//! cached copy changes and before the notification sink is invoked. Sink
//! delivery runs on a separate task so it never stalls a check loop.
//!
//! The source cache and the task registry are guarded by separate read/write
//! locks. Neither lock is held across a probe, a storage write or a
//! notification. When both are needed, `tasks` is taken before `sources`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use beacon_storage::{CheckOutcome, MonitoredSource, Repository, SourceStatus};
use chrono::Utc;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::checker::Checker;
use crate::error::MonitorError;
use crate::retention::{SWEEP_PERIOD, spawn_sweeper};
use crate::sink::{NotificationSink, dispatch};

/// Shortest check interval a task will tick at.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

struct SourceTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Concurrent per-source check scheduler.
pub struct SourceMonitor {
    repo: Repository,
    checker: Checker,
    sink: Option<Arc<dyn NotificationSink>>,
    notify_timeout: Duration,
    retention: Option<Duration>,
    cancel: CancellationToken,
    sources: RwLock<HashMap<String, MonitoredSource>>,
    tasks: RwLock<HashMap<String, SourceTask>>,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SourceMonitor {
    /// Create a monitor whose tasks are children of `cancel`.
    pub fn new(repo: Repository, checker: Checker, cancel: CancellationToken) -> Self {
        Self {
            repo,
            checker,
            sink: None,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            retention: None,
            cancel,
            sources: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            sweeper: parking_lot::Mutex::new(None),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Purge status changes older than `retention` while running.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Load enabled sources and launch one task each.
    ///
    /// Only a failure to read the source list is returned; a source that
    /// cannot be launched is logged and skipped. Returns how many started.
    pub async fn start(self: &Arc<Self>) -> Result<usize, MonitorError> {
        let sources = self.repo.enabled_sources().await?;
        info!("Loaded {} enabled sources", sources.len());

        let total = sources.len();
        let mut started = 0;
        for source in sources {
            let name = source.name.clone();
            match self.add_source(source) {
                Ok(()) => started += 1,
                Err(e) => warn!("Failed to start monitoring {}: {}", name, e),
            }
        }

        if let Some(retention) = self.retention {
            let handle = spawn_sweeper(
                self.repo.clone(),
                retention,
                SWEEP_PERIOD,
                self.cancel.child_token(),
            );
            if let Some(old) = self.sweeper.lock().replace(handle) {
                old.abort();
            }
        }

        info!("Monitor started with {}/{} sources active", started, total);
        Ok(started)
    }

    /// Register a source and launch its check task.
    pub fn add_source(self: &Arc<Self>, source: MonitoredSource) -> Result<(), MonitorError> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&source.id) {
            return Err(MonitorError::AlreadyMonitored(source.id));
        }

        let id = source.id.clone();
        let span = info_span!("source", source_id = %id, name = %source.name);
        debug!(
            source_id = %id,
            kind = %source.kind,
            target = %source.target,
            interval = ?source.check_interval(),
            "Starting check task"
        );
        self.sources.write().insert(id.clone(), source);

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(
            Arc::clone(self)
                .run_source(id.clone(), cancel.clone())
                .instrument(span),
        );
        tasks.insert(id, SourceTask { cancel, handle });
        debug!("Active check tasks: {}", tasks.len());
        Ok(())
    }

    /// Cancel a source's task and drop it from the cache.
    ///
    /// Returns once the task has finished, so the id can be re-added
    /// immediately without two tasks overlapping.
    pub async fn remove_source(&self, id: &str) -> Result<(), MonitorError> {
        let task = self
            .tasks
            .write()
            .remove(id)
            .ok_or_else(|| MonitorError::NotMonitored(id.to_string()))?;
        let name = self
            .sources
            .write()
            .remove(id)
            .map(|s| s.name)
            .unwrap_or_default();

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            if e.is_panic() {
                error!(source_id = %id, "Check task panicked: {}", e);
            }
        }

        info!(source_id = %id, "Stopped monitoring {}", name);
        Ok(())
    }

    /// Replace a source: stop its task (if any), then start a fresh one.
    pub async fn update_source(self: &Arc<Self>, source: MonitoredSource) -> Result<(), MonitorError> {
        match self.remove_source(&source.id).await {
            Ok(()) | Err(MonitorError::NotMonitored(_)) => {}
            Err(e) => return Err(e),
        }
        self.add_source(source)
    }

    /// Disable a source. Its task keeps ticking but every tick is skipped.
    pub async fn pause_source(&self, id: &str) -> Result<(), MonitorError> {
        self.set_enabled(id, false).await
    }

    /// Re-enable a source, starting its task if none is running.
    pub async fn resume_source(self: &Arc<Self>, id: &str) -> Result<(), MonitorError> {
        self.set_enabled(id, true).await?;

        if !self.is_monitored(id) {
            if let Some(source) = self.repo.get_source(id).await? {
                match self.add_source(source) {
                    Ok(()) | Err(MonitorError::AlreadyMonitored(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), MonitorError> {
        let cached = match self.sources.write().get_mut(id) {
            Some(source) => {
                source.enabled = enabled;
                true
            }
            None => false,
        };

        match self.repo.set_enabled(id, enabled).await {
            Ok(source) => {
                info!(source_id = %id, enabled, "{} {}", if enabled { "Resumed" } else { "Paused" }, source.name);
                Ok(())
            }
            Err(e) if e.is_not_found() && !cached => Err(MonitorError::SourceNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Run one check of `source` without recording anything.
    pub async fn check_source(&self, source: &MonitoredSource) -> SourceStatus {
        self.checker.check(source, Utc::now()).await
    }

    /// Check a monitored source now, through the same path as a tick.
    ///
    /// Runs even when the source is paused.
    pub async fn check_now(&self, id: &str) -> Result<SourceStatus, MonitorError> {
        let cancel = self.cancel.child_token();
        self.tick(id, &cancel, true)
            .await
            .ok_or_else(|| MonitorError::NotMonitored(id.to_string()))
    }

    /// Apply a heartbeat that was already persisted by the caller.
    ///
    /// Updates the cached copy so the next tick sees it. If the source was
    /// cached as offline this is a transition: the event is persisted and the
    /// sink notified on a background task. Returns `None` when the source is
    /// not cached.
    pub fn record_heartbeat_received(
        &self,
        id: &str,
        received_at: chrono::DateTime<Utc>,
    ) -> Option<CheckOutcome> {
        let (source, outcome) = {
            let mut sources = self.sources.write();
            let source = sources.get_mut(id)?;
            let outcome = source.record_heartbeat(received_at);
            (source.clone(), outcome)
        };

        if let CheckOutcome::Transition(event) = &outcome {
            info!(source_id = %id, "Heartbeat restored {}", source.name);
            let repo = self.repo.clone();
            let sink = self.sink.clone();
            let limit = self.notify_timeout;
            let event = event.clone();
            tokio::spawn(async move {
                persist(&repo, &source, &CheckOutcome::Transition(event.clone())).await;
                if let Some(sink) = sink {
                    dispatch(sink, source, event, limit);
                }
            });
        }
        Some(outcome)
    }

    /// Cached copy of a source, falling back to storage.
    pub async fn get_source(&self, id: &str) -> Result<Option<MonitoredSource>, MonitorError> {
        let cached = self.sources.read().get(id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        Ok(self.repo.get_source(id).await?)
    }

    /// Cached sources, ordered by name.
    pub fn list_sources(&self) -> Vec<MonitoredSource> {
        let mut sources: Vec<_> = self.sources.read().values().cloned().collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        sources
    }

    pub fn is_monitored(&self, id: &str) -> bool {
        self.tasks.read().contains_key(id)
    }

    /// Number of running check tasks.
    pub fn active_count(&self) -> usize {
        self.tasks.read().len()
    }

    /// Cancel every task and wait for all of them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<SourceTask> = self.tasks.write().drain().map(|(_, t)| t).collect();
        self.sources.write().clear();
        let count = tasks.len();
        for task in tasks {
            let _ = task.handle.await;
        }
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }
        info!("Monitor stopped ({} check tasks)", count);
    }

    async fn run_source(self: Arc<Self>, id: String, cancel: CancellationToken) {
        let Some(interval) = self.sources.read().get(&id).map(|s| s.check_interval()) else {
            return;
        };
        let interval = interval.max(MIN_CHECK_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if self.tick(&id, &cancel, false).await.is_some() {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if self.tick(&id, &cancel, false).await.is_none() {
                            break;
                        }
                    }
                }
            }
        }
        debug!("Check task stopped");
    }

    /// One check-and-record cycle.
    ///
    /// Returns `None` when the task should stop (source gone or cancelled),
    /// otherwise the source's status after the cycle.
    async fn tick(&self, id: &str, cancel: &CancellationToken, force: bool) -> Option<SourceStatus> {
        let snapshot = self.sources.read().get(id).cloned()?;
        if !snapshot.enabled && !force {
            debug!("Skipping paused source");
            return Some(snapshot.status);
        }

        let started = Utc::now();
        let probed = if snapshot.kind.is_active() {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                status = self.check_source(&snapshot) => Some(status),
            }
        } else {
            None
        };

        let before = self.sources.read().get(id).cloned()?;
        if !before.enabled && !force {
            return Some(before.status);
        }
        let mut source = before.clone();
        let outcome = match probed {
            Some(status) => source.apply_check(status, started),
            None => {
                let now = Utc::now();
                let status = source.passive_status(now);
                source.apply_check(status, now)
            }
        };

        // Storage first, then the cache, then notification.
        persist(&self.repo, &source, &outcome).await;
        self.store_observation(&before, &source);

        match &outcome {
            CheckOutcome::Transition(event) => {
                info!(
                    "Status change: {} -> {} after {}ms",
                    event.old_status, event.new_status, event.duration_ms
                );
                if let Some(sink) = &self.sink {
                    dispatch(sink.clone(), source.clone(), event.clone(), self.notify_timeout);
                }
            }
            CheckOutcome::Baseline => debug!("Initial status {}", source.status),
            CheckOutcome::Unchanged => debug!("Status {}", source.status),
        }
        Some(source.status)
    }

    /// Copy the fields a check touched back into the cache. A heartbeat that
    /// changed the status in the meantime is kept.
    fn store_observation(&self, before: &MonitoredSource, after: &MonitoredSource) {
        let mut sources = self.sources.write();
        let Some(cached) = sources.get_mut(&after.id) else {
            return;
        };
        if cached.status == before.status && cached.last_change_time == before.last_change_time {
            cached.status = after.status;
            cached.last_change_time = after.last_change_time;
        }
        if after.kind.is_active() {
            cached.last_check_time = after.last_check_time;
        }
    }
}

/// Write the result of one observation. Failures are logged only.
async fn persist(repo: &Repository, source: &MonitoredSource, outcome: &CheckOutcome) {
    match outcome {
        CheckOutcome::Transition(event) => {
            if let Err(e) = repo.save_status_change(event).await {
                error!(source_id = %source.id, "Failed to save status change: {}", e);
            }
            if let Err(e) = repo.update_status_fields(source).await {
                error!(source_id = %source.id, "Failed to update source status: {}", e);
            }
        }
        CheckOutcome::Baseline => {
            if let Err(e) = repo.update_status_fields(source).await {
                error!(source_id = %source.id, "Failed to update source status: {}", e);
            }
        }
        CheckOutcome::Unchanged => {
            if let (true, Some(at)) = (source.kind.is_active(), source.last_check_time) {
                if let Err(e) = repo.touch_last_check(&source.id, at).await {
                    error!(source_id = %source.id, "Failed to update check time: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
