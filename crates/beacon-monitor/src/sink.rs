//! Notification sinks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_storage::{MonitoredSource, SourceStatus, StatusChangeEvent};
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::error::MonitorError;
use crate::message::status_change_line;

/// Receives status transitions and attempts delivery.
///
/// May be called concurrently from many source tasks.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Channel name.
    fn name(&self) -> &str;

    /// Deliver one transition.
    async fn notify(
        &self,
        source: &MonitoredSource,
        event: &StatusChangeEvent,
    ) -> Result<(), MonitorError>;
}

/// Log sink (writes to tracing).
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(
        &self,
        source: &MonitoredSource,
        event: &StatusChangeEvent,
    ) -> Result<(), MonitorError> {
        let line = status_change_line(source, event);
        match event.new_status {
            SourceStatus::Online => info!(source_id = %source.id, "[STATUS] {}", line),
            _ => warn!(source_id = %source.id, "[STATUS] {}", line),
        }
        Ok(())
    }
}

/// Delivers to every channel. One channel failing never affects another.
pub struct SinkFanout {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl SinkFanout {
    /// Fan-out with the log sink only.
    pub fn new() -> Self {
        Self {
            sinks: vec![Arc::new(LogSink)],
        }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Deliver to all channels concurrently, returning the failures.
    pub async fn deliver(
        &self,
        source: &MonitoredSource,
        event: &StatusChangeEvent,
    ) -> Vec<MonitorError> {
        let results = join_all(self.sinks.iter().map(|sink| async move {
            sink.notify(source, event)
                .await
                .map_err(|e| (sink.name().to_string(), e))
        }))
        .await;

        let mut errors = Vec::new();
        for result in results {
            if let Err((name, e)) = result {
                error!(source_id = %source.id, "Failed to notify via {}: {}", name, e);
                errors.push(e);
            }
        }
        errors
    }
}

impl Default for SinkFanout {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for SinkFanout {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn notify(
        &self,
        source: &MonitoredSource,
        event: &StatusChangeEvent,
    ) -> Result<(), MonitorError> {
        let errors = self.deliver(source, event).await;
        if errors.is_empty() {
            Ok(())
        } else {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Err(MonitorError::delivery("fanout", message))
        }
    }
}

/// Run a notification on its own task, bounded by `limit`.
///
/// Returns immediately; failures and timeouts are logged.
pub fn dispatch(
    sink: Arc<dyn NotificationSink>,
    source: MonitoredSource,
    event: StatusChangeEvent,
    limit: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::time::timeout(limit, sink.notify(&source, &event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(source_id = %source.id, "Notification via {} failed: {}", sink.name(), e),
            Err(_) => warn!(
                source_id = %source.id,
                "Notification via {} timed out after {:?}",
                sink.name(),
                limit
            ),
        }
    })
}
