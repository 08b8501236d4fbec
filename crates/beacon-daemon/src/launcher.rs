//! Construction of the notifying process.
//!
//! A launch builds the notification channels, verifies the chat credential,
//! starts a fresh [`SourceMonitor`] and hands back the future that keeps the
//! process alive. The supervisor owns that future from then on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_config::Settings;
use beacon_monitor::{Checker, SinkFanout, SourceMonitor, TelegramSink, WebhookSink};
use beacon_storage::Repository;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SupervisorError;

/// Consecutive failed credential probes before the process gives up.
const MAX_PROBE_FAILURES: u32 = 3;

/// Which channels the running process delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessMode {
    /// Chat channel plus webhooks and log.
    Full,
    /// No chat credential: webhooks and log only.
    WebOnly,
}

impl std::fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessMode::Full => write!(f, "full"),
            ProcessMode::WebOnly => write!(f, "web-only"),
        }
    }
}

/// A started notifying process.
pub struct LaunchedProcess {
    pub monitor: Option<Arc<SourceMonitor>>,
    pub mode: ProcessMode,
    /// Resolves when the process ends. Returning while the launch token is
    /// still live counts as an unexpected stop.
    pub run: BoxFuture<'static, Result<(), SupervisorError>>,
}

/// Builds notifying processes for the supervisor.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Initialise and start a process that stops when `cancel` fires.
    ///
    /// An error here is an initialization failure.
    async fn launch(
        &self,
        settings: &Settings,
        cancel: CancellationToken,
    ) -> Result<LaunchedProcess, SupervisorError>;
}

/// Launches the monitor wired to the log, webhook and chat channels.
pub struct NotifierLauncher {
    repo: Repository,
    chat_api_base: Option<String>,
}

impl NotifierLauncher {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            chat_api_base: None,
        }
    }

    /// Use another Bot API server for the chat channel.
    pub fn with_chat_api_base(mut self, base: impl Into<String>) -> Self {
        self.chat_api_base = Some(base.into());
        self
    }

    fn chat_sink(&self, token: &str, timeout: Duration) -> TelegramSink {
        let sink = TelegramSink::new(token, self.repo.clone(), timeout);
        match &self.chat_api_base {
            Some(base) => sink.with_api_base(base.clone()),
            None => sink,
        }
    }
}

#[async_trait]
impl ProcessLauncher for NotifierLauncher {
    async fn launch(
        &self,
        settings: &Settings,
        cancel: CancellationToken,
    ) -> Result<LaunchedProcess, SupervisorError> {
        settings.validate()?;

        let mut fanout = SinkFanout::new().with_sink(Arc::new(WebhookSink::new(
            self.repo.clone(),
            settings.notify_timeout,
        )));

        let chat = match settings.chat_token() {
            Some(token) => {
                let sink = Arc::new(self.chat_sink(token, settings.notify_timeout));
                let bot = sink.verify().await?;
                info!("Chat channel authorized as {}", bot);
                fanout.add_sink(sink.clone());
                Some(sink)
            }
            None => {
                warn!("TELEGRAM_TOKEN not set - running in web-only mode");
                None
            }
        };
        let mode = if chat.is_some() {
            ProcessMode::Full
        } else {
            ProcessMode::WebOnly
        };
        info!("Notification channels: {}", fanout.sink_names().join(", "));

        let monitor = Arc::new(
            SourceMonitor::new(self.repo.clone(), Checker::from_settings(settings), cancel.child_token())
                .with_sink(Arc::new(fanout))
                .with_notify_timeout(settings.notify_timeout)
                .with_retention(settings.metrics_retention),
        );
        monitor.start().await?;

        let probe_interval = settings.channel_probe_interval;
        let running = monitor.clone();
        let run = Box::pin(async move {
            let result = match chat {
                Some(chat) => watch_channel(&chat, probe_interval, &cancel).await,
                None => {
                    cancel.cancelled().await;
                    Ok(())
                }
            };
            // A fault leaves source checks running; the supervisor's stop
            // cancels the token and the monitor with it.
            if cancel.is_cancelled() {
                running.shutdown().await;
            }
            result
        });

        Ok(LaunchedProcess {
            monitor: Some(monitor),
            mode,
            run,
        })
    }
}

/// Re-verify the chat credential until cancelled.
async fn watch_channel(
    chat: &TelegramSink,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), SupervisorError> {
    let mut failures = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }

        match chat.verify().await {
            Ok(_) => failures = 0,
            Err(e) => {
                failures += 1;
                warn!("Chat channel probe failed ({}/{}): {}", failures, MAX_PROBE_FAILURES, e);
                if failures >= MAX_PROBE_FAILURES {
                    return Err(SupervisorError::fault(format!(
                        "chat channel unreachable after {} probes: {}",
                        failures, e
                    )));
                }
            }
        }
    }
}
