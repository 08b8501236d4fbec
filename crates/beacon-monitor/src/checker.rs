//! Availability checks for the three check kinds.

use std::process::Stdio;
use std::time::Duration;

use beacon_config::Settings;
use beacon_storage::{CheckKind, MonitoredSource, SourceStatus};
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Runs one check of a source.
#[derive(Clone)]
pub struct Checker {
    client: reqwest::Client,
    ping_count: u32,
    ping_timeout: Duration,
    http_timeout: Duration,
}

impl Checker {
    pub fn new(ping_count: u32, ping_timeout: Duration, http_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            ping_count: ping_count.max(1),
            ping_timeout,
            http_timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.ping_count, settings.ping_timeout, settings.http_timeout)
    }

    /// Check a source, dispatching on its kind.
    pub async fn check(&self, source: &MonitoredSource, now: DateTime<Utc>) -> SourceStatus {
        match source.kind {
            CheckKind::ProbeAddress => self.probe_address(&source.target).await,
            CheckKind::ProbeUrl => self.probe_url(&source.target).await,
            CheckKind::PassiveHeartbeat => {
                let status = source.passive_status(now);
                debug!(source = %source.name, %status, "Heartbeat check");
                status
            }
        }
    }

    /// Send echo probes via the system `ping`. Online if any reply arrives.
    pub async fn probe_address(&self, target: &str) -> SourceStatus {
        let target = target.trim();
        if target.is_empty() || target.starts_with('-') {
            debug!("Refusing to ping invalid target {:?}", target);
            return SourceStatus::Offline;
        }

        let mut cmd = Command::new("ping");
        cmd.arg("-c").arg(self.ping_count.to_string());
        #[cfg(target_os = "macos")]
        cmd.arg("-W").arg(self.ping_timeout.as_millis().max(1).to_string());
        #[cfg(not(target_os = "macos"))]
        cmd.arg("-W").arg(self.ping_timeout.as_secs().max(1).to_string());
        cmd.arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // Every probe may wait the full per-reply timeout.
        let budget = self.ping_timeout * (self.ping_count + 1);
        match timeout(budget, cmd.status()).await {
            Ok(Ok(status)) if status.success() => {
                debug!("Ping {}: ONLINE", target);
                SourceStatus::Online
            }
            Ok(Ok(status)) => {
                debug!("Ping {}: OFFLINE ({})", target, status);
                SourceStatus::Offline
            }
            Ok(Err(e)) => {
                debug!("Ping {} failed to run: {}", target, e);
                SourceStatus::Offline
            }
            Err(_) => {
                debug!("Ping {} timed out after {:?}", target, budget);
                SourceStatus::Offline
            }
        }
    }

    /// GET the URL. Online if the final status is in `[200, 400)`.
    pub async fn probe_url(&self, url: &str) -> SourceStatus {
        match timeout(self.http_timeout, self.client.get(url).send()).await {
            Ok(Ok(response)) => {
                let code = response.status().as_u16();
                if (200..400).contains(&code) {
                    debug!("HTTP check {}: ONLINE (status {})", url, code);
                    SourceStatus::Online
                } else {
                    debug!("HTTP check {}: OFFLINE (status {})", url, code);
                    SourceStatus::Offline
                }
            }
            Ok(Err(e)) => {
                debug!("HTTP check {} failed: {}", url, e);
                SourceStatus::Offline
            }
            Err(_) => {
                debug!("HTTP check {} timed out", url);
                SourceStatus::Offline
            }
        }
    }
}

impl Default for Checker {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}
