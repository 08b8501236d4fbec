//! Outbound HTTP webhook channel.

use std::time::Duration;

use async_trait::async_trait;
use beacon_storage::{MonitoredSource, Repository, SourceStatus, StatusChangeEvent, WebhookTarget};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use reqwest::Method;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::MonitorError;
use crate::sink::NotificationSink;

/// Body posted to webhook targets.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub source: SourcePayload,
    pub status_change: StatusChangePayload,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourcePayload {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    pub current_status: SourceStatus,
    pub last_check_time: Option<String>,
    pub last_change_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChangePayload {
    pub id: String,
    pub old_status: SourceStatus,
    pub new_status: SourceStatus,
    pub duration_ms: i64,
    pub timestamp: String,
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl WebhookPayload {
    pub fn new(source: &MonitoredSource, event: &StatusChangeEvent, now: DateTime<Utc>) -> Self {
        Self {
            source: SourcePayload {
                id: source.id.clone(),
                name: source.name.clone(),
                kind: source.kind.to_string(),
                target: source.target.clone(),
                current_status: source.status,
                last_check_time: source.last_check_time.map(rfc3339),
                last_change_time: source.last_change_time.map(rfc3339),
            },
            status_change: StatusChangePayload {
                id: event.id.clone(),
                old_status: event.old_status,
                new_status: event.new_status,
                duration_ms: event.duration_ms,
                timestamp: rfc3339(event.timestamp),
            },
            timestamp: rfc3339(now),
        }
    }
}

/// Posts status changes to every enabled webhook linked to the source.
pub struct WebhookSink {
    repo: Repository,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(repo: Repository, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { repo, client }
    }

    async fn send(&self, hook: &WebhookTarget, payload: &WebhookPayload) -> Result<(), MonitorError> {
        let method = Method::from_bytes(hook.method.to_uppercase().as_bytes())
            .map_err(|_| MonitorError::delivery("webhook", format!("invalid method {:?}", hook.method)))?;

        let mut request = self
            .client
            .request(method, &hook.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(payload);
        for (name, value) in &hook.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| MonitorError::delivery("webhook", format!("{}: {}", hook.url, e)))?;

        let status = response.status();
        if status.is_success() {
            debug!("Webhook sent to {} (status {})", hook.url, status);
            if let Err(e) = self.repo.mark_webhook_triggered(&hook.id, Utc::now()).await {
                warn!("Failed to record webhook trigger for {}: {}", hook.id, e);
            }
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(MonitorError::delivery(
                "webhook",
                format!("{} returned {}: {}", hook.url, status, body),
            ))
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(
        &self,
        source: &MonitoredSource,
        event: &StatusChangeEvent,
    ) -> Result<(), MonitorError> {
        let hooks: Vec<WebhookTarget> = self
            .repo
            .source_webhooks(&source.id)
            .await?
            .into_iter()
            .filter(|h| h.enabled)
            .collect();
        if hooks.is_empty() {
            return Ok(());
        }

        let payload = WebhookPayload::new(source, event, Utc::now());
        let failures: Vec<String> = join_all(hooks.iter().map(|hook| self.send(hook, &payload)))
            .await
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MonitorError::delivery("webhook", failures.join("; ")))
        }
    }
}
