//! Telegram chat channel.

use std::time::Duration;

use async_trait::async_trait;
use beacon_storage::{MonitoredSource, Repository, StatusChangeEvent};
use serde::Deserialize;
use tracing::debug;

use crate::error::MonitorError;
use crate::message::status_change_html;
use crate::sink::NotificationSink;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    #[serde(default)]
    username: Option<String>,
    first_name: String,
}

/// Sends status changes to every chat subscribed to the source.
pub struct TelegramSink {
    token: String,
    api_base: String,
    repo: Repository,
    client: reqwest::Client,
}

impl TelegramSink {
    pub fn new(token: impl Into<String>, repo: Repository, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            token: token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            repo,
            client,
        }
    }

    /// Point the channel at another Bot API server.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Check the credential with `getMe`. Returns the bot's display name.
    pub async fn verify(&self) -> Result<String, MonitorError> {
        let response = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(|e| MonitorError::Credential(format!("getMe request failed: {}", e.without_url())))?;

        let status = response.status();
        let body: ApiResponse<BotUser> = response
            .json()
            .await
            .map_err(|e| MonitorError::Credential(format!("getMe returned {}: {}", status, e.without_url())))?;

        match (body.ok, body.result) {
            (true, Some(user)) => Ok(user.username.unwrap_or(user.first_name)),
            _ => Err(MonitorError::Credential(
                body.description
                    .unwrap_or_else(|| format!("getMe returned {}", status)),
            )),
        }
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), MonitorError> {
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| MonitorError::delivery("telegram", e.without_url().to_string()))?;

        if response.status().is_success() {
            debug!("Telegram message sent to chat {}", chat_id);
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(MonitorError::delivery(
                "telegram",
                format!("chat {}: API returned {}: {}", chat_id, status, body),
            ))
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(
        &self,
        source: &MonitoredSource,
        event: &StatusChangeEvent,
    ) -> Result<(), MonitorError> {
        let chats = self.repo.source_chats(&source.id).await?;
        if chats.is_empty() {
            return Ok(());
        }

        let text = status_change_html(source, event);
        let mut failures = Vec::new();
        for chat_id in chats {
            if let Err(e) = self.send_message(chat_id, &text).await {
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MonitorError::delivery("telegram", failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_storage::SourceStatus;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123:abc";

    fn sink(server: &MockServer, repo: Repository) -> TelegramSink {
        TelegramSink::new(TOKEN, repo, Duration::from_secs(5)).with_api_base(server.uri())
    }

    fn outage(source: &MonitoredSource) -> StatusChangeEvent {
        StatusChangeEvent {
            id: "e1".into(),
            source_id: source.id.clone(),
            old_status: SourceStatus::Online,
            new_status: SourceStatus::Offline,
            timestamp: Utc::now(),
            duration_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn test_verify_accepts_valid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/bot{}/getMe", TOKEN)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": {"id": 1, "is_bot": true, "first_name": "Beacon", "username": "beacon_bot"}
            })))
            .mount(&server)
            .await;

        let name = sink(&server, Repository::in_memory()).verify().await.unwrap();
        assert_eq!(name, "beacon_bot");
    }

    #[tokio::test]
    async fn test_verify_rejects_invalid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 401,
                "description": "Unauthorized"
            })))
            .mount(&server)
            .await;

        let err = sink(&server, Repository::in_memory()).verify().await.unwrap_err();
        assert!(matches!(err, MonitorError::Credential(ref m) if m.contains("Unauthorized")));
    }

    #[tokio::test]
    async fn test_notify_sends_to_subscribed_chats() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/sendMessage", TOKEN)))
            .and(body_partial_json(serde_json::json!({"parse_mode": "HTML"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(2)
            .mount(&server)
            .await;

        let repo = Repository::in_memory();
        let source = MonitoredSource::passive("hb", Duration::from_secs(60));
        repo.subscribe_chat(&source.id, 10).await.unwrap();
        repo.subscribe_chat(&source.id, 20).await.unwrap();

        sink(&server, repo).notify(&source, &outage(&source)).await.unwrap();
    }

    #[tokio::test]
    async fn test_notify_without_chats_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let source = MonitoredSource::passive("hb", Duration::from_secs(60));
        sink(&server, Repository::in_memory())
            .notify(&source, &outage(&source))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_notify_reports_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("chat not found"))
            .mount(&server)
            .await;

        let repo = Repository::in_memory();
        let source = MonitoredSource::passive("hb", Duration::from_secs(60));
        repo.subscribe_chat(&source.id, 99).await.unwrap();

        let err = sink(&server, repo).notify(&source, &outage(&source)).await.unwrap_err();
        assert!(err.to_string().contains("chat not found"));
    }
}
