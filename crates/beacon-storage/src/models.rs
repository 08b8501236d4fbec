//! Persisted data model.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Grace multiplier applied to passive sources registered without one.
pub const DEFAULT_GRACE_MULTIPLIER: f64 = 2.5;

/// Observed availability of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a source is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
    /// Echo probes against a host address.
    #[serde(alias = "ping")]
    ProbeAddress,
    /// HTTP GET against a URL.
    #[serde(alias = "http")]
    ProbeUrl,
    /// Inbound heartbeats pushed by the source itself.
    #[serde(alias = "webhook")]
    PassiveHeartbeat,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProbeAddress => "probe-address",
            Self::ProbeUrl => "probe-url",
            Self::PassiveHeartbeat => "passive-heartbeat",
        }
    }

    /// Whether the monitor itself drives the check.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::PassiveHeartbeat)
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "probe-address" | "ping" => Ok(Self::ProbeAddress),
            "probe-url" | "http" => Ok(Self::ProbeUrl),
            "passive-heartbeat" | "webhook" => Ok(Self::PassiveHeartbeat),
            other => Err(format!("Unknown check kind: {}", other)),
        }
    }
}

/// Immutable record of one status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub id: String,
    pub source_id: String,
    pub old_status: SourceStatus,
    pub new_status: SourceStatus,
    pub timestamp: DateTime<Utc>,
    /// Time spent in `old_status`, in milliseconds.
    pub duration_ms: i64,
}

impl StatusChangeEvent {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms.max(0) as u64)
    }
}

/// Result of applying one observation to a source.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Status did not change.
    Unchanged,
    /// First observation of a source whose status was unknown.
    Baseline,
    /// Status changed from a known value.
    Transition(StatusChangeEvent),
}

impl CheckOutcome {
    pub fn event(&self) -> Option<&StatusChangeEvent> {
        match self {
            Self::Transition(event) => Some(event),
            _ => None,
        }
    }

    pub fn status_changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

fn default_grace_multiplier() -> f64 {
    DEFAULT_GRACE_MULTIPLIER
}

fn default_enabled() -> bool {
    true
}

/// A target under observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredSource {
    pub id: String,
    pub name: String,
    pub kind: CheckKind,
    /// Address or URL. Empty for passive sources.
    #[serde(default)]
    pub target: String,
    pub check_interval_ms: u64,
    #[serde(default)]
    pub status: SourceStatus,
    #[serde(default)]
    pub last_check_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_change_time: Option<DateTime<Utc>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_token: Option<String>,
    #[serde(default = "default_grace_multiplier")]
    pub grace_multiplier: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub expected_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_content: Option<String>,
}

impl MonitoredSource {
    /// Create an actively checked source.
    pub fn new(
        name: impl Into<String>,
        kind: CheckKind,
        target: impl Into<String>,
        check_interval: Duration,
    ) -> Self {
        let heartbeat_token = (!kind.is_active()).then(new_token);
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            target: target.into(),
            check_interval_ms: check_interval.as_millis() as u64,
            status: SourceStatus::Unknown,
            last_check_time: None,
            last_change_time: None,
            enabled: true,
            created_at: Utc::now(),
            heartbeat_token,
            grace_multiplier: DEFAULT_GRACE_MULTIPLIER,
            expected_headers: HashMap::new(),
            expected_content: None,
        }
    }

    /// Create a passive heartbeat source with a fresh inbound token.
    pub fn passive(name: impl Into<String>, check_interval: Duration) -> Self {
        Self::new(name, CheckKind::PassiveHeartbeat, "", check_interval)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_grace_multiplier(mut self, multiplier: f64) -> Self {
        self.grace_multiplier = multiplier;
        self
    }

    pub fn with_expected_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.expected_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_expected_content(mut self, content: impl Into<String>) -> Self {
        self.expected_content = Some(content.into());
        self
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn is_passive(&self) -> bool {
        !self.kind.is_active()
    }

    /// Maximum silence tolerated before a passive source is offline.
    pub fn grace_period(&self) -> Duration {
        let multiplier = if self.grace_multiplier > 0.0 {
            self.grace_multiplier
        } else {
            DEFAULT_GRACE_MULTIPLIER
        };
        Duration::from_millis((self.check_interval_ms as f64 * multiplier).round() as u64)
    }

    /// Latest instant a passive source still counts as online.
    pub fn heartbeat_deadline(&self) -> Option<DateTime<Utc>> {
        let grace = chrono::Duration::from_std(self.grace_period()).ok()?;
        self.last_check_time.map(|last| last + grace)
    }

    /// Status of a passive source at `now`.
    pub fn passive_status(&self, now: DateTime<Utc>) -> SourceStatus {
        match self.heartbeat_deadline() {
            Some(deadline) if now <= deadline => SourceStatus::Online,
            _ => SourceStatus::Offline,
        }
    }

    /// Apply the result of a scheduled or manual check.
    ///
    /// Active kinds always record the check time; passive kinds only record
    /// it on heartbeats. `status` and `last_change_time` only ever change
    /// together.
    pub fn apply_check(&mut self, observed: SourceStatus, now: DateTime<Utc>) -> CheckOutcome {
        if self.kind.is_active() {
            self.last_check_time = Some(now);
        }
        self.observe(observed, now)
    }

    /// Apply an inbound heartbeat.
    pub fn record_heartbeat(&mut self, now: DateTime<Utc>) -> CheckOutcome {
        self.last_check_time = Some(now);
        self.observe(SourceStatus::Online, now)
    }

    fn observe(&mut self, observed: SourceStatus, now: DateTime<Utc>) -> CheckOutcome {
        if observed == self.status {
            return CheckOutcome::Unchanged;
        }

        let old_status = self.status;
        let previous_change = self.last_change_time;
        self.status = observed;
        self.last_change_time = Some(now);

        if old_status == SourceStatus::Unknown {
            return CheckOutcome::Baseline;
        }

        let duration_ms = previous_change
            .map(|since| (now - since).num_milliseconds().max(0))
            .unwrap_or(0);

        CheckOutcome::Transition(StatusChangeEvent {
            id: Uuid::new_v4().to_string(),
            source_id: self.id.clone(),
            old_status,
            new_status: observed,
            timestamp: now,
            duration_ms,
        })
    }
}

fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Persisted runtime configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl ConfigEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>, updated_by: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            updated_at: Utc::now(),
            updated_by: updated_by.into(),
        }
    }
}

fn default_method() -> String {
    "POST".to_string()
}

/// Outbound webhook notified on status changes of linked sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookTarget {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

impl WebhookTarget {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            url: url.into(),
            method: default_method(),
            headers: HashMap::new(),
            enabled: true,
            created_at: now,
            updated_at: now,
            last_triggered: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
