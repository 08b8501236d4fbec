//! Health snapshot of the notifying process.

use std::time::Duration;

use beacon_config::format_duration;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backoff::BackoffPolicy;
use crate::launcher::ProcessMode;

/// Overall state of the notifying process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Running without error.
    Healthy,
    /// Registered as running but failed or still recovering.
    Unhealthy,
    /// Not started, or stopped.
    Stopped,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// An armed restart timer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRestart {
    pub delay: Duration,
    pub due: DateTime<Utc>,
}

/// Point-in-time copy of the supervisor's state.
#[derive(Debug, Clone, Default)]
pub struct ProcessHealth {
    pub running: bool,
    /// Only ever true while `running` is.
    pub healthy: bool,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub pending: Option<PendingRestart>,
    pub mode: Option<ProcessMode>,
    pub active_sources: usize,
}

impl ProcessHealth {
    pub fn status(&self) -> HealthStatus {
        match (self.running, self.healthy) {
            (true, true) => HealthStatus::Healthy,
            (true, false) => HealthStatus::Unhealthy,
            (false, _) => HealthStatus::Stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoRestartStatus {
    pub enabled: bool,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_delay: String,
    pub next_delay_ms: u64,
    pub timer_armed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_due: Option<DateTime<Utc>>,
}

/// Read-only status report served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub running: bool,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ProcessMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<i64>,
    pub active_sources: usize,
    pub auto_restart: AutoRestartStatus,
}

impl HealthSnapshot {
    /// Combine process state with the restart policy in force.
    ///
    /// The next delay is the armed timer's delay when one is pending,
    /// otherwise the delay the next failure would be scheduled with.
    pub fn assemble(health: &ProcessHealth, policy: &BackoffPolicy, now: DateTime<Utc>) -> Self {
        let next_delay = match &health.pending {
            Some(pending) => pending.delay,
            None => policy.delay(health.attempts),
        };
        let uptime_secs = match (health.running, health.started_at) {
            (true, Some(at)) => Some((now - at).num_seconds().max(0)),
            _ => None,
        };

        Self {
            status: health.status(),
            running: health.running,
            healthy: health.running && health.healthy,
            mode: health.mode,
            last_error: health.last_error.clone(),
            started_at: health.started_at,
            uptime_secs,
            active_sources: health.active_sources,
            auto_restart: AutoRestartStatus {
                enabled: policy.enabled,
                attempts: health.attempts,
                max_attempts: policy.max_attempts,
                next_delay: format_duration(next_delay),
                next_delay_ms: u64::try_from(next_delay.as_millis()).unwrap_or(u64::MAX),
                timer_armed: health.pending.is_some(),
                restart_due: health.pending.as_ref().map(|p| p.due),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_flags() {
        let mut health = ProcessHealth::default();
        assert_eq!(health.status(), HealthStatus::Stopped);

        health.running = true;
        assert_eq!(health.status(), HealthStatus::Unhealthy);

        health.healthy = true;
        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_snapshot_reports_armed_timer() {
        let now = Utc::now();
        let health = ProcessHealth {
            running: true,
            last_error: Some("Unauthorized".into()),
            started_at: Some(now - chrono::Duration::seconds(5)),
            attempts: 1,
            pending: Some(PendingRestart {
                delay: Duration::from_secs(30),
                due: now + chrono::Duration::seconds(30),
            }),
            ..Default::default()
        };

        let snapshot = HealthSnapshot::assemble(&health, &BackoffPolicy::default(), now);

        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
        assert!(!snapshot.healthy);
        assert_eq!(snapshot.uptime_secs, Some(5));
        assert_eq!(snapshot.auto_restart.next_delay, "30s");
        assert!(snapshot.auto_restart.timer_armed);
        assert_eq!(snapshot.auto_restart.restart_due, health.pending.map(|p| p.due));
    }

    #[test]
    fn test_snapshot_without_timer_uses_policy() {
        let health = ProcessHealth {
            running: true,
            healthy: true,
            attempts: 2,
            ..Default::default()
        };
        let snapshot = HealthSnapshot::assemble(&health, &BackoffPolicy::default(), Utc::now());

        assert_eq!(snapshot.auto_restart.next_delay_ms, 120_000);
        assert!(!snapshot.auto_restart.timer_armed);
    }

    #[test]
    fn test_stopped_snapshot_serializes_compactly() {
        let snapshot =
            HealthSnapshot::assemble(&ProcessHealth::default(), &BackoffPolicy::default(), Utc::now());
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["status"], "stopped");
        assert!(json.get("uptime_secs").is_none());
        assert!(json.get("last_error").is_none());
        assert_eq!(json["auto_restart"]["timer_armed"], false);
    }
}
