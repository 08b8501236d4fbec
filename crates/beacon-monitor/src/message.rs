//! Human-readable rendering of status changes.

use std::time::Duration;

use beacon_storage::{MonitoredSource, SourceStatus, StatusChangeEvent};

/// Format a duration as e.g. `5 minutes 3 seconds` or `2 days 4 hours`.
pub fn humanize_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        return format!("{} seconds", secs);
    }
    if secs < 3600 {
        let (minutes, seconds) = (secs / 60, secs % 60);
        return if seconds == 0 {
            format!("{} minutes", minutes)
        } else {
            format!("{} minutes {} seconds", minutes, seconds)
        };
    }
    if secs < 86_400 {
        let (hours, minutes) = (secs / 3600, (secs % 3600) / 60);
        return if minutes == 0 {
            format!("{} hours", hours)
        } else {
            format!("{} hours {} minutes", hours, minutes)
        };
    }
    let (days, hours) = (secs / 86_400, (secs % 86_400) / 3600);
    if hours == 0 {
        format!("{} days", days)
    } else {
        format!("{} days {} hours", days, hours)
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// HTML chat message announcing a status change.
pub fn status_change_html(source: &MonitoredSource, event: &StatusChangeEvent) -> String {
    let check_type = if source.target.is_empty() {
        source.kind.to_string()
    } else {
        format!("{} ({})", source.kind, escape_html(&source.target))
    };
    let name = escape_html(&source.name);
    let duration = humanize_duration(event.duration());
    let time = event.timestamp.format("%Y-%m-%d %H:%M:%S");

    if event.new_status == SourceStatus::Online {
        format!(
            "🟢 <b>RESTORED</b>\n{} is now <b>ONLINE</b>\n\nDowntime: {}\nCheck type: {}\nTime: {}",
            name, duration, check_type, time
        )
    } else {
        format!(
            "🔴 <b>OUTAGE DETECTED</b>\n{} is now <b>OFFLINE</b>\n\nWas online for: {}\nCheck type: {}\nTime: {}",
            name, duration, check_type, time
        )
    }
}

/// Plain one-line summary for logs.
pub fn status_change_line(source: &MonitoredSource, event: &StatusChangeEvent) -> String {
    format!(
        "{} ({}) {} -> {} after {}",
        source.name,
        source.kind,
        event.old_status,
        event.new_status,
        humanize_duration(event.duration())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_storage::CheckKind;
    use chrono::{TimeZone, Utc};

    fn event(new_status: SourceStatus, duration_ms: i64) -> StatusChangeEvent {
        StatusChangeEvent {
            id: "e1".into(),
            source_id: "s1".into(),
            old_status: if new_status == SourceStatus::Online {
                SourceStatus::Offline
            } else {
                SourceStatus::Online
            },
            new_status,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            duration_ms,
        }
    }

    #[test]
    fn test_humanize_duration() {
        assert_eq!(humanize_duration(Duration::from_secs(42)), "42 seconds");
        assert_eq!(humanize_duration(Duration::from_secs(120)), "2 minutes");
        assert_eq!(humanize_duration(Duration::from_secs(185)), "3 minutes 5 seconds");
        assert_eq!(humanize_duration(Duration::from_secs(7200)), "2 hours");
        assert_eq!(humanize_duration(Duration::from_secs(7260)), "2 hours 1 minutes");
        assert_eq!(humanize_duration(Duration::from_secs(86_400 * 3)), "3 days");
        assert_eq!(humanize_duration(Duration::from_secs(86_400 + 7200)), "1 days 2 hours");
    }

    #[test]
    fn test_outage_message() {
        let source = MonitoredSource::new(
            "Router <main>",
            CheckKind::ProbeAddress,
            "10.0.0.1",
            Duration::from_secs(30),
        );
        let text = status_change_html(&source, &event(SourceStatus::Offline, 3_600_000));

        assert!(text.starts_with("🔴 <b>OUTAGE DETECTED</b>"));
        assert!(text.contains("Router &lt;main&gt; is now <b>OFFLINE</b>"));
        assert!(text.contains("Was online for: 1 hours"));
        assert!(text.contains("Check type: probe-address (10.0.0.1)"));
        assert!(text.contains("Time: 2024-05-01 12:30:00"));
    }

    #[test]
    fn test_restored_message_for_passive_source() {
        let source = MonitoredSource::passive("nightly backup", Duration::from_secs(60));
        let text = status_change_html(&source, &event(SourceStatus::Online, 90_000));

        assert!(text.starts_with("🟢 <b>RESTORED</b>"));
        assert!(text.contains("Downtime: 1 minutes 30 seconds"));
        assert!(text.contains("Check type: passive-heartbeat\n"));
    }
}
