use super::*;
use chrono::TimeZone;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn ping_source() -> MonitoredSource {
    MonitoredSource::new("router", CheckKind::ProbeAddress, "10.0.0.1", Duration::from_secs(10))
}

#[test]
fn test_first_observation_is_baseline() {
    let mut source = ping_source();
    assert_eq!(source.status, SourceStatus::Unknown);

    let outcome = source.apply_check(SourceStatus::Online, t(0));

    assert_eq!(outcome, CheckOutcome::Baseline);
    assert!(outcome.event().is_none());
    assert_eq!(source.status, SourceStatus::Online);
    assert_eq!(source.last_change_time, Some(t(0)));
    assert_eq!(source.last_check_time, Some(t(0)));
}

#[test]
fn test_transition_produces_event_with_duration() {
    let mut source = ping_source();
    source.apply_check(SourceStatus::Online, t(0));

    let outcome = source.apply_check(SourceStatus::Offline, t(90));
    let event = outcome.event().cloned().unwrap();

    assert_eq!(event.source_id, source.id);
    assert_eq!(event.old_status, SourceStatus::Online);
    assert_eq!(event.new_status, SourceStatus::Offline);
    assert_eq!(event.duration_ms, 90_000);
    assert_eq!(event.timestamp, t(90));
    assert_eq!(source.last_change_time, Some(t(90)));
}

#[test]
fn test_status_and_change_time_move_together() {
    let mut source = ping_source();
    let observations = [
        SourceStatus::Online,
        SourceStatus::Online,
        SourceStatus::Offline,
        SourceStatus::Offline,
        SourceStatus::Offline,
        SourceStatus::Online,
        SourceStatus::Online,
    ];

    for (i, observed) in observations.into_iter().enumerate() {
        let before_status = source.status;
        let before_change = source.last_change_time;
        let now = t(i as i64 * 10);

        let outcome = source.apply_check(observed, now);

        if observed != before_status {
            assert!(outcome.status_changed());
            assert_eq!(source.last_change_time, Some(now));
        } else {
            assert_eq!(outcome, CheckOutcome::Unchanged);
            assert_eq!(source.last_change_time, before_change);
        }
        assert_eq!(source.status, observed);
        assert_eq!(source.last_check_time, Some(now));
    }
}

#[test]
fn test_passive_check_does_not_touch_last_check_time() {
    let mut source = MonitoredSource::passive("cron", Duration::from_secs(60));
    source.record_heartbeat(t(0));

    source.apply_check(SourceStatus::Offline, t(200));

    assert_eq!(source.last_check_time, Some(t(0)));
    assert_eq!(source.status, SourceStatus::Offline);
}

#[test]
fn test_passive_grace_period_boundary() {
    let mut source = MonitoredSource::passive("backup job", Duration::from_secs(60))
        .with_grace_multiplier(2.5);
    source.record_heartbeat(t(0));

    assert_eq!(source.grace_period(), Duration::from_secs(150));
    assert_eq!(source.passive_status(t(149)), SourceStatus::Online);
    assert_eq!(source.passive_status(t(150)), SourceStatus::Online);
    assert_eq!(
        source.passive_status(t(150) + chrono::Duration::milliseconds(1)),
        SourceStatus::Offline
    );
    assert_eq!(source.passive_status(t(151)), SourceStatus::Offline);
}

#[test]
fn test_passive_without_heartbeat_is_offline() {
    let source = MonitoredSource::passive("silent", Duration::from_secs(60));
    assert_eq!(source.passive_status(t(0)), SourceStatus::Offline);
}

#[test]
fn test_non_positive_multiplier_uses_default() {
    let source = MonitoredSource::passive("x", Duration::from_secs(10)).with_grace_multiplier(0.0);
    assert_eq!(source.grace_period(), Duration::from_secs(25));
}

#[test]
fn test_heartbeat_after_offline_is_transition() {
    let mut source = MonitoredSource::passive("agent", Duration::from_secs(60));
    source.record_heartbeat(t(0));
    source.apply_check(SourceStatus::Offline, t(200));

    let outcome = source.record_heartbeat(t(500));
    let event = outcome.event().unwrap();

    assert_eq!(event.old_status, SourceStatus::Offline);
    assert_eq!(event.new_status, SourceStatus::Online);
    assert_eq!(event.duration_ms, 300_000);
    assert_eq!(source.last_check_time, Some(t(500)));
}

#[test]
fn test_passive_source_gets_token() {
    let passive = MonitoredSource::passive("a", Duration::from_secs(60));
    let active = ping_source();

    let token = passive.heartbeat_token.clone().unwrap();
    assert_eq!(token.len(), 32);
    assert!(active.heartbeat_token.is_none());
    assert!(passive.is_passive());
}

#[test]
fn test_check_kind_parse_and_serde() {
    assert_eq!("ping".parse::<CheckKind>().unwrap(), CheckKind::ProbeAddress);
    assert_eq!("probe-url".parse::<CheckKind>().unwrap(), CheckKind::ProbeUrl);
    assert_eq!("Webhook".parse::<CheckKind>().unwrap(), CheckKind::PassiveHeartbeat);
    assert!("smtp".parse::<CheckKind>().is_err());

    let json = serde_json::to_string(&CheckKind::PassiveHeartbeat).unwrap();
    assert_eq!(json, "\"passive-heartbeat\"");
    let legacy: CheckKind = serde_json::from_str("\"http\"").unwrap();
    assert_eq!(legacy, CheckKind::ProbeUrl);
}

#[test]
fn test_source_deserialize_applies_defaults() {
    let json = r#"{
        "id": "s1",
        "name": "hook",
        "kind": "webhook",
        "check_interval_ms": 60000,
        "created_at": "2024-01-01T00:00:00Z"
    }"#;

    let source: MonitoredSource = serde_json::from_str(json).unwrap();
    assert_eq!(source.status, SourceStatus::Unknown);
    assert!(source.enabled);
    assert_eq!(source.grace_multiplier, DEFAULT_GRACE_MULTIPLIER);
    assert!(source.target.is_empty());
}

#[test]
fn test_webhook_target_defaults() {
    let hook = WebhookTarget::new("ops", "https://example.com/hook").with_header("X-Token", "abc");
    assert_eq!(hook.method, "POST");
    assert!(hook.enabled);
    assert_eq!(hook.headers.get("X-Token").map(String::as_str), Some("abc"));
}
