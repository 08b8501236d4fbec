//! Live runtime settings.
//!
//! Settings are stored as env-style key/value strings (see [`keys`]) and
//! parsed leniently: a value that fails to parse is logged and replaced by
//! its default. Semantic checks live in [`Settings::validate`].

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::duration::{format_duration, parse_duration};
use crate::error::ConfigError;

/// Recognised setting keys.
pub mod keys {
    pub const TELEGRAM_TOKEN: &str = "TELEGRAM_TOKEN";
    pub const PING_COUNT: &str = "PING_COUNT";
    pub const PING_TIMEOUT: &str = "PING_TIMEOUT";
    pub const HTTP_TIMEOUT: &str = "HTTP_TIMEOUT";
    pub const DEFAULT_CHECK_INTERVAL: &str = "DEFAULT_CHECK_INTERVAL";
    pub const METRICS_RETENTION: &str = "METRICS_RETENTION";
    pub const NOTIFY_TIMEOUT: &str = "NOTIFY_TIMEOUT";
    pub const CHANNEL_PROBE_INTERVAL: &str = "CHANNEL_PROBE_INTERVAL";
    pub const API_KEY: &str = "API_KEY";
    pub const AUTO_RESTART_ENABLED: &str = "AUTO_RESTART_ENABLED";
    pub const AUTO_RESTART_DELAY: &str = "AUTO_RESTART_DELAY";
    pub const AUTO_RESTART_MAX_ATTEMPTS: &str = "AUTO_RESTART_MAX_ATTEMPTS";
    pub const AUTO_RESTART_BACKOFF_MULTIPLIER: &str = "AUTO_RESTART_BACKOFF_MULTIPLIER";
    pub const AUTO_RESTART_MAX_DELAY: &str = "AUTO_RESTART_MAX_DELAY";

    /// Every key read from the environment on first boot.
    pub const ALL: &[&str] = &[
        TELEGRAM_TOKEN,
        PING_COUNT,
        PING_TIMEOUT,
        HTTP_TIMEOUT,
        DEFAULT_CHECK_INTERVAL,
        METRICS_RETENTION,
        NOTIFY_TIMEOUT,
        CHANNEL_PROBE_INTERVAL,
        API_KEY,
        AUTO_RESTART_ENABLED,
        AUTO_RESTART_DELAY,
        AUTO_RESTART_MAX_ATTEMPTS,
        AUTO_RESTART_BACKOFF_MULTIPLIER,
        AUTO_RESTART_MAX_DELAY,
    ];

    /// Keys whose values are masked when displayed.
    pub const SECRETS: &[&str] = &[TELEGRAM_TOKEN, API_KEY];
}

/// Placeholder token shipped in sample env files.
const PLACEHOLDER_TOKEN: &str = "your_bot_token_here";

/// Automatic restart policy of the notifying process.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoRestartSettings {
    pub enabled: bool,
    pub delay: Duration,
    /// 0 means unlimited.
    pub max_attempts: u32,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for AutoRestartSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::from_secs(30),
            max_attempts: 0,
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Parsed runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub telegram_token: Option<String>,
    pub ping_count: u32,
    pub ping_timeout: Duration,
    pub http_timeout: Duration,
    pub default_check_interval: Duration,
    pub metrics_retention: Duration,
    pub notify_timeout: Duration,
    pub channel_probe_interval: Duration,
    pub api_key: Option<String>,
    pub auto_restart: AutoRestartSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_token: None,
            ping_count: 3,
            ping_timeout: Duration::from_secs(5),
            http_timeout: Duration::from_secs(10),
            default_check_interval: Duration::from_secs(30),
            metrics_retention: Duration::from_secs(720 * 3600),
            notify_timeout: Duration::from_secs(10),
            channel_probe_interval: Duration::from_secs(300),
            api_key: None,
            auto_restart: AutoRestartSettings::default(),
        }
    }
}

impl Settings {
    /// Default value of every key that has one.
    pub fn default_values() -> HashMap<String, String> {
        let d = Self::default();
        let r = &d.auto_restart;
        [
            (keys::PING_COUNT, d.ping_count.to_string()),
            (keys::PING_TIMEOUT, format_duration(d.ping_timeout)),
            (keys::HTTP_TIMEOUT, format_duration(d.http_timeout)),
            (keys::DEFAULT_CHECK_INTERVAL, format_duration(d.default_check_interval)),
            (keys::METRICS_RETENTION, format_duration(d.metrics_retention)),
            (keys::NOTIFY_TIMEOUT, format_duration(d.notify_timeout)),
            (keys::CHANNEL_PROBE_INTERVAL, format_duration(d.channel_probe_interval)),
            (keys::AUTO_RESTART_ENABLED, r.enabled.to_string()),
            (keys::AUTO_RESTART_DELAY, format_duration(r.delay)),
            (keys::AUTO_RESTART_MAX_ATTEMPTS, r.max_attempts.to_string()),
            (keys::AUTO_RESTART_BACKOFF_MULTIPLIER, r.multiplier.to_string()),
            (keys::AUTO_RESTART_MAX_DELAY, format_duration(r.max_delay)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Build settings from raw values. Missing or unparsable values fall back
    /// to defaults.
    pub fn from_map(values: &HashMap<String, String>) -> Self {
        let d = Self::default();
        let get = |key: &str| values.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let duration = |key: &str, default: Duration| match get(key) {
            None => default,
            Some(raw) => parse_duration(raw).unwrap_or_else(|e| {
                warn!("Invalid {} value {:?}: {}, using default", key, raw, e);
                default
            }),
        };

        let number = |key: &str, default: u32| match get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Invalid {} value {:?}, using default {}", key, raw, default);
                default
            }),
        };

        let multiplier = match get(keys::AUTO_RESTART_BACKOFF_MULTIPLIER) {
            None => d.auto_restart.multiplier,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Invalid {} value {:?}, using default", keys::AUTO_RESTART_BACKOFF_MULTIPLIER, raw);
                d.auto_restart.multiplier
            }),
        };

        let enabled = match get(keys::AUTO_RESTART_ENABLED) {
            None => d.auto_restart.enabled,
            Some(raw) => parse_bool(raw).unwrap_or_else(|| {
                warn!("Invalid {} value {:?}, using default", keys::AUTO_RESTART_ENABLED, raw);
                d.auto_restart.enabled
            }),
        };

        Self {
            telegram_token: get(keys::TELEGRAM_TOKEN).map(str::to_string),
            ping_count: number(keys::PING_COUNT, d.ping_count),
            ping_timeout: duration(keys::PING_TIMEOUT, d.ping_timeout),
            http_timeout: duration(keys::HTTP_TIMEOUT, d.http_timeout),
            default_check_interval: duration(keys::DEFAULT_CHECK_INTERVAL, d.default_check_interval),
            metrics_retention: duration(keys::METRICS_RETENTION, d.metrics_retention),
            notify_timeout: duration(keys::NOTIFY_TIMEOUT, d.notify_timeout),
            channel_probe_interval: duration(keys::CHANNEL_PROBE_INTERVAL, d.channel_probe_interval),
            api_key: get(keys::API_KEY).map(str::to_string),
            auto_restart: AutoRestartSettings {
                enabled,
                delay: duration(keys::AUTO_RESTART_DELAY, d.auto_restart.delay),
                max_attempts: number(keys::AUTO_RESTART_MAX_ATTEMPTS, d.auto_restart.max_attempts),
                multiplier,
                max_delay: duration(keys::AUTO_RESTART_MAX_DELAY, d.auto_restart.max_delay),
            },
        }
    }

    /// Reject values the notifying process cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_count == 0 {
            return Err(ConfigError::invalid(keys::PING_COUNT, "must be greater than zero"));
        }
        let non_zero = [
            (keys::PING_TIMEOUT, self.ping_timeout),
            (keys::HTTP_TIMEOUT, self.http_timeout),
            (keys::DEFAULT_CHECK_INTERVAL, self.default_check_interval),
            (keys::NOTIFY_TIMEOUT, self.notify_timeout),
            (keys::CHANNEL_PROBE_INTERVAL, self.channel_probe_interval),
            (keys::AUTO_RESTART_DELAY, self.auto_restart.delay),
        ];
        for (key, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::invalid(key, "must be greater than zero"));
            }
        }
        let multiplier = self.auto_restart.multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(ConfigError::invalid(
                keys::AUTO_RESTART_BACKOFF_MULTIPLIER,
                "must be at least 1.0",
            ));
        }
        if self.auto_restart.max_delay < self.auto_restart.delay {
            return Err(ConfigError::invalid(
                keys::AUTO_RESTART_MAX_DELAY,
                "must not be shorter than AUTO_RESTART_DELAY",
            ));
        }
        Ok(())
    }

    /// Check that a single raw value parses for its key.
    pub fn check_value(key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            keys::PING_TIMEOUT
            | keys::HTTP_TIMEOUT
            | keys::DEFAULT_CHECK_INTERVAL
            | keys::METRICS_RETENTION
            | keys::NOTIFY_TIMEOUT
            | keys::CHANNEL_PROBE_INTERVAL
            | keys::AUTO_RESTART_DELAY
            | keys::AUTO_RESTART_MAX_DELAY => parse_duration(value)
                .map(|_| ())
                .map_err(|e| ConfigError::invalid(key, e.to_string())),
            keys::PING_COUNT | keys::AUTO_RESTART_MAX_ATTEMPTS => value
                .parse::<u32>()
                .map(|_| ())
                .map_err(|e| ConfigError::invalid(key, e.to_string())),
            keys::AUTO_RESTART_BACKOFF_MULTIPLIER => value
                .parse::<f64>()
                .map(|_| ())
                .map_err(|e| ConfigError::invalid(key, e.to_string())),
            keys::AUTO_RESTART_ENABLED => parse_bool(value)
                .map(|_| ())
                .ok_or_else(|| ConfigError::invalid(key, "expected true or false")),
            _ => Ok(()),
        }
    }

    /// Chat credential, unless absent or still the sample placeholder.
    pub fn chat_token(&self) -> Option<&str> {
        self.telegram_token
            .as_deref()
            .filter(|t| !t.is_empty() && *t != PLACEHOLDER_TOKEN)
    }

    /// Whether the notifying process runs without a chat channel.
    pub fn is_web_only(&self) -> bool {
        self.chat_token().is_none()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Whether a key holds a secret.
pub fn is_secret(key: &str) -> bool {
    keys::SECRETS.contains(&key)
}

/// Mask a secret as `abcd...wxyz`, or `***` when too short to reveal anything.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
