//! Exponential restart backoff.

use std::time::Duration;

use beacon_config::AutoRestartSettings;

/// Restart schedule derived from the auto-restart settings.
///
/// `delay(0)` is the base delay; `delay(n)` is `base * multiplier^n`, capped
/// at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub enabled: bool,
    pub base: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// 0 means unlimited.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_settings(settings: &AutoRestartSettings) -> Self {
        Self {
            enabled: settings.enabled,
            base: settings.delay,
            multiplier: settings.multiplier,
            max_delay: settings.max_delay,
            max_attempts: settings.max_attempts,
        }
    }

    /// Wait before restart number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.base.min(self.max_delay);
        }
        // A multiplier below 1 would shrink the delay; treat it as constant.
        let factor = if self.multiplier.is_nan() {
            1.0
        } else {
            self.multiplier.max(1.0)
        };
        let secs = self.base.as_secs_f64() * factor.powf(f64::from(attempt));
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Whether another restart may be scheduled after `attempts` failures.
    /// Stops once the counter reaches `max_attempts`.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&AutoRestartSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, multiplier: f64, max: u64) -> BackoffPolicy {
        BackoffPolicy {
            enabled: true,
            base: Duration::from_secs(base),
            multiplier,
            max_delay: Duration::from_secs(max),
            max_attempts: 0,
        }
    }

    #[test]
    fn test_default_schedule() {
        let p = policy(30, 2.0, 300);
        assert_eq!(p.delay(0), Duration::from_secs(30));
        assert_eq!(p.delay(1), Duration::from_secs(60));
        assert_eq!(p.delay(2), Duration::from_secs(120));
        assert_eq!(p.delay(3), Duration::from_secs(240));
        assert_eq!(p.delay(4), Duration::from_secs(300));
    }

    #[test]
    fn test_monotonic_and_capped() {
        for p in [policy(30, 2.0, 300), policy(1, 1.5, 45), policy(7, 1.0, 7), policy(2, 10.0, 3600)] {
            let mut previous = Duration::ZERO;
            for n in 0..200 {
                let d = p.delay(n);
                assert!(d >= previous, "delay({}) decreased", n);
                assert!(d <= p.max_delay, "delay({}) above cap", n);
                previous = d;
            }
        }
    }

    #[test]
    fn test_huge_attempt_count_saturates() {
        let p = policy(30, 2.0, 300);
        assert_eq!(p.delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_shrinking_multiplier_is_constant() {
        let p = policy(10, 0.5, 60);
        assert_eq!(p.delay(5), Duration::from_secs(10));
    }

    #[test]
    fn test_max_attempts() {
        let mut p = policy(30, 2.0, 300);
        assert!(p.allows(1_000));

        p.max_attempts = 3;
        assert!(p.allows(1));
        assert!(p.allows(2));
        assert!(!p.allows(3));
        assert!(!p.allows(4));
    }

    #[test]
    fn test_from_settings() {
        let p = BackoffPolicy::default();
        assert!(p.enabled);
        assert_eq!(p.base, Duration::from_secs(30));
        assert_eq!(p.max_delay, Duration::from_secs(300));
        assert_eq!(p.max_attempts, 0);
    }
}
