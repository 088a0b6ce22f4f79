//! Reconnect policy for change-stream readers.

use std::time::Duration;

/// Default delay between a read failure and reopening the reader.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Default ceiling for the delay when a multiplier is configured.
pub const DEFAULT_MAX_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// How a consumer waits between consecutive read failures.
///
/// Attempts are numbered from 1 and count consecutive failures; a
/// successful read resets the count.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub interval: Duration,
    /// Consecutive failures tolerated before giving up; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Growth factor applied per attempt; `1.0` keeps the delay fixed
    pub multiplier: f64,
    /// Upper bound on any single delay
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: None,
            multiplier: 1.0,
            max_interval: DEFAULT_MAX_RETRY_INTERVAL,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay, retried forever.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.multiplier = multiplier;
        self.max_interval = max_interval;
        self
    }

    /// Delay before retry number `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.multiplier <= 1.0 {
            return self.interval;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.interval.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            return self.max_interval.max(self.interval);
        }
        Duration::from_secs_f64(secs)
    }

    /// Whether retry number `attempt` may run.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_and_unbounded() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(50), Duration::from_secs(2));
        assert!(policy.allows(u32::MAX));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::fixed(Duration::from_millis(100))
            .with_backoff(2.0, Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        assert!(policy.allows(1));
        assert!(policy.allows(3));
        assert!(!policy.allows(4));
    }
}
