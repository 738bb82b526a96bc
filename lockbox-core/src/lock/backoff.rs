//! Back-off after repeated failed unlock attempts.

use std::time::Duration;
use tokio::time::Instant;

/// Exponential back-off policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Consecutive failures before back-off starts
    pub max_attempts: u32,
    /// Base back-off duration (exponential multiplier)
    pub base: Duration,
}

impl BackoffPolicy {
    /// Back-off for a given failure count.
    /// Uses exponential backoff: 2^(failures - max_attempts) * base
    pub fn lockout_duration(&self, failures: u32) -> Option<Duration> {
        if self.max_attempts == 0 || failures < self.max_attempts {
            return None;
        }

        let excess = failures - self.max_attempts;
        let multiplier = 2_u32.pow(excess.min(10)); // Cap at 2^10
        Some(self.base.saturating_mul(multiplier))
    }
}

/// Tracks consecutive failed unlocks
#[derive(Debug, Clone)]
pub struct UnlockBackoff {
    policy: BackoffPolicy,
    failures: u32,
    last_failure: Option<Instant>,
}

impl UnlockBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            last_failure: None,
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);
    }

    /// Forget all failures (after a successful unlock)
    pub fn reset(&mut self) {
        self.failures = 0;
        self.last_failure = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Time left before another attempt is allowed
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let duration = self.policy.lockout_duration(self.failures)?;
        let last = self.last_failure?;
        let until = last + duration;
        if now < until {
            Some(until - now)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 5,
            base: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_lockout_duration_calculation() {
        let policy = policy();

        assert!(policy.lockout_duration(0).is_none());
        assert!(policy.lockout_duration(4).is_none());
        assert_eq!(policy.lockout_duration(5), Some(Duration::from_secs(60)));
        assert_eq!(policy.lockout_duration(6), Some(Duration::from_secs(120)));
        assert_eq!(policy.lockout_duration(7), Some(Duration::from_secs(240)));
    }

    #[test]
    fn test_lockout_duration_is_capped() {
        let policy = policy();
        let capped = policy.lockout_duration(15).unwrap();
        assert_eq!(capped, Duration::from_secs(60 * 1024));
        assert_eq!(policy.lockout_duration(500), Some(capped));
    }

    #[test]
    fn test_disabled_when_max_attempts_zero() {
        let policy = BackoffPolicy {
            max_attempts: 0,
            base: Duration::from_secs(60),
        };
        assert!(policy.lockout_duration(100).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down() {
        let mut backoff = UnlockBackoff::new(BackoffPolicy {
            max_attempts: 2,
            base: Duration::from_secs(10),
        });
        let now = Instant::now();

        backoff.record_failure(now);
        assert!(backoff.remaining(now).is_none());

        backoff.record_failure(now);
        assert_eq!(backoff.remaining(now), Some(Duration::from_secs(10)));
        assert_eq!(
            backoff.remaining(now + Duration::from_secs(4)),
            Some(Duration::from_secs(6))
        );
        assert!(backoff.remaining(now + Duration::from_secs(10)).is_none());

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert!(backoff.remaining(now).is_none());
    }
}
