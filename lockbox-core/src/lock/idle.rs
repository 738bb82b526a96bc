//! Idle tracking for auto-lock.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// User-facing auto-lock preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoLockSettings {
    pub enabled: bool,
    pub timeout_minutes: u32,
}

impl AutoLockSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_minutes) * 60)
    }
}

/// Tracks time since the last user interaction
#[derive(Debug, Clone)]
pub struct IdleTracker {
    last_activity: Instant,
    settings: AutoLockSettings,
}

impl IdleTracker {
    pub fn new(settings: AutoLockSettings) -> Self {
        Self {
            last_activity: Instant::now(),
            settings,
        }
    }

    /// Update the last activity timestamp
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Check if the idle timeout has passed
    pub fn should_lock(&self) -> bool {
        if !self.settings.enabled {
            return false;
        }
        self.last_activity.elapsed() > self.settings.timeout()
    }

    pub fn settings(&self) -> AutoLockSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: AutoLockSettings) {
        self.settings = settings;
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Get the time until lock
    pub fn time_until_lock(&self) -> Option<Duration> {
        if !self.settings.enabled {
            return None;
        }
        Some(
            self.settings
                .timeout()
                .saturating_sub(self.last_activity.elapsed()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn settings(enabled: bool) -> AutoLockSettings {
        AutoLockSettings {
            enabled,
            timeout_minutes: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_lock_timeout() {
        let tracker = IdleTracker::new(settings(true));
        assert!(!tracker.should_lock());

        advance(Duration::from_secs(61)).await;
        assert!(tracker.should_lock());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_resets_timer() {
        let mut tracker = IdleTracker::new(settings(true));

        advance(Duration::from_secs(40)).await;
        tracker.record_activity();

        advance(Duration::from_secs(40)).await;
        assert!(!tracker.should_lock());

        advance(Duration::from_secs(21)).await;
        assert!(tracker.should_lock());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_auto_lock() {
        let tracker = IdleTracker::new(settings(false));
        advance(Duration::from_secs(600)).await;

        assert!(!tracker.should_lock());
        assert!(tracker.time_until_lock().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_until_lock() {
        let tracker = IdleTracker::new(settings(true));
        advance(Duration::from_secs(15)).await;
        assert_eq!(tracker.time_until_lock(), Some(Duration::from_secs(45)));
    }
}
