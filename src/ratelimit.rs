//! Sliding-window rate limiting per (user, action class).
//!
//! Each key keeps the timestamps of its accepted requests inside the
//! trailing window. A request is accepted while fewer than `cap` timestamps
//! remain after eviction; rejected requests are not recorded.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::AccessError;

/// What a request costs: a full pipeline run or a single chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    Pipeline,
    Chat,
}

impl std::fmt::Display for ActionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::Chat => write!(f, "chat"),
        }
    }
}

/// Window size and per-class caps.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub pipeline_per_window: usize,
    pub chat_per_window: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            pipeline_per_window: 3,
            chat_per_window: 20,
        }
    }
}

impl RateLimitConfig {
    fn cap(&self, class: ActionClass) -> usize {
        match class {
            ActionClass::Pipeline => self.pipeline_per_window,
            ActionClass::Chat => self.chat_per_window,
        }
    }
}

/// Process-lifetime rate limiter. State is not persisted across restarts.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(i64, ActionClass), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check and record a request made now.
    pub fn check(&self, user_id: i64, class: ActionClass) -> Result<(), AccessError> {
        self.check_at(user_id, class, Instant::now())
    }

    /// Check and record a request made at `now`.
    pub fn check_at(
        &self,
        user_id: i64,
        class: ActionClass,
        now: Instant,
    ) -> Result<(), AccessError> {
        let cap = self.config.cap(class);
        let window = self.config.window;

        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamps = windows.entry((user_id, class)).or_default();

        while let Some(oldest) = stamps.front() {
            if now.saturating_duration_since(*oldest) >= window {
                stamps.pop_front();
            } else {
                break;
            }
        }

        if stamps.len() >= cap {
            let retry_after = stamps
                .front()
                .map(|oldest| retry_hint(window, now.saturating_duration_since(*oldest)))
                .unwrap_or(Duration::from_secs(1));
            tracing::debug!(user_id, %class, ?retry_after, "Rate limit hit");
            return Err(AccessError::RateLimited { class, retry_after });
        }

        stamps.push_back(now);
        Ok(())
    }

    /// Drop keys whose windows have fully drained.
    pub fn prune(&self) {
        let now = Instant::now();
        let window = self.config.window;
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        windows.retain(|_, stamps| {
            stamps
                .back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) < window)
        });
    }
}

/// Whole seconds until the oldest stamp leaves the window, at least one.
fn retry_hint(window: Duration, age: Duration) -> Duration {
    let remaining = window.saturating_sub(age).as_secs() + 1;
    Duration::from_secs(remaining.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(cap: usize, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(window_secs),
            pipeline_per_window: cap,
            chat_per_window: cap * 10,
        })
    }

    #[test]
    fn allows_exactly_cap_within_window() {
        let rl = limiter(3, 60);
        let t0 = Instant::now();
        for i in 0..3 {
            assert!(
                rl.check_at(1, ActionClass::Pipeline, t0 + Duration::from_secs(i))
                    .is_ok()
            );
        }
        let err = rl
            .check_at(1, ActionClass::Pipeline, t0 + Duration::from_secs(10))
            .unwrap_err();
        match err {
            AccessError::RateLimited { class, retry_after } => {
                assert_eq!(class, ActionClass::Pipeline);
                // oldest is 10s old in a 60s window
                assert_eq!(retry_after, Duration::from_secs(51));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn admits_again_once_oldest_ages_out() {
        let rl = limiter(2, 10);
        let t0 = Instant::now();
        rl.check_at(1, ActionClass::Pipeline, t0).unwrap();
        rl.check_at(1, ActionClass::Pipeline, t0 + Duration::from_secs(5))
            .unwrap();
        assert!(
            rl.check_at(1, ActionClass::Pipeline, t0 + Duration::from_secs(9))
                .is_err()
        );
        // t0 leaves the window at t0+10
        assert!(
            rl.check_at(1, ActionClass::Pipeline, t0 + Duration::from_secs(10))
                .is_ok()
        );
        assert!(
            rl.check_at(1, ActionClass::Pipeline, t0 + Duration::from_secs(11))
                .is_err()
        );
    }

    #[test]
    fn rejected_requests_are_not_recorded() {
        let rl = limiter(1, 10);
        let t0 = Instant::now();
        rl.check_at(1, ActionClass::Pipeline, t0).unwrap();
        for s in 1..10 {
            assert!(
                rl.check_at(1, ActionClass::Pipeline, t0 + Duration::from_secs(s))
                    .is_err()
            );
        }
        // Only the accepted stamp at t0 counts, so t0+10 is free.
        assert!(
            rl.check_at(1, ActionClass::Pipeline, t0 + Duration::from_secs(10))
                .is_ok()
        );
    }

    #[test]
    fn classes_and_users_are_independent() {
        let rl = limiter(1, 60);
        let t0 = Instant::now();
        rl.check_at(1, ActionClass::Pipeline, t0).unwrap();
        assert!(rl.check_at(1, ActionClass::Pipeline, t0).is_err());
        assert!(rl.check_at(1, ActionClass::Chat, t0).is_ok());
        assert!(rl.check_at(2, ActionClass::Pipeline, t0).is_ok());
    }

    #[test]
    fn retry_hint_is_at_least_one_second() {
        assert_eq!(
            retry_hint(Duration::from_secs(10), Duration::from_secs(30)),
            Duration::from_secs(1)
        );
        assert_eq!(
            retry_hint(Duration::from_secs(10), Duration::from_millis(9_500)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn prune_drops_drained_keys() {
        let rl = limiter(5, 60);
        let long_ago = Instant::now()
            .checked_sub(Duration::from_secs(120))
            .unwrap_or_else(Instant::now);
        rl.check_at(7, ActionClass::Chat, long_ago).unwrap();
        rl.check(8, ActionClass::Chat).unwrap();
        rl.prune();
        let windows = rl.windows.lock().unwrap();
        if long_ago + Duration::from_secs(60) <= Instant::now() {
            assert!(!windows.contains_key(&(7, ActionClass::Chat)));
        }
        assert!(windows.contains_key(&(8, ActionClass::Chat)));
    }
}
