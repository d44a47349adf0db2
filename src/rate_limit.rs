//! Per-credential request quotas.
//!
//! The check and the charge happen under one lock, so concurrent requests
//! for the same credential can never overshoot the quota.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How the quota window moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    /// Counts requests in the trailing window ending now.
    #[default]
    Rolling,
    /// Counts requests since the window opened; resets all at once.
    Fixed,
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request charged; `remaining` more fit in the current window.
    Allowed { remaining: u32 },
    /// Quota exhausted. Nothing was charged.
    QuotaExceeded { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Quota bookkeeping keyed by credential.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Checks the quota for `credential` and, if there is room, charges one request.
    async fn check_and_charge(&self, credential: &str) -> RateDecision;

    /// Requests left in the current window, without charging.
    async fn remaining(&self, credential: &str) -> u32;

    /// Forgets all history for `credential`.
    async fn reset(&self, credential: &str);

    /// Drops bookkeeping for credentials with nothing left in their window,
    /// returning how many were dropped.
    async fn prune_idle(&self) -> usize {
        0
    }
}

#[derive(Debug)]
enum Usage {
    Rolling(VecDeque<Instant>),
    Fixed { opened: Instant, count: u32 },
}

impl Usage {
    fn new(mode: WindowMode, now: Instant) -> Self {
        match mode {
            WindowMode::Rolling => Self::Rolling(VecDeque::new()),
            WindowMode::Fixed => Self::Fixed { opened: now, count: 0 },
        }
    }

    /// Drops history that fell out of the window.
    fn prune(&mut self, now: Instant, window: Duration) {
        match self {
            Self::Rolling(hits) => {
                while hits.front().is_some_and(|t| now.duration_since(*t) >= window) {
                    hits.pop_front();
                }
            }
            Self::Fixed { opened, count } => {
                if now.duration_since(*opened) >= window {
                    *opened = now;
                    *count = 0;
                }
            }
        }
    }

    fn used(&self) -> u32 {
        match self {
            Self::Rolling(hits) => hits.len() as u32,
            Self::Fixed { count, .. } => *count,
        }
    }

    fn charge(&mut self, now: Instant) {
        match self {
            Self::Rolling(hits) => hits.push_back(now),
            Self::Fixed { count, .. } => *count += 1,
        }
    }

    /// Time until a slot frees up.
    fn retry_after(&self, now: Instant, window: Duration) -> Duration {
        let freed_at = match self {
            Self::Rolling(hits) => hits.front().map(|t| *t + window),
            Self::Fixed { opened, .. } => Some(*opened + window),
        };
        freed_at
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or_default()
            .max(Duration::from_secs(1))
    }

    fn is_idle(&self) -> bool {
        self.used() == 0
    }
}

/// Process-local limiter.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    quota: u32,
    window: Duration,
    mode: WindowMode,
    usage: Mutex<HashMap<String, Usage>>,
}

impl InMemoryRateLimiter {
    pub fn new(quota: u32, window: Duration, mode: WindowMode) -> Self {
        Self {
            quota,
            window,
            mode,
            usage: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_and_charge(&self, credential: &str) -> RateDecision {
        let now = Instant::now();
        let mut usage = self.usage.lock().await;
        let entry = usage
            .entry(credential.to_string())
            .or_insert_with(|| Usage::new(self.mode, now));
        entry.prune(now, self.window);

        if entry.used() >= self.quota {
            return RateDecision::QuotaExceeded {
                retry_after: entry.retry_after(now, self.window),
            };
        }
        entry.charge(now);
        RateDecision::Allowed {
            remaining: self.quota - entry.used(),
        }
    }

    async fn remaining(&self, credential: &str) -> u32 {
        let now = Instant::now();
        let mut usage = self.usage.lock().await;
        match usage.get_mut(credential) {
            Some(entry) => {
                entry.prune(now, self.window);
                self.quota.saturating_sub(entry.used())
            }
            None => self.quota,
        }
    }

    async fn reset(&self, credential: &str) {
        self.usage.lock().await.remove(credential);
    }

    async fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let mut usage = self.usage.lock().await;
        let before = usage.len();
        usage.retain(|_, u| {
            u.prune(now, self.window);
            !u.is_idle()
        });
        before - usage.len()
    }
}

/// Limiter used when quotas are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedRateLimiter;

#[async_trait]
impl RateLimiter for UnlimitedRateLimiter {
    async fn check_and_charge(&self, _credential: &str) -> RateDecision {
        RateDecision::Allowed { remaining: u32::MAX }
    }

    async fn remaining(&self, _credential: &str) -> u32 {
        u32::MAX
    }

    async fn reset(&self, _credential: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_allows_up_to_quota_then_rejects() {
        let limiter = InMemoryRateLimiter::new(3, HOUR, WindowMode::Rolling);
        assert_eq!(
            limiter.check_and_charge("k").await,
            RateDecision::Allowed { remaining: 2 }
        );
        assert!(limiter.check_and_charge("k").await.is_allowed());
        assert_eq!(
            limiter.check_and_charge("k").await,
            RateDecision::Allowed { remaining: 0 }
        );
        assert!(!limiter.check_and_charge("k").await.is_allowed());
        assert_eq!(limiter.remaining("k").await, 0);
    }

    #[tokio::test]
    async fn test_credentials_are_independent() {
        let limiter = InMemoryRateLimiter::new(1, HOUR, WindowMode::Rolling);
        assert!(limiter.check_and_charge("a").await.is_allowed());
        assert!(!limiter.check_and_charge("a").await.is_allowed());
        assert!(limiter.check_and_charge("b").await.is_allowed());
    }

    #[tokio::test]
    async fn test_rejection_does_not_charge() {
        let limiter = InMemoryRateLimiter::new(1, HOUR, WindowMode::Rolling);
        assert!(limiter.check_and_charge("k").await.is_allowed());
        for _ in 0..5 {
            assert!(!limiter.check_and_charge("k").await.is_allowed());
        }
        let usage = limiter.usage.lock().await;
        assert_eq!(usage.get("k").map(Usage::used), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_overshoot() {
        let limiter = Arc::new(InMemoryRateLimiter::new(10, HOUR, WindowMode::Rolling));
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.check_and_charge("shared").await })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
        assert_eq!(limiter.remaining("shared").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rolling_window_frees_oldest_slot() {
        let limiter = InMemoryRateLimiter::new(2, HOUR, WindowMode::Rolling);
        assert!(limiter.check_and_charge("k").await.is_allowed());
        tokio::time::advance(Duration::from_secs(1800)).await;
        assert!(limiter.check_and_charge("k").await.is_allowed());

        match limiter.check_and_charge("k").await {
            RateDecision::QuotaExceeded { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(1800));
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(1800)).await;
        assert!(limiter.check_and_charge("k").await.is_allowed());
        // Second request, made at 30min, is still in the window.
        assert!(!limiter.check_and_charge("k").await.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_resets_all_at_once() {
        let limiter = InMemoryRateLimiter::new(2, HOUR, WindowMode::Fixed);
        assert!(limiter.check_and_charge("k").await.is_allowed());
        tokio::time::advance(Duration::from_secs(3000)).await;
        assert!(limiter.check_and_charge("k").await.is_allowed());
        match limiter.check_and_charge("k").await {
            RateDecision::QuotaExceeded { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(600));
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(
            limiter.check_and_charge("k").await,
            RateDecision::Allowed { remaining: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_idle_and_reset() {
        let limiter = InMemoryRateLimiter::new(5, HOUR, WindowMode::Rolling);
        limiter.check_and_charge("old").await;
        tokio::time::advance(HOUR).await;
        limiter.check_and_charge("fresh").await;
        assert_eq!(limiter.prune_idle().await, 1);

        limiter.reset("fresh").await;
        assert_eq!(limiter.remaining("fresh").await, 5);
    }

    #[tokio::test]
    async fn test_unlimited_always_allows() {
        let limiter = UnlimitedRateLimiter;
        for _ in 0..1000 {
            assert!(limiter.check_and_charge("k").await.is_allowed());
        }
    }
}
