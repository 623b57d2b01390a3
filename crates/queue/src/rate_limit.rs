//! Per-host rate limiting for outbound deliveries.
//!
//! A sliding window of send times per destination host. Jobs over the
//! limit are assigned the next free slot; when that slot is further away
//! than `max_delay` the job is shed instead.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fedi_common::config::DeliveryConfig;
use tokio::sync::RwLock;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum deliveries per window.
    pub max_per_window: usize,
    /// Window length.
    pub window: Duration,
    /// Longest delay imposed before a job is dropped.
    pub max_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 10,
            window: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub const fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_per_window: config.max_per_window,
            window: config.window(),
            max_delay: config.max_delay(),
        }
    }
}

/// Rate limit check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Send now.
    Allowed,
    /// Send after the given delay; the slot is reserved.
    Delayed(Duration),
    /// The next free slot is beyond the cap. Nothing was reserved.
    Dropped {
        /// Delay the job would have needed.
        required: Duration,
    },
}

/// Per-host sliding-window rate limiter.
#[derive(Clone)]
pub struct DeliveryRateLimiter {
    config: RateLimitConfig,
    /// Reserved send times per host, ascending. May lie in the future.
    slots: Arc<RwLock<HashMap<String, VecDeque<Instant>>>>,
}

impl DeliveryRateLimiter {
    /// Create a new rate limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Reserve a send slot for `host`.
    pub async fn check(&self, host: &str) -> RateLimitResult {
        self.check_at(host, Instant::now()).await
    }

    async fn check_at(&self, host: &str, now: Instant) -> RateLimitResult {
        let mut slots = self.slots.write().await;
        let window = self.config.window;
        let reserved = slots.entry(host.to_string()).or_default();

        while reserved
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            reserved.pop_front();
        }

        if reserved.len() < self.config.max_per_window {
            let pos = reserved.partition_point(|t| *t <= now);
            reserved.insert(pos, now);
            return RateLimitResult::Allowed;
        }

        // The earliest moment at which fewer than `max_per_window` slots
        // fall inside one window.
        let anchor = reserved[reserved.len() - self.config.max_per_window];
        let slot = anchor + window;
        let required = slot.saturating_duration_since(now);

        if required > self.config.max_delay {
            return RateLimitResult::Dropped { required };
        }

        let pos = reserved.partition_point(|t| *t <= slot);
        reserved.insert(pos, slot);
        RateLimitResult::Delayed(required)
    }

    /// Forget everything about one host.
    pub async fn reset(&self, host: &str) {
        self.slots.write().await.remove(host);
    }

    /// Forget every host.
    pub async fn clear(&self) {
        self.slots.write().await.clear();
    }

    /// Drop hosts whose reservations have all left the window.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let window = self.config.window;
        self.slots.write().await.retain(|_, reserved| {
            reserved
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < window)
        });
    }

    /// Number of tracked hosts.
    pub async fn host_count(&self) -> usize {
        self.slots.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_per_window: usize, window: Duration, max_delay: Duration) -> DeliveryRateLimiter {
        DeliveryRateLimiter::new(RateLimitConfig {
            max_per_window,
            window,
            max_delay,
        })
    }

    #[tokio::test]
    async fn test_eleventh_delivery_is_delayed() {
        let limiter = DeliveryRateLimiter::new(RateLimitConfig::default());

        for _ in 0..10 {
            assert_eq!(limiter.check("remote.example").await, RateLimitResult::Allowed);
        }

        match limiter.check("remote.example").await {
            RateLimitResult::Delayed(delay) => {
                assert!(delay > Duration::ZERO);
                assert!(delay <= Duration::from_secs(1));
            }
            other => panic!("Expected Delayed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delay_beyond_cap_drops() {
        let limiter = limiter(1, Duration::from_secs(30), Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(limiter.check_at("slow.example", now).await, RateLimitResult::Allowed);
        assert_eq!(
            limiter.check_at("slow.example", now).await,
            RateLimitResult::Delayed(Duration::from_secs(30))
        );
        assert_eq!(
            limiter.check_at("slow.example", now).await,
            RateLimitResult::Delayed(Duration::from_secs(60))
        );
        assert_eq!(
            limiter.check_at("slow.example", now).await,
            RateLimitResult::Dropped {
                required: Duration::from_secs(90)
            }
        );
        // A drop does not reserve anything.
        assert!(matches!(
            limiter.check_at("slow.example", now).await,
            RateLimitResult::Dropped { .. }
        ));
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = limiter(2, Duration::from_millis(100), Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(limiter.check_at("a.example", start).await, RateLimitResult::Allowed);
        assert_eq!(limiter.check_at("a.example", start).await, RateLimitResult::Allowed);
        assert!(matches!(
            limiter.check_at("a.example", start).await,
            RateLimitResult::Delayed(_)
        ));

        let later = start + Duration::from_millis(250);
        assert_eq!(limiter.check_at("a.example", later).await, RateLimitResult::Allowed);
    }

    #[tokio::test]
    async fn test_hosts_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60), Duration::from_secs(60));

        assert_eq!(limiter.check("a.example").await, RateLimitResult::Allowed);
        assert_eq!(limiter.check("b.example").await, RateLimitResult::Allowed);
        assert_eq!(limiter.host_count().await, 2);

        limiter.reset("a.example").await;
        assert_eq!(limiter.check("a.example").await, RateLimitResult::Allowed);

        limiter.clear().await;
        assert_eq!(limiter.host_count().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_hosts() {
        let limiter = limiter(5, Duration::from_millis(20), Duration::from_secs(60));
        limiter.check("idle.example").await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        limiter.cleanup().await;

        assert_eq!(limiter.host_count().await, 0);
    }
}
