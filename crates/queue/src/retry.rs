//! Retry configuration and dead letter queue handling.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use fedi_common::config::DeliveryConfig;
use tokio::sync::RwLock;

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3600),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_secs(config.max_backoff_secs),
            ..Self::default()
        }
    }

    /// Delay before retrying after `failed_attempts` failures (1-indexed).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(30) as i32;
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if delay_secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    #[must_use]
    pub const fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Dead letter queue entry for failed jobs.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry<T> {
    /// The failed job.
    pub job: T,
    /// Number of attempts made.
    pub attempts: u32,
    /// Last error message.
    pub last_error: String,
    /// Timestamp of last failure.
    pub failed_at: chrono::DateTime<chrono::Utc>,
}

impl<T> DeadLetterEntry<T> {
    /// Create a new dead letter entry.
    pub fn new(job: T, attempts: u32, error: String) -> Self {
        Self {
            job,
            attempts,
            last_error: error,
            failed_at: chrono::Utc::now(),
        }
    }
}

const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1000;

/// Jobs that exhausted their attempts. Kept for inspection, never replayed.
///
/// Bounded: the oldest entry is evicted once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct DeadLetterStore<T> {
    entries: Arc<RwLock<VecDeque<DeadLetterEntry<T>>>>,
    capacity: usize,
}

impl<T: Clone> Default for DeadLetterStore<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_DEAD_LETTER_CAPACITY)
    }
}

impl<T: Clone> DeadLetterStore<T> {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn push(&self, entry: DeadLetterEntry<T>) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot of the stored entries, oldest first.
    pub async fn entries(&self) -> Vec<DeadLetterEntry<T>> {
        self.entries.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let config = RetryConfig::default();

        assert_eq!(config.delay_after(1), Duration::from_secs(1));
        assert_eq!(config.delay_after(2), Duration::from_secs(2));
        assert_eq!(config.delay_after(3), Duration::from_secs(4));
        assert_eq!(config.delay_after(4), Duration::from_secs(8));
    }

    #[test]
    fn test_max_delay() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(7200),
            multiplier: 2.0,
        };

        assert_eq!(config.delay_after(5), Duration::from_secs(7200));
        assert_eq!(config.delay_after(u32::MAX), Duration::from_secs(7200));
    }

    #[test]
    fn test_should_retry() {
        let config = RetryConfig::default();

        assert!(config.should_retry(1));
        assert!(config.should_retry(4));
        assert!(!config.should_retry(5));
        assert!(!config.should_retry(6));
    }

    #[tokio::test]
    async fn test_dead_letter_store_is_bounded() {
        let store = DeadLetterStore::with_capacity(2);
        store.push(DeadLetterEntry::new("a", 5, "boom".into())).await;
        store.push(DeadLetterEntry::new("b", 5, "boom".into())).await;
        store.push(DeadLetterEntry::new("c", 5, "boom".into())).await;

        let jobs: Vec<_> = store.entries().await.into_iter().map(|e| e.job).collect();
        assert_eq!(jobs, vec!["b", "c"]);

        store.clear().await;
        assert!(store.is_empty().await);
    }
}
