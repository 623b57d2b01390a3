//! The delivery queue front: dedup, rate limiting, then the transport.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fedi_common::AppResult;
use fedi_common::config::DeliveryConfig;
use fedi_federation::ActivityDelivery;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::jobs::DeliverJob;
use crate::metrics::DeliveryMetrics;
use crate::rate_limit::{DeliveryRateLimiter, RateLimitConfig, RateLimitResult};
use crate::transport::{DeliveryTransport, TransportMode};

/// What `enqueue` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Handed to the transport without delay.
    Queued,
    /// Held back by the rate limiter.
    Delayed(Duration),
    /// An identical job is already in flight.
    Coalesced,
    /// Shed: the rate-limit delay would have exceeded the cap.
    Dropped {
        /// Delay the limiter asked for.
        required: Duration,
    },
}

/// Dedup keys seen within the in-flight window.
#[derive(Debug, Clone)]
pub struct DedupWindow {
    window: Duration,
    seen: Arc<RwLock<HashMap<String, Instant>>>,
}

impl DedupWindow {
    /// Keys stay claimed for `window` unless released first.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Claim `key`. `false` when it is already claimed and not yet expired.
    pub async fn claim(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.write().await;
        seen.retain(|_, at| now.saturating_duration_since(*at) < self.window);
        if seen.contains_key(key) {
            return false;
        }
        seen.insert(key.to_string(), now);
        true
    }

    /// Release `key` so an identical job can be queued again.
    pub async fn release(&self, key: &str) {
        self.seen.write().await.remove(key);
    }

    /// Number of claimed keys, expired ones included.
    pub async fn len(&self) -> usize {
        self.seen.read().await.len()
    }

    /// Whether no key is claimed.
    pub async fn is_empty(&self) -> bool {
        self.seen.read().await.is_empty()
    }
}

/// Outbound delivery queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    transport: Arc<dyn DeliveryTransport>,
    limiter: DeliveryRateLimiter,
    dedup: DedupWindow,
    metrics: DeliveryMetrics,
}

impl DeliveryQueue {
    /// Queue over an already built transport, limiter and dedup window.
    #[must_use]
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        limiter: DeliveryRateLimiter,
        dedup: DedupWindow,
        metrics: DeliveryMetrics,
    ) -> Self {
        Self {
            transport,
            limiter,
            dedup,
            metrics,
        }
    }

    /// Queue wired from the `delivery` config section.
    #[must_use]
    pub fn from_config(
        transport: Arc<dyn DeliveryTransport>,
        config: &DeliveryConfig,
        metrics: DeliveryMetrics,
    ) -> Self {
        Self::new(
            transport,
            DeliveryRateLimiter::new(RateLimitConfig::from_config(config)),
            DedupWindow::new(Duration::from_secs(config.dedup_window_secs)),
            metrics,
        )
    }

    /// Mode of the underlying transport.
    #[must_use]
    pub fn mode(&self) -> TransportMode {
        self.transport.mode()
    }

    /// Per-host limiter shared by every enqueue.
    #[must_use]
    pub const fn rate_limiter(&self) -> &DeliveryRateLimiter {
        &self.limiter
    }

    /// Accept a job for delivery.
    ///
    /// # Errors
    /// Fails when the inbox URL has no host or the transport rejects the job.
    pub async fn enqueue(&self, job: DeliverJob) -> Result<EnqueueOutcome, QueueError> {
        let host = job
            .host()
            .ok_or_else(|| QueueError::InvalidInbox(job.inbox.clone()))?;

        if !self.dedup.claim(&job.dedup_key).await {
            debug!(inbox = %job.inbox, key = %job.dedup_key, "Coalesced duplicate delivery");
            return Ok(EnqueueOutcome::Coalesced);
        }

        let (delay, outcome) = match self.limiter.check(&host).await {
            RateLimitResult::Allowed => (None, EnqueueOutcome::Queued),
            RateLimitResult::Delayed(delay) => (Some(delay), EnqueueOutcome::Delayed(delay)),
            RateLimitResult::Dropped { required } => {
                warn!(
                    host = %host,
                    inbox = %job.inbox,
                    required_ms = u64::try_from(required.as_millis()).unwrap_or(u64::MAX),
                    "Rate limit delay over cap, dropping delivery"
                );
                self.dedup.release(&job.dedup_key).await;
                self.metrics.record_dropped().await;
                return Ok(EnqueueOutcome::Dropped { required });
            }
        };

        let key = job.dedup_key.clone();
        if let Err(e) = self.transport.dispatch(job, delay).await {
            self.dedup.release(&key).await;
            return Err(e);
        }
        Ok(outcome)
    }
}

#[async_trait]
impl ActivityDelivery for DeliveryQueue {
    async fn deliver(&self, user_id: &str, activity: Value, inboxes: Vec<String>) -> AppResult<()> {
        let mut seen = HashSet::new();
        for inbox in inboxes {
            if !seen.insert(inbox.clone()) {
                continue;
            }
            let job = DeliverJob::new(user_id.to_string(), inbox, activity.clone());
            let inbox = job.inbox.clone();
            match self.enqueue(job).await {
                Ok(outcome) => {
                    info!(user_id = %user_id, inbox = %inbox, outcome = ?outcome, "Enqueued delivery");
                }
                Err(e) => {
                    error!(
                        user_id = %user_id,
                        inbox = %inbox,
                        error = %e,
                        "Failed to enqueue delivery"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        jobs: Mutex<Vec<(DeliverJob, Option<Duration>)>>,
    }

    #[async_trait]
    impl DeliveryTransport for Recording {
        async fn dispatch(
            &self,
            job: DeliverJob,
            delay: Option<Duration>,
        ) -> Result<(), QueueError> {
            self.jobs.lock().unwrap().push((job, delay));
            Ok(())
        }

        fn mode(&self) -> TransportMode {
            TransportMode::Broker
        }
    }

    fn queue(transport: Arc<Recording>) -> DeliveryQueue {
        DeliveryQueue::from_config(transport, &DeliveryConfig::default(), DeliveryMetrics::new())
    }

    fn like(n: u32) -> Value {
        json!({"id": format!("https://local.example/likes/{n}"), "type": "Like"})
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_coalesced() {
        let transport = Arc::new(Recording::default());
        let queue = queue(transport.clone());
        let job = DeliverJob::new("u1".into(), "https://remote.example/inbox".into(), like(1));

        assert_eq!(queue.enqueue(job.clone()).await.unwrap(), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(job).await.unwrap(), EnqueueOutcome::Coalesced);
        assert_eq!(transport.jobs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_inbox_is_rejected() {
        let queue = queue(Arc::new(Recording::default()));
        let job = DeliverJob::new("u1".into(), "not a url".into(), like(1));

        assert!(matches!(
            queue.enqueue(job).await,
            Err(QueueError::InvalidInbox(_))
        ));
    }

    #[tokio::test]
    async fn test_activity_delivery_fans_out_once_per_inbox() {
        let transport = Arc::new(Recording::default());
        let queue = queue(transport.clone());

        queue
            .deliver(
                "u1",
                like(2),
                vec![
                    "https://a.example/inbox".into(),
                    "https://b.example/inbox".into(),
                    "https://a.example/inbox".into(),
                ],
            )
            .await
            .unwrap();

        let jobs = transport.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|(_, delay)| delay.is_none()));
    }

    #[tokio::test]
    async fn test_dedup_window_expires() {
        let dedup = DedupWindow::new(Duration::from_millis(20));
        assert!(dedup.claim("k").await);
        assert!(!dedup.claim("k").await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(dedup.claim("k").await);
        assert_eq!(dedup.len().await, 1);
    }
}
