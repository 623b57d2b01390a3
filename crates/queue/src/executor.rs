//! Running one delivery attempt.
//!
//! [`JobExecutor::run`] performs a single attempt and decides what happens
//! next: done, retry after a backoff, or dead-letter. Transports act on
//! that decision.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fedi_common::AppError;
use fedi_db::repositories::UserKeypairRepository;
use fedi_federation::signature::SignatureError;
use fedi_federation::{ApClient, ApClientError, HttpSigner};
use tracing::{error, info, warn};

use crate::jobs::DeliverJob;
use crate::metrics::DeliveryMetrics;
use crate::retry::{DeadLetterEntry, DeadLetterStore, RetryConfig};

/// Why a delivery attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("No keypair for user {0}")]
    MissingKey(String),

    #[error(transparent)]
    Remote(#[from] ApClientError),

    #[error("Invalid signing key: {0}")]
    Signing(#[from] SignatureError),

    #[error("Failed to serialize activity: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Repository(#[from] AppError),
}

impl DeliveryError {
    /// Whether a later attempt could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_retryable(),
            Self::Repository(e) => e.is_retryable(),
            Self::MissingKey(_) | Self::Signing(_) | Self::Serialize(_) => false,
        }
    }
}

/// Sends one job over the wire.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, job: &DeliverJob) -> Result<(), DeliveryError>;
}

/// Signs with the sending user's key and POSTs through [`ApClient`].
#[derive(Clone)]
pub struct SigningDeliverer {
    client: ApClient,
    keypairs: Arc<dyn UserKeypairRepository>,
}

impl SigningDeliverer {
    #[must_use]
    pub fn new(client: ApClient, keypairs: Arc<dyn UserKeypairRepository>) -> Self {
        Self { client, keypairs }
    }
}

#[async_trait]
impl Deliverer for SigningDeliverer {
    async fn deliver(&self, job: &DeliverJob) -> Result<(), DeliveryError> {
        let keypair = self
            .keypairs
            .find_by_user_id(&job.user_id)
            .await?
            .ok_or_else(|| DeliveryError::MissingKey(job.user_id.clone()))?;

        let signer = HttpSigner::new(&keypair.private_key_pem, keypair.key_id)?;
        let body = serde_json::to_vec(&job.activity)?;

        self.client.deliver(&job.inbox, body, &signer).await?;
        Ok(())
    }
}

/// What to do with a job after an attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Delivered,
    /// Try again after `delay`; `job.attempts` already counts this attempt.
    Retry { job: DeliverJob, delay: Duration },
    DeadLettered,
}

/// Runs attempts and applies the retry policy.
#[derive(Clone)]
pub struct JobExecutor {
    deliverer: Arc<dyn Deliverer>,
    retry: RetryConfig,
    dead_letters: DeadLetterStore<DeliverJob>,
    metrics: DeliveryMetrics,
}

impl JobExecutor {
    #[must_use]
    pub fn new(
        deliverer: Arc<dyn Deliverer>,
        retry: RetryConfig,
        dead_letters: DeadLetterStore<DeliverJob>,
        metrics: DeliveryMetrics,
    ) -> Self {
        Self {
            deliverer,
            retry,
            dead_letters,
            metrics,
        }
    }

    #[must_use]
    pub const fn dead_letters(&self) -> &DeadLetterStore<DeliverJob> {
        &self.dead_letters
    }

    #[must_use]
    pub const fn metrics(&self) -> &DeliveryMetrics {
        &self.metrics
    }

    /// Make one attempt at `job`.
    pub async fn run(&self, job: DeliverJob) -> JobOutcome {
        let host = job.host().unwrap_or_default();
        let job = job.next_attempt();

        let err = match self.deliverer.deliver(&job).await {
            Ok(()) => {
                self.metrics.record_success(&host).await;
                info!(
                    inbox = %job.inbox,
                    attempts = job.attempts,
                    priority = %job.priority,
                    "Activity delivered"
                );
                return JobOutcome::Delivered;
            }
            Err(e) => e,
        };

        self.metrics.record_failure(&host).await;

        if err.is_retryable() && self.retry.should_retry(job.attempts) {
            let delay = self.retry.delay_after(job.attempts);
            warn!(
                inbox = %job.inbox,
                attempts = job.attempts,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Delivery failed, will retry"
            );
            return JobOutcome::Retry { job, delay };
        }

        error!(
            inbox = %job.inbox,
            attempts = job.attempts,
            activity_id = ?job.activity_id(),
            error = %err,
            "Delivery failed permanently, dead-lettering"
        );
        let attempts = job.attempts;
        self.dead_letters
            .push(DeadLetterEntry::new(job, attempts, err.to_string()))
            .await;
        JobOutcome::DeadLettered
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures_left: AtomicU32,
        status: u16,
    }

    #[async_trait]
    impl Deliverer for Flaky {
        async fn deliver(&self, _job: &DeliverJob) -> Result<(), DeliveryError> {
            if self.failures_left.load(Ordering::SeqCst) == 0 {
                return Ok(());
            }
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            Err(ApClientError::Status {
                status: self.status,
                body: String::new(),
            }
            .into())
        }
    }

    fn executor(failures: u32, status: u16) -> JobExecutor {
        JobExecutor::new(
            Arc::new(Flaky {
                failures_left: AtomicU32::new(failures),
                status,
            }),
            RetryConfig::default(),
            DeadLetterStore::default(),
            DeliveryMetrics::new(),
        )
    }

    fn job() -> DeliverJob {
        DeliverJob::new(
            "u1".into(),
            "https://remote.example/inbox".into(),
            json!({"id": "https://local.example/likes/1", "type": "Like"}),
        )
    }

    #[tokio::test]
    async fn test_transient_failure_schedules_retry() {
        let executor = executor(1, 503);

        let JobOutcome::Retry { job, delay } = executor.run(job()).await else {
            panic!("expected retry");
        };
        assert_eq!(job.attempts, 1);
        assert_eq!(delay, Duration::from_secs(1));

        assert_eq!(executor.run(job).await, JobOutcome::Delivered);
        let snapshot = executor.metrics().snapshot().await;
        assert_eq!(snapshot.hosts["remote.example"].success, 1);
        assert_eq!(snapshot.hosts["remote.example"].failure, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters_immediately() {
        let executor = executor(1, 400);

        assert_eq!(executor.run(job()).await, JobOutcome::DeadLettered);

        let entries = executor.dead_letters().entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempts, 1);
    }

    #[test]
    fn test_error_classification() {
        let timeout: DeliveryError = ApClientError::Timeout("slow".into()).into();
        assert!(timeout.is_retryable());
        assert!(!DeliveryError::MissingKey("u1".into()).is_retryable());
    }
}
