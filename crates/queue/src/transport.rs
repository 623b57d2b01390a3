//! Where enqueued jobs go.
//!
//! [`BrokerTransport`] persists jobs in Redis through apalis, one namespace
//! per priority tier, for the deliver workers to pick up.
//! [`DirectTransport`] runs each job inline, once, when no broker is
//! reachable. The choice is made once at startup.

use std::time::Duration;

use apalis::prelude::*;
use apalis_redis::{Config as StorageConfig, RedisStorage};
use async_trait::async_trait;
use chrono::Utc;
use fedi_federation::DeliveryPriority;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::executor::{JobExecutor, JobOutcome};
use crate::jobs::DeliverJob;

/// How the active transport delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Jobs go through the Redis broker and its workers.
    Broker,
    /// Jobs are delivered inline, once.
    Direct,
}

/// Hands jobs to whatever actually delivers them.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Dispatch `job`, no earlier than `delay` from now.
    async fn dispatch(&self, job: DeliverJob, delay: Option<Duration>) -> Result<(), QueueError>;

    /// Which transport this is.
    fn mode(&self) -> TransportMode;
}

/// apalis-redis storages, one per priority tier.
#[derive(Clone)]
pub struct BrokerTransport {
    urgent: RedisStorage<DeliverJob>,
    normal: RedisStorage<DeliverJob>,
    low: RedisStorage<DeliverJob>,
}

impl BrokerTransport {
    /// Storages namespaced as `{prefix}:deliver:{tier}`.
    #[must_use]
    pub fn new(conn: ConnectionManager, prefix: &str) -> Self {
        let storage = |priority: DeliveryPriority| {
            RedisStorage::new_with_config(
                conn.clone(),
                StorageConfig::default().set_namespace(&namespace(prefix, priority)),
            )
        };
        Self {
            urgent: storage(DeliveryPriority::Urgent),
            normal: storage(DeliveryPriority::Normal),
            low: storage(DeliveryPriority::Low),
        }
    }

    /// Storage of the tier `priority` maps to.
    #[must_use]
    pub fn storage(&self, priority: DeliveryPriority) -> RedisStorage<DeliverJob> {
        match priority {
            DeliveryPriority::Urgent => self.urgent.clone(),
            DeliveryPriority::Normal => self.normal.clone(),
            DeliveryPriority::Low => self.low.clone(),
        }
    }
}

/// Redis namespace of one priority tier.
#[must_use]
pub fn namespace(prefix: &str, priority: DeliveryPriority) -> String {
    format!("{prefix}:deliver:{priority}")
}

#[async_trait]
impl DeliveryTransport for BrokerTransport {
    async fn dispatch(&self, job: DeliverJob, delay: Option<Duration>) -> Result<(), QueueError> {
        let mut storage = self.storage(job.priority);
        let inbox = job.inbox.clone();
        let priority = job.priority;

        match delay.filter(|d| !d.is_zero()) {
            Some(delay) => {
                let delay = chrono::Duration::from_std(delay)
                    .map_err(|e| QueueError::Broker(e.to_string()))?;
                let run_at = (Utc::now() + delay).timestamp();
                storage
                    .schedule(job, run_at)
                    .await
                    .map_err(|e| QueueError::Broker(e.to_string()))?;
                debug!(inbox = %inbox, priority = %priority, run_at, "Scheduled delivery job");
            }
            None => {
                storage
                    .push(job)
                    .await
                    .map_err(|e| QueueError::Broker(e.to_string()))?;
                debug!(inbox = %inbox, priority = %priority, "Queued delivery job");
            }
        }
        Ok(())
    }

    fn mode(&self) -> TransportMode {
        TransportMode::Broker
    }
}

/// Inline delivery without a broker.
///
/// Waits out the rate-limit delay, makes a single attempt and logs a
/// failure instead of retrying.
#[derive(Clone)]
pub struct DirectTransport {
    executor: JobExecutor,
}

impl DirectTransport {
    /// Deliver through `executor`.
    #[must_use]
    pub const fn new(executor: JobExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl DeliveryTransport for DirectTransport {
    async fn dispatch(&self, job: DeliverJob, delay: Option<Duration>) -> Result<(), QueueError> {
        if let Some(delay) = delay.filter(|d| !d.is_zero()) {
            debug!(
                inbox = %job.inbox,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Waiting for rate limit"
            );
            tokio::time::sleep(delay).await;
        }

        let inbox = job.inbox.clone();
        match self.executor.run(job).await {
            JobOutcome::Delivered | JobOutcome::DeadLettered => {}
            JobOutcome::Retry { job, .. } => {
                warn!(
                    inbox = %inbox,
                    attempts = job.attempts,
                    "Direct delivery failed, not retrying"
                );
            }
        }
        Ok(())
    }

    fn mode(&self) -> TransportMode {
        TransportMode::Direct
    }
}
