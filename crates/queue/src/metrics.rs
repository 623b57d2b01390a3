//! Delivery success/failure counters and the periodic health report.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

/// Success and failure counts for one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryCounts {
    /// Attempts that reached a 2xx.
    pub success: u64,
    /// Attempts that errored or got a non-2xx status.
    pub failure: u64,
}

impl DeliveryCounts {
    /// All attempts.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.success + self.failure
    }

    /// Share of successful attempts, `None` before any attempt.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.success as f64 / total as f64),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Counts across every host.
    pub total: DeliveryCounts,
    /// Jobs shed by the rate limiter
    pub dropped: u64,
    /// Counts per target host.
    pub hosts: BTreeMap<String, DeliveryCounts>,
}

/// Verdict of one health report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthStatus {
    /// Nothing was attempted yet.
    Idle,
    /// Success rate at or above the warning threshold.
    Healthy(f64),
    /// Success rate below the warning threshold.
    Degraded(f64),
}

#[derive(Debug, Default)]
struct Counters {
    total: DeliveryCounts,
    dropped: u64,
    hosts: HashMap<String, DeliveryCounts>,
}

/// Process-local delivery metrics.
#[derive(Debug, Clone, Default)]
pub struct DeliveryMetrics {
    counters: Arc<RwLock<Counters>>,
}

impl DeliveryMetrics {
    /// Metrics with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a successful attempt against `host`.
    pub async fn record_success(&self, host: &str) {
        let mut counters = self.counters.write().await;
        counters.total.success += 1;
        counters.hosts.entry(host.to_string()).or_default().success += 1;
    }

    /// Count a failed attempt against `host`.
    pub async fn record_failure(&self, host: &str) {
        let mut counters = self.counters.write().await;
        counters.total.failure += 1;
        counters.hosts.entry(host.to_string()).or_default().failure += 1;
    }

    /// Count a job shed by the rate limiter.
    pub async fn record_dropped(&self) {
        self.counters.write().await.dropped += 1;
    }

    /// Copy the current counters.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.read().await;
        MetricsSnapshot {
            total: counters.total,
            dropped: counters.dropped,
            hosts: counters
                .hosts
                .iter()
                .map(|(host, counts)| (host.clone(), *counts))
                .collect(),
        }
    }

    /// Zero every counter.
    pub async fn reset(&self) {
        *self.counters.write().await = Counters::default();
    }

    /// Log aggregate and per-host counts; warn when the success rate is
    /// below `warn_ratio`.
    pub async fn report(&self, warn_ratio: f64) -> HealthStatus {
        let snapshot = self.snapshot().await;

        for (host, counts) in &snapshot.hosts {
            info!(
                host = %host,
                success = counts.success,
                failure = counts.failure,
                "Delivery stats for host"
            );
        }

        let Some(rate) = snapshot.total.success_rate() else {
            info!(dropped = snapshot.dropped, "No deliveries attempted");
            return HealthStatus::Idle;
        };

        if rate < warn_ratio {
            warn!(
                success = snapshot.total.success,
                failure = snapshot.total.failure,
                dropped = snapshot.dropped,
                success_rate = rate,
                threshold = warn_ratio,
                "Delivery success rate below threshold"
            );
            HealthStatus::Degraded(rate)
        } else {
            info!(
                success = snapshot.total.success,
                failure = snapshot.total.failure,
                dropped = snapshot.dropped,
                success_rate = rate,
                "Delivery health"
            );
            HealthStatus::Healthy(rate)
        }
    }
}

/// Emit a health report every `period`.
pub fn spawn_health_reporter(
    metrics: DeliveryMetrics,
    period: Duration,
    warn_ratio: f64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            metrics.report(warn_ratio).await;
        }
    })
}
