//! Outbound delivery queue.
//!
//! - **Jobs**: one [`DeliverJob`] per (activity, inbox)
//! - **Rate limiting**: per-host sliding window with load shedding
//! - **Dedup**: identical jobs inside the in-flight window are coalesced
//! - **Transports**: apalis-redis broker with per-priority tiers, or direct delivery
//! - **Retry**: exponential backoff, then a dead letter store
//! - **Metrics**: per-host success/failure counts and a periodic health report

pub mod error;
pub mod executor;
pub mod jobs;
pub mod metrics;
pub mod probe;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod transport;
pub mod workers;

pub use error::QueueError;
pub use executor::{Deliverer, DeliveryError, JobExecutor, JobOutcome, SigningDeliverer};
pub use jobs::*;
pub use metrics::{DeliveryCounts, DeliveryMetrics, HealthStatus, spawn_health_reporter};
pub use probe::connect_broker;
pub use queue::{DedupWindow, DeliveryQueue, EnqueueOutcome};
pub use rate_limit::{DeliveryRateLimiter, RateLimitConfig, RateLimitResult};
pub use retry::{DeadLetterEntry, DeadLetterStore, RetryConfig};
pub use transport::{BrokerTransport, DeliveryTransport, DirectTransport, TransportMode};
pub use workers::*;
