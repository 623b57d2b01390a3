//! Deliver worker.

use std::sync::Arc;

use apalis::prelude::*;
use fedi_federation::DeliveryPriority;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::executor::{JobExecutor, JobOutcome};
use crate::jobs::DeliverJob;
use crate::transport::{BrokerTransport, DeliveryTransport};

/// Context for the deliver worker.
#[derive(Clone)]
pub struct DeliverContext {
    pub executor: JobExecutor,
    /// Where retries are rescheduled.
    pub broker: BrokerTransport,
    /// Caps in-flight deliveries across all tiers.
    pub permits: Arc<Semaphore>,
}

impl DeliverContext {
    /// Create a new deliver context allowing `concurrency` deliveries at once.
    #[must_use]
    pub fn new(executor: JobExecutor, broker: BrokerTransport, concurrency: usize) -> Self {
        Self {
            executor,
            broker,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }
}

fn failed(e: impl std::error::Error + Send + Sync + 'static) -> Error {
    let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(e);
    Error::Failed(Arc::new(boxed))
}

/// Worker function for delivering activities.
///
/// A failed attempt is rescheduled as a new job carrying its attempt
/// count. Exhausted jobs are dead-lettered and aborted so the broker
/// never replays them.
///
/// # Errors
/// Returns an error if the job was dead-lettered or could not be rescheduled.
pub async fn deliver_worker(job: DeliverJob, ctx: Data<DeliverContext>) -> Result<(), Error> {
    let _permit = ctx.permits.acquire().await.map_err(failed)?;

    info!(
        user_id = %job.user_id,
        inbox = %job.inbox,
        priority = %job.priority,
        attempt = job.attempts + 1,
        "Delivering activity"
    );

    match ctx.executor.run(job).await {
        JobOutcome::Delivered => Ok(()),
        JobOutcome::Retry { job, delay } => {
            let inbox = job.inbox.clone();
            ctx.broker.dispatch(job, Some(delay)).await.map_err(|e| {
                error!(inbox = %inbox, error = %e, "Failed to reschedule delivery");
                failed(e)
            })
        }
        JobOutcome::DeadLettered => {
            let boxed: Box<dyn std::error::Error + Send + Sync> = "delivery dead-lettered".into();
            Err(Error::Abort(Arc::new(boxed)))
        }
    }
}

/// One worker per priority tier, all sharing the context's permits.
#[must_use]
pub fn deliver_monitor(ctx: &DeliverContext, concurrency: usize) -> Monitor {
    DeliveryPriority::ALL
        .into_iter()
        .fold(Monitor::new(), |monitor, priority| {
            monitor.register(
                WorkerBuilder::new(format!("deliver-{priority}"))
                    .concurrency(concurrency)
                    .data(ctx.clone())
                    .backend(ctx.broker.storage(priority))
                    .build_fn(deliver_worker),
            )
        })
}
