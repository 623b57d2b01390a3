//! Startup check for the job broker.

use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::{info, warn};

const BASE_BACKOFF: Duration = Duration::from_millis(200);

/// Backoff before retry number `attempt` (1-indexed), capped at `cap`.
#[must_use]
pub fn backoff(attempt: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    BASE_BACKOFF.saturating_mul(factor).min(cap)
}

/// Connect to the broker, retrying up to `attempts` times.
///
/// Returns `None` when the broker stays unreachable; callers then fall
/// back to direct delivery.
pub async fn connect_broker(url: &str, attempts: u32, cap: Duration) -> Option<ConnectionManager> {
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Invalid broker URL");
            return None;
        }
    };

    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match ConnectionManager::new(client.clone()).await {
            Ok(conn) => {
                info!(attempt, "Connected to job broker");
                return Some(conn);
            }
            Err(e) if attempt < attempts => {
                let wait = backoff(attempt, cap);
                warn!(
                    attempt,
                    error = %e,
                    retry_in_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "Job broker unreachable"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                warn!(attempt, error = %e, "Job broker unreachable, giving up");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let cap = Duration::from_secs(1);
        assert_eq!(backoff(1, cap), Duration::from_millis(200));
        assert_eq!(backoff(2, cap), Duration::from_millis(400));
        assert_eq!(backoff(3, cap), Duration::from_millis(800));
        assert_eq!(backoff(4, cap), cap);
        assert_eq!(backoff(40, cap), cap);
    }

    #[tokio::test]
    async fn test_invalid_url_gives_up_immediately() {
        assert!(
            connect_broker("not a url", 3, Duration::from_millis(10))
                .await
                .is_none()
        );
    }
}
