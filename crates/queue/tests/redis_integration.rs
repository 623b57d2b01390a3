//! Redis integration tests.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test --test redis_integration -- --ignored`
//!
//! Set `REDIS_URL` environment variable to point to your Redis instance.
//! Default: <redis://localhost:6379>

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::time::Duration;

use fedi_queue::{BrokerTransport, DeliverJob, DeliveryTransport, TransportMode, connect_broker};
use serde_json::json;

fn get_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn job(n: u32) -> DeliverJob {
    DeliverJob::new(
        "alice".into(),
        "https://remote.example/inbox".into(),
        json!({"id": format!("https://local.example/follows/{n}"), "type": "Follow"}),
    )
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_broker_probe_connects() {
    let conn = connect_broker(&get_redis_url(), 3, Duration::from_millis(500)).await;
    assert!(conn.is_some(), "Failed to connect to Redis");
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_broker_accepts_immediate_and_scheduled_jobs() {
    let conn = connect_broker(&get_redis_url(), 3, Duration::from_millis(500))
        .await
        .expect("Failed to connect to Redis");
    let transport = BrokerTransport::new(conn, "fedi-test");

    assert_eq!(transport.mode(), TransportMode::Broker);
    transport.dispatch(job(1), None).await.unwrap();
    transport
        .dispatch(job(2), Some(Duration::from_secs(2)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_broker_falls_back() {
    let conn = connect_broker("redis://127.0.0.1:1", 2, Duration::from_millis(10)).await;
    assert!(conn.is_none());
}
