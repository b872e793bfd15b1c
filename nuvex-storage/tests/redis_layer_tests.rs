//! Live-server tests for the Redis layer.
//!
//! Requires a reachable Redis at `NUVEX_REDIS_URL`. Run with:
//!
//! ```sh
//! cargo test -p nuvex-storage --features redis-tests
//! ```

#![cfg(feature = "redis-tests")]

use std::time::Duration;

use nuvex_storage::{RedisLayer, StorageLayer};
use serde_json::json;

async fn redis_layer() -> RedisLayer {
    let url =
        std::env::var("NUVEX_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let layer = RedisLayer::new(&url, Duration::from_secs(60)).expect("layer construction");
    layer.connect().await.expect("redis connect");
    layer
}

#[tokio::test]
async fn live_set_get_round_trip() {
    let layer = redis_layer().await;
    layer.delete("nuvex:test:rt").await.ok();

    layer
        .set("nuvex:test:rt", &json!({"n": "A"}), None)
        .await
        .unwrap();
    assert_eq!(
        layer.get("nuvex:test:rt").await.unwrap(),
        Some(json!({"n": "A"}))
    );
    assert!(layer.delete("nuvex:test:rt").await.unwrap());
}

#[tokio::test]
async fn live_native_ttl_expires() {
    let layer = redis_layer().await;

    layer
        .set("nuvex:test:ttl", &json!(1), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(layer.exists("nuvex:test:ttl").await.unwrap());

    tokio::time::sleep(Duration::from_millis(1_300)).await;
    assert_eq!(layer.get("nuvex:test:ttl").await.unwrap(), None);
}

#[tokio::test]
async fn live_incrby_is_atomic() {
    let layer = redis_layer().await;
    layer.delete("nuvex:test:counter").await.ok();

    assert_eq!(layer.increment("nuvex:test:counter", 5, None).await.unwrap(), 5);
    assert_eq!(layer.increment("nuvex:test:counter", 3, None).await.unwrap(), 8);
    layer.delete("nuvex:test:counter").await.ok();
}

#[tokio::test]
async fn live_ping_and_scan() {
    let layer = redis_layer().await;
    assert!(layer.ping().await);

    layer
        .set("nuvex:test:scan:1", &json!(1), Some(Duration::from_secs(30)))
        .await
        .unwrap();
    layer
        .set("nuvex:test:scan:2", &json!(2), Some(Duration::from_secs(30)))
        .await
        .unwrap();

    let mut keys = layer.keys("nuvex:test:scan:*").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["nuvex:test:scan:1", "nuvex:test:scan:2"]);

    layer.delete("nuvex:test:scan:1").await.ok();
    layer.delete("nuvex:test:scan:2").await.ok();
}
