//! Live-database tests for the Postgres layer and the full cascade.
//!
//! Requires a reachable PostgreSQL configured through the `NUVEX_PG_*`
//! environment variables. Run with:
//!
//! ```sh
//! cargo test -p nuvex-storage --features db-tests
//! ```

#![cfg(feature = "db-tests")]

use std::sync::Arc;
use std::time::Duration;

use nuvex_core::{GetOptions, NuvexConfig, PostgresConfig, SetOptions};
use nuvex_storage::{PostgresLayer, StorageEngine, StorageLayer};
use serde_json::json;

fn pg_config(table: &str) -> PostgresConfig {
    let mut config = PostgresConfig::from_env();
    config.schema.table_name = table.to_string();
    config
}

async fn pg_layer(table: &str) -> PostgresLayer {
    let layer = PostgresLayer::new(&pg_config(table)).expect("layer construction");
    layer.setup_schema().await.expect("schema setup");
    layer.clear().await.expect("clear");
    layer
}

#[tokio::test]
async fn live_set_get_delete_round_trip() {
    let layer = pg_layer("nuvex_test_crud").await;

    layer.set("user:1", &json!({"n": "A"}), None).await.unwrap();
    assert_eq!(layer.get("user:1").await.unwrap(), Some(json!({"n": "A"})));
    assert!(layer.exists("user:1").await.unwrap());

    assert!(layer.delete("user:1").await.unwrap());
    assert!(!layer.delete("user:1").await.unwrap());
    assert_eq!(layer.get("user:1").await.unwrap(), None);
}

#[tokio::test]
async fn live_expired_rows_are_invisible() {
    let layer = pg_layer("nuvex_test_ttl").await;

    layer
        .set("t", &json!(1), Some(Duration::from_millis(500)))
        .await
        .unwrap();
    assert!(layer.exists("t").await.unwrap());

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(layer.get("t").await.unwrap(), None);
    assert!(!layer.exists("t").await.unwrap());

    // The row is still on disk until the sweep runs.
    assert_eq!(layer.cleanup_expired().await.unwrap(), 1);
}

#[tokio::test]
async fn live_updated_at_trigger_stamps_updates() {
    let layer = pg_layer("nuvex_test_trigger").await;

    layer.set("k", &json!(1), None).await.unwrap();
    let first = layer.get_entry("k").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    layer.set("k", &json!(2), None).await.unwrap();
    let second = layer.get_entry("k").await.unwrap().unwrap();

    assert_eq!(first.created_at, second.created_at);
    assert!(second.updated_at > first.updated_at);
}

#[tokio::test]
async fn live_concurrent_increments_compose() {
    let layer = Arc::new(pg_layer("nuvex_test_incr").await);

    let mut handles = Vec::new();
    for _ in 0..100 {
        let layer = Arc::clone(&layer);
        handles.push(tokio::spawn(async move {
            layer.increment("counter", 1, None).await.unwrap()
        }));
    }

    let mut seen = Vec::new();
    for handle in handles {
        seen.push(handle.await.unwrap());
    }
    seen.sort();
    let expected: Vec<i64> = (1..=100).collect();
    assert_eq!(seen, expected);
    assert_eq!(layer.get("counter").await.unwrap(), Some(json!(100)));
}

#[tokio::test]
async fn live_increment_folds_expired_value_to_delta() {
    let layer = pg_layer("nuvex_test_incr_ttl").await;

    layer
        .set("c", &json!(50), Some(Duration::from_millis(100)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The expired 50 does not leak into the new count.
    assert_eq!(layer.increment("c", 7, None).await.unwrap(), 7);
}

#[tokio::test]
async fn live_keys_prefix_narrowing() {
    let layer = pg_layer("nuvex_test_keys").await;

    for key in ["user:1", "user:2", "session:1"] {
        layer.set(key, &json!(1), None).await.unwrap();
    }

    let mut keys = layer.keys("user:*").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["user:1", "user:2"]);
    assert_eq!(layer.keys("*").await.unwrap().len(), 3);
}

#[tokio::test]
async fn live_engine_write_is_postgres_first() {
    let mut config = NuvexConfig::default();
    config.postgres = Some(pg_config("nuvex_test_engine"));
    let engine = StorageEngine::new(config).unwrap();
    engine.connect().await.unwrap();
    engine.clear(None).await;

    // Scenario: write, drop the memory copy, read again; the cascade must
    // recover the value from Postgres and re-warm the cache.
    assert!(engine.set("user:1", &json!({"n": "A"}), &SetOptions::default()).await);
    engine
        .delete("user:1", Some(nuvex_core::LayerTag::Memory))
        .await;

    assert_eq!(
        engine.get("user:1", &GetOptions::default()).await,
        Some(json!({"n": "A"}))
    );
    // Warmed: second read is served by the memory layer.
    assert!(engine
        .exists("user:1", Some(nuvex_core::LayerTag::Memory))
        .await);

    engine.disconnect().await;
}
