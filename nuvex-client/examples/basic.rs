//! Minimal Nuvex walkthrough against a memory-only engine.
//!
//! Run with:
//!
//! ```sh
//! cargo run -p nuvex-client --example basic
//! ```
//!
//! Point it at real backends by exporting `NUVEX_PG_HOST` and/or
//! `NUVEX_REDIS_URL` before running.

use std::time::Duration;

use nuvex_client::Nuvex;
use nuvex_core::{GetOptions, LayerSelector, NuvexConfig, NuvexResult, SetOptions};
use serde_json::json;

#[tokio::main]
async fn main() -> NuvexResult<()> {
    let client = Nuvex::new(NuvexConfig::from_env())?;
    client.connect().await?;

    // Plain CRUD.
    client
        .set("user:1", &json!({"name": "Ada"}), &SetOptions::default())
        .await;
    println!(
        "user:1 = {:?}",
        client.get("user:1", &GetOptions::default()).await
    );

    // Namespaces and counters.
    client
        .set_ns("session", "abc", &json!({"uid": 1}), &SetOptions::default())
        .await;
    let hits = client.increment("stats:hits", 1, None).await?;
    println!("stats:hits = {hits}");

    // TTLs.
    client
        .set(
            "flash",
            &json!("gone soon"),
            &SetOptions::ttl(Duration::from_secs(2)),
        )
        .await;

    // Health and metrics.
    let health = client.health_report(&LayerSelector::All).await;
    println!("health: {:?} {:?}", health.status, health.layers);
    let metrics = client.get_metrics(&LayerSelector::All);
    println!("metrics: {:?}", metrics.totals);

    client.disconnect().await;
    Ok(())
}
