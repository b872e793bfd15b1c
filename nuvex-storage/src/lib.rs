//! NUVEX-STORAGE - Tiered Storage Engine
//!
//! Three storage tiers behind one orchestrator:
//! - [`MemoryLayer`] (L1): bounded in-process LRU map with lazy TTL expiry
//! - [`RedisLayer`] (L2, optional): distributed cache with native TTL and
//!   atomic increment
//! - [`PostgresLayer`] (L3, optional): the durable source of truth
//!
//! [`StorageEngine`] composes the tiers: reads cascade L1 → L2 → L3 and warm
//! the caches on the way back up; default writes commit to Postgres first and
//! fan out to the caches best-effort; increments run on the most
//! authoritative available tier and propagate upward by plain writes.
//! [`SchemaManager`] owns the L3 DDL.

pub mod engine;
pub mod layer;
pub mod memory;
pub mod metrics;
pub mod pattern;
pub mod postgres;
pub mod redis;
pub mod schema;

pub use engine::{CleanupReport, EngineState, StorageEngine};
pub use layer::StorageLayer;
pub use memory::MemoryLayer;
pub use metrics::{EngineMetrics, LayerMetrics, MetricsReport, MetricsSnapshot, MetricsTotals};
pub use postgres::{PostgresLayer, StoreEntry};
pub use redis::RedisLayer;
pub use schema::SchemaManager;
