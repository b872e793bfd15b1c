//! The capability set shared by all three storage tiers.

use std::time::Duration;

use async_trait::async_trait;
use nuvex_core::{LayerTag, NuvexResult, Value};

/// Operations every tier supports.
///
/// The engine owns three named layer fields rather than a homogeneous vector
/// because their semantics differ (Postgres is authoritative, the others are
/// caches); this trait exists for the places that genuinely treat tiers
/// uniformly: health pings, best-effort deletes and key enumeration.
///
/// # Error policy
///
/// - `get` and `exists` on the cache tiers swallow transport errors into
///   absent/false and log them; the Postgres implementation returns read
///   errors so the engine can count them before degrading to a miss.
/// - `set` and `increment` return their errors; the engine decides whether a
///   failure is fatal (L3 on the default write path, the authoritative tier
///   on increments) or best-effort (cache fan-out).
#[async_trait]
pub trait StorageLayer: Send + Sync {
    /// Which tier this is.
    fn tag(&self) -> LayerTag;

    /// Fetch a non-expired value.
    async fn get(&self, key: &str) -> NuvexResult<Option<Value>>;

    /// Insert or replace a value, with an optional TTL.
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> NuvexResult<()>;

    /// Remove a key. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> NuvexResult<bool>;

    /// Whether a non-expired entry exists.
    async fn exists(&self, key: &str) -> NuvexResult<bool>;

    /// Remove every entry. Returns the number removed when the tier can
    /// count them.
    async fn clear(&self) -> NuvexResult<u64>;

    /// Liveness probe. Never errors; an unreachable tier reports `false`.
    async fn ping(&self) -> bool;

    /// Atomically adjust the numeric value under `key` by `delta`, treating
    /// an absent or expired entry as zero, and refresh the TTL. Returns the
    /// post-increment value.
    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> NuvexResult<i64>;

    /// Enumerate non-expired keys matching a glob pattern (`*` matches all).
    async fn keys(&self, pattern: &str) -> NuvexResult<Vec<String>>;
}
