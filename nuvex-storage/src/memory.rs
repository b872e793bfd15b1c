//! In-process memory layer (L1).
//!
//! A bounded LRU map of `key → (value, optional expiry)`. Recency is the
//! cache's insertion order: every read re-ranks the entry most recently used,
//! and inserting into a full cache evicts the least recently used entry.
//! Expiry is lazy on read plus the engine's periodic `cleanup` sweep, and is
//! measured against a monotonic clock.
//!
//! All operations are serialized on one mutex; none of them suspends while
//! holding it.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use nuvex_core::{CacheError, LayerTag, NuvexResult, Value};
use parking_lot::Mutex;

use crate::layer::StorageLayer;
use crate::pattern::glob_match;

/// Probe key used by `ping`. Invisible to callers: enumeration skips it.
const PING_PROBE_KEY: &str = "__nuvex_ping__";

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Bounded, LRU-ordered, TTL-aware cache local to the process.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct MemoryLayer {
    store: Arc<Mutex<LruCache<String, MemoryEntry>>>,
    max_size: usize,
}

impl MemoryLayer {
    /// Create a layer bounded to `max_size` entries (floored at one).
    pub fn new(max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).expect("capacity is at least one");
        Self {
            store: Arc::new(Mutex::new(LruCache::new(capacity))),
            max_size: capacity.get(),
        }
    }

    /// Number of live entries. Counts not-yet-swept expired entries too,
    /// matching what the LRU bound applies to.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// The configured capacity.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Sweep every expired entry out, returning how many were removed.
    pub fn cleanup(&self) -> u64 {
        let now = Instant::now();
        let mut store = self.store.lock();
        let expired: Vec<String> = store
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        let count = expired.len() as u64;
        for key in expired {
            store.pop(&key);
        }
        count
    }

    fn get_sync(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut store = self.store.lock();
        let hit = match store.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return None,
        };
        if hit.is_none() {
            store.pop(key);
        }
        hit
    }

    fn set_sync(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let entry = MemoryEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.store.lock().push(key.to_string(), entry);
    }
}

#[async_trait]
impl StorageLayer for MemoryLayer {
    fn tag(&self) -> LayerTag {
        LayerTag::Memory
    }

    async fn get(&self, key: &str) -> NuvexResult<Option<Value>> {
        Ok(self.get_sync(key))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> NuvexResult<()> {
        self.set_sync(key, value.clone(), ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> NuvexResult<bool> {
        let now = Instant::now();
        match self.store.lock().pop(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> NuvexResult<bool> {
        let now = Instant::now();
        let mut store = self.store.lock();
        let live = match store.peek(key) {
            Some(entry) => !entry.is_expired(now),
            None => return Ok(false),
        };
        if !live {
            store.pop(key);
        }
        Ok(live)
    }

    async fn clear(&self) -> NuvexResult<u64> {
        let mut store = self.store.lock();
        let count = store.len() as u64;
        store.clear();
        Ok(count)
    }

    async fn ping(&self) -> bool {
        // Probe write + delete. If the probe displaces a real entry from a
        // full cache, put the victim back.
        let mut store = self.store.lock();
        let evicted = store.push(
            PING_PROBE_KEY.to_string(),
            MemoryEntry {
                value: Value::Bool(true),
                expires_at: None,
            },
        );
        let ok = store.pop(PING_PROBE_KEY).is_some();
        if let Some((victim_key, victim_entry)) = evicted {
            if victim_key != PING_PROBE_KEY {
                store.push(victim_key, victim_entry);
            }
        }
        ok
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> NuvexResult<i64> {
        let now = Instant::now();
        let mut store = self.store.lock();
        let current = match store.get(key) {
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => Some(entry.value.as_i64().ok_or_else(|| {
                CacheError::NotNumeric {
                    key: key.to_string(),
                }
            })?),
            None => Some(0),
        };
        // Expired entries count as zero and are replaced below.
        let current = current.unwrap_or(0);
        let next = current + delta;
        store.push(
            key.to_string(),
            MemoryEntry {
                value: Value::from(next),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(next)
    }

    async fn keys(&self, pattern: &str) -> NuvexResult<Vec<String>> {
        let now = Instant::now();
        let store = self.store.lock();
        Ok(store
            .iter()
            .filter(|(key, entry)| {
                key.as_str() != PING_PROBE_KEY
                    && !entry.is_expired(now)
                    && glob_match(pattern, key)
            })
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let layer = MemoryLayer::new(10);
        layer.set("a", &json!({"n": 1}), None).await.unwrap();
        assert_eq!(layer.get("a").await.unwrap(), Some(json!({"n": 1})));
        assert_eq!(layer.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        // maxSize=3: a, b, c, touch a, insert d => b is the victim.
        let layer = MemoryLayer::new(3);
        layer.set("a", &json!(1), None).await.unwrap();
        layer.set("b", &json!(2), None).await.unwrap();
        layer.set("c", &json!(3), None).await.unwrap();
        assert_eq!(layer.get("a").await.unwrap(), Some(json!(1)));
        layer.set("d", &json!(4), None).await.unwrap();

        assert_eq!(layer.len(), 3);
        assert!(layer.exists("a").await.unwrap());
        assert!(!layer.exists("b").await.unwrap());
        assert!(layer.exists("c").await.unwrap());
        assert!(layer.exists("d").await.unwrap());
    }

    #[tokio::test]
    async fn test_capacity_bound_holds() {
        let layer = MemoryLayer::new(5);
        for i in 0..50 {
            layer.set(&format!("k{i}"), &json!(i), None).await.unwrap();
            assert!(layer.len() <= 5);
        }
        assert_eq!(layer.len(), 5);
    }

    #[tokio::test]
    async fn test_replacing_existing_key_does_not_evict() {
        let layer = MemoryLayer::new(2);
        layer.set("a", &json!(1), None).await.unwrap();
        layer.set("b", &json!(2), None).await.unwrap();
        layer.set("a", &json!(10), None).await.unwrap();
        assert_eq!(layer.len(), 2);
        assert_eq!(layer.get("b").await.unwrap(), Some(json!(2)));
        assert_eq!(layer.get("a").await.unwrap(), Some(json!(10)));
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy() {
        let layer = MemoryLayer::new(10);
        layer
            .set("t", &json!(1), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(layer.get("t").await.unwrap(), Some(json!(1)));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(layer.len(), 1);
        assert_eq!(layer.get("t").await.unwrap(), None);
        assert_eq!(layer.len(), 0);
    }

    #[tokio::test]
    async fn test_exists_expires_lazily() {
        let layer = MemoryLayer::new(10);
        layer
            .set("t", &json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!layer.exists("t").await.unwrap());
        assert_eq!(layer.len(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_expired_entries() {
        let layer = MemoryLayer::new(10);
        layer
            .set("short", &json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        layer.set("long", &json!(2), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(layer.cleanup(), 1);
        assert_eq!(layer.len(), 1);
        assert_eq!(layer.get("long").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_delete() {
        let layer = MemoryLayer::new(10);
        layer.set("a", &json!(1), None).await.unwrap();
        assert!(layer.delete("a").await.unwrap());
        assert!(!layer.delete("a").await.unwrap());
        assert_eq!(layer.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_returns_count() {
        let layer = MemoryLayer::new(10);
        layer.set("a", &json!(1), None).await.unwrap();
        layer.set("b", &json!(2), None).await.unwrap();
        assert_eq!(layer.clear().await.unwrap(), 2);
        assert!(layer.is_empty());
    }

    #[tokio::test]
    async fn test_increment_from_absent() {
        let layer = MemoryLayer::new(10);
        assert_eq!(layer.increment("c", 5, None).await.unwrap(), 5);
        assert_eq!(layer.increment("c", -2, None).await.unwrap(), 3);
        assert_eq!(layer.get("c").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_increment_treats_expired_as_zero() {
        let layer = MemoryLayer::new(10);
        layer
            .set("c", &json!(100), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(layer.increment("c", 1, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_non_numeric_fails() {
        let layer = MemoryLayer::new(10);
        layer.set("s", &json!("text"), None).await.unwrap();
        let err = layer.increment("s", 1, None).await.unwrap_err();
        assert!(err.to_string().contains("not numeric"));
        // The original value survives a failed increment.
        assert_eq!(layer.get("s").await.unwrap(), Some(json!("text")));
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let layer = MemoryLayer::new(10);
        assert!(layer.ping().await);
        assert_eq!(layer.len(), 0);
    }

    #[tokio::test]
    async fn test_ping_on_full_cache_keeps_entries() {
        let layer = MemoryLayer::new(2);
        layer.set("a", &json!(1), None).await.unwrap();
        layer.set("b", &json!(2), None).await.unwrap();
        assert!(layer.ping().await);
        assert_eq!(layer.len(), 2);
        assert!(layer.exists("a").await.unwrap());
        assert!(layer.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_filters_by_glob() {
        let layer = MemoryLayer::new(10);
        layer.set("user:1", &json!(1), None).await.unwrap();
        layer.set("user:2", &json!(2), None).await.unwrap();
        layer.set("session:1", &json!(3), None).await.unwrap();

        let mut keys = layer.keys("user:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["user:1", "user:2"]);

        assert_eq!(layer.keys("*").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_keys_skips_expired() {
        let layer = MemoryLayer::new(10);
        layer
            .set("gone", &json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        layer.set("kept", &json!(2), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(layer.keys("*").await.unwrap(), vec!["kept"]);
    }
}
