//! The tiered storage engine.
//!
//! Composes the three layers and implements the routing policy:
//!
//! - Reads cascade memory → redis → postgres, warming the faster tiers with
//!   whatever a deeper tier returns.
//! - Default writes commit to Postgres first; a Postgres failure fails the
//!   whole write and no cache is touched. Cache fan-out afterwards is
//!   best-effort.
//! - Increments run on the most authoritative available tier and propagate
//!   the result upward with plain writes, so the caches reflect the
//!   authoritative value exactly.
//!
//! The engine also owns the memory-sweep background task, per-layer health
//! checks and the metrics counters.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use deadpool_postgres::Pool;
use nuvex_core::{
    BatchEntry, BatchSetItem, ConfigPatch, EngineError, GetOptions, KeyPlacement, LayerSelector,
    LayerTag, NuvexConfig, NuvexResult, QueryItem, QueryOptions, QueryResult, SetOptions,
    SortField, SortOrder, Value,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::layer::StorageLayer;
use crate::memory::MemoryLayer;
use crate::metrics::{EngineMetrics, MetricsReport};
use crate::postgres::PostgresLayer;
use crate::redis::RedisLayer;

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Constructed,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Constructed => "constructed",
            EngineState::Connecting => "connecting",
            EngineState::Connected => "connected",
            EngineState::Disconnecting => "disconnecting",
            EngineState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Result of an on-demand cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub memory_purged: u64,
    pub postgres_purged: u64,
}

/// Orchestrator over the three storage tiers.
pub struct StorageEngine {
    config: RwLock<NuvexConfig>,
    memory: MemoryLayer,
    redis: Option<RedisLayer>,
    /// Set when the configured Redis failed to connect; the engine then runs
    /// without the distributed cache.
    redis_down: AtomicBool,
    postgres: Option<PostgresLayer>,
    metrics: EngineMetrics,
    state: Mutex<EngineState>,
    cleanup_shutdown: Mutex<Option<watch::Sender<bool>>>,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StorageEngine {
    /// Build an engine from configuration. Layers are constructed but not
    /// connected; call [`connect`](Self::connect) before use.
    pub fn new(config: NuvexConfig) -> NuvexResult<Self> {
        let memory = MemoryLayer::new(config.memory.max_size);
        let redis = match config.redis.as_ref() {
            Some(rc) => Some(RedisLayer::new(&rc.url, rc.ttl)?),
            None => None,
        };
        let postgres = match config.postgres.as_ref() {
            Some(pc) => Some(PostgresLayer::new(pc)?),
            None => None,
        };
        Ok(Self {
            config: RwLock::new(config),
            memory,
            redis,
            redis_down: AtomicBool::new(false),
            postgres,
            metrics: EngineMetrics::new(),
            state: Mutex::new(EngineState::Constructed),
            cleanup_shutdown: Mutex::new(None),
            cleanup_handle: Mutex::new(None),
        })
    }

    /// Build an engine around a caller-constructed Postgres pool. The pool
    /// stays caller-owned: the engine will not close it at disconnect.
    pub fn with_pool(config: NuvexConfig, pool: Pool) -> NuvexResult<Self> {
        let schema = config
            .postgres
            .as_ref()
            .map(|pc| pc.schema.clone())
            .unwrap_or_default();
        let memory = MemoryLayer::new(config.memory.max_size);
        let redis = match config.redis.as_ref() {
            Some(rc) => Some(RedisLayer::new(&rc.url, rc.ttl)?),
            None => None,
        };
        let postgres = Some(PostgresLayer::from_pool(pool, schema)?);
        Ok(Self {
            config: RwLock::new(config),
            memory,
            redis,
            redis_down: AtomicBool::new(false),
            postgres,
            metrics: EngineMetrics::new(),
            state: Mutex::new(EngineState::Constructed),
            cleanup_shutdown: Mutex::new(None),
            cleanup_handle: Mutex::new(None),
        })
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Bring the engine up. A Redis connection failure degrades to two-layer
    /// mode; a Postgres failure (including schema setup) aborts the connect.
    pub async fn connect(&self) -> NuvexResult<()> {
        {
            let mut state = self.state.lock();
            if *state == EngineState::Connected {
                return Ok(());
            }
            *state = EngineState::Connecting;
        }

        if let Some(redis) = &self.redis {
            match redis.connect().await {
                Ok(()) => self.redis_down.store(false, Ordering::Relaxed),
                Err(e) => {
                    tracing::warn!(error = %e, "redis unavailable, continuing without distributed cache");
                    self.redis_down.store(true, Ordering::Relaxed);
                }
            }
        }

        if let Some(postgres) = &self.postgres {
            if let Err(e) = postgres.setup_schema().await {
                tracing::error!(error = %e, "postgres setup failed, aborting connect");
                *self.state.lock() = EngineState::Disconnected;
                return Err(e);
            }
        }

        self.start_cleanup_task();
        *self.state.lock() = EngineState::Connected;
        tracing::info!(
            redis = self.redis_available(),
            postgres = self.postgres.is_some(),
            "storage engine connected"
        );
        Ok(())
    }

    /// Tear the engine down: stop the sweep task, drop the Redis connection
    /// and close the pool when the engine owns it. Idempotent.
    pub async fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if *state == EngineState::Disconnected {
                return;
            }
            *state = EngineState::Disconnecting;
        }

        if let Some(tx) = self.cleanup_shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.cleanup_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        if let Some(redis) = &self.redis {
            redis.disconnect().await;
        }
        if let Some(postgres) = &self.postgres {
            postgres.close();
        }

        *self.state.lock() = EngineState::Disconnected;
        tracing::info!("storage engine disconnected");
    }

    pub fn is_connected(&self) -> bool {
        *self.state.lock() == EngineState::Connected
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Whether the distributed cache is configured and did not fail connect.
    pub fn redis_available(&self) -> bool {
        self.redis.is_some() && !self.redis_down.load(Ordering::Relaxed)
    }

    fn start_cleanup_task(&self) {
        let cadence = self.config.read().memory.effective_cleanup_interval();
        let (tx, mut rx) = watch::channel(false);
        let memory = self.memory.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let purged = memory.cleanup();
                        if purged > 0 {
                            tracing::debug!(purged, "memory sweep removed expired entries");
                        }
                    }
                }
            }
        });

        *self.cleanup_shutdown.lock() = Some(tx);
        *self.cleanup_handle.lock() = Some(handle);
    }

    // ========================================================================
    // LAYER PLUMBING
    // ========================================================================

    fn redis_layer(&self) -> Option<&RedisLayer> {
        if self.redis_down.load(Ordering::Relaxed) {
            None
        } else {
            self.redis.as_ref()
        }
    }

    fn layer(&self, tag: LayerTag) -> Option<&dyn StorageLayer> {
        match tag {
            LayerTag::Memory => Some(&self.memory),
            LayerTag::Redis => self.redis_layer().map(|r| r as &dyn StorageLayer),
            LayerTag::Postgres => self.postgres.as_ref().map(|p| p as &dyn StorageLayer),
        }
    }

    fn memory_ttl(&self) -> Duration {
        self.config.read().memory.ttl
    }

    fn redis_ttl(&self) -> Duration {
        self.config
            .read()
            .redis
            .as_ref()
            .map(|rc| rc.ttl)
            .unwrap_or(Duration::from_secs(nuvex_core::config::DEFAULT_REDIS_TTL_SECS))
    }

    /// Default TTL a tier uses when it is warmed without an explicit TTL.
    fn warm_ttl(&self, tag: LayerTag) -> Option<Duration> {
        match tag {
            LayerTag::Memory => Some(self.memory_ttl()),
            LayerTag::Redis => Some(self.redis_ttl()),
            LayerTag::Postgres => None,
        }
    }

    // ========================================================================
    // READ CASCADE
    // ========================================================================

    /// Read a key. Never errors: layer failures degrade to a miss.
    pub async fn get(&self, key: &str, options: &GetOptions) -> Option<Value> {
        let started = Instant::now();
        let result = self.get_inner(key, options).await;
        self.metrics.record_response_time(started.elapsed());
        result
    }

    async fn get_inner(&self, key: &str, options: &GetOptions) -> Option<Value> {
        if !self.is_connected() {
            return None;
        }

        if options.skip_cache {
            if let Some(postgres) = &self.postgres {
                return self.read_tracked(postgres, LayerTag::Postgres, key).await;
            }
        }

        if let Some(tag) = options.layer {
            let layer = match self.layer(tag) {
                Some(layer) => layer,
                None => {
                    self.metrics.record_miss();
                    return None;
                }
            };
            return self.read_tracked(layer, tag, key).await;
        }

        // L1
        if let Ok(Some(value)) = self.memory.get(key).await {
            self.metrics.record_hit(LayerTag::Memory);
            return Some(value);
        }

        // L2, warming L1 on a hit
        if let Some(redis) = self.redis_layer() {
            match redis.get(key).await {
                Ok(Some(value)) => {
                    self.metrics.record_hit(LayerTag::Redis);
                    let ttl = options.ttl.or_else(|| self.warm_ttl(LayerTag::Memory));
                    if let Err(e) = self.memory.set(key, &value, ttl).await {
                        tracing::warn!(key, error = %e, "memory warm failed");
                    }
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key, error = %e, "redis read failed, continuing cascade");
                    self.metrics.record_error();
                }
            }
        }

        // L3, warming both caches on a hit
        if let Some(postgres) = &self.postgres {
            match postgres.get(key).await {
                Ok(Some(value)) => {
                    self.metrics.record_hit(LayerTag::Postgres);
                    self.warm_caches(key, &value, options.ttl).await;
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key, error = %e, "postgres read failed, treating as miss");
                    self.metrics.record_error();
                }
            }
        }

        self.metrics.record_miss();
        None
    }

    async fn read_tracked(
        &self,
        layer: &dyn StorageLayer,
        tag: LayerTag,
        key: &str,
    ) -> Option<Value> {
        match layer.get(key).await {
            Ok(Some(value)) => {
                self.metrics.record_hit(tag);
                Some(value)
            }
            Ok(None) => {
                self.metrics.record_miss();
                None
            }
            Err(e) => {
                tracing::warn!(key, layer = %tag, error = %e, "layer read failed, treating as miss");
                self.metrics.record_error();
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Populate both caches with a value just read from the durable store.
    /// Individual warm failures never fail the read.
    async fn warm_caches(&self, key: &str, value: &Value, ttl_override: Option<Duration>) {
        let memory_ttl = ttl_override.or_else(|| self.warm_ttl(LayerTag::Memory));
        let redis_ttl = ttl_override.or_else(|| self.warm_ttl(LayerTag::Redis));

        let memory_warm = self.memory.set(key, value, memory_ttl);
        let redis_warm = async {
            match self.redis_layer() {
                Some(redis) => redis.set(key, value, redis_ttl).await,
                None => Ok(()),
            }
        };

        let (memory_result, redis_result) = tokio::join!(memory_warm, redis_warm);
        if let Err(e) = memory_result {
            tracing::warn!(key, error = %e, "memory warm failed");
        }
        if let Err(e) = redis_result {
            tracing::warn!(key, error = %e, "redis warm failed");
        }
    }

    // ========================================================================
    // WRITE PROTOCOL
    // ========================================================================

    /// Write a key. On the default path Postgres must accept the write first;
    /// cache fan-out afterwards is best-effort. Layer-targeted writes touch
    /// only the named layer.
    pub async fn set(&self, key: &str, value: &Value, options: &SetOptions) -> bool {
        if !self.is_connected() {
            return false;
        }

        if let Some(tag) = options.layer {
            return self.set_layer(tag, key, value, options.ttl).await;
        }

        if let Some(postgres) = &self.postgres {
            if let Err(e) = postgres.set(key, value, options.ttl).await {
                tracing::error!(key, error = %e, "authoritative write failed, aborting set");
                self.metrics.record_error();
                return false;
            }
        }

        let memory_ttl = options.ttl.or_else(|| self.warm_ttl(LayerTag::Memory));
        let redis_ttl = options.ttl.or_else(|| self.warm_ttl(LayerTag::Redis));

        let memory_write = self.memory.set(key, value, memory_ttl);
        let redis_write = async {
            match self.redis_layer() {
                Some(redis) => redis.set(key, value, redis_ttl).await,
                None => Ok(()),
            }
        };
        let (memory_result, redis_result) = tokio::join!(memory_write, redis_write);
        if let Err(e) = memory_result {
            tracing::warn!(key, error = %e, "memory fan-out failed");
        }
        if let Err(e) = redis_result {
            tracing::warn!(key, error = %e, "redis fan-out failed");
        }

        self.metrics.record_set();
        true
    }

    async fn set_layer(
        &self,
        tag: LayerTag,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> bool {
        let layer = match self.layer(tag) {
            Some(layer) => layer,
            None => {
                tracing::warn!(key, layer = %tag, "layer-targeted set on unconfigured layer");
                return false;
            }
        };
        match layer.set(key, value, ttl).await {
            Ok(()) => {
                self.metrics.record_set();
                true
            }
            Err(e) => {
                tracing::warn!(key, layer = %tag, error = %e, "layer-targeted set failed");
                self.metrics.record_error();
                false
            }
        }
    }

    // ========================================================================
    // DELETE / EXISTS / EXPIRE
    // ========================================================================

    /// Delete a key from every layer (best-effort) or from one targeted
    /// layer.
    pub async fn delete(&self, key: &str, layer: Option<LayerTag>) -> bool {
        if !self.is_connected() {
            return false;
        }

        if let Some(tag) = layer {
            let target = match self.layer(tag) {
                Some(target) => target,
                None => return false,
            };
            return match target.delete(key).await {
                Ok(_) => {
                    self.metrics.record_delete();
                    true
                }
                Err(e) => {
                    tracing::warn!(key, layer = %tag, error = %e, "layer-targeted delete failed");
                    self.metrics.record_error();
                    false
                }
            };
        }

        let memory_delete = self.memory.delete(key);
        let redis_delete = async {
            match self.redis_layer() {
                Some(redis) => redis.delete(key).await,
                None => Ok(false),
            }
        };
        let postgres_delete = async {
            match &self.postgres {
                Some(postgres) => postgres.delete(key).await,
                None => Ok(false),
            }
        };

        let (memory_result, redis_result, postgres_result) =
            tokio::join!(memory_delete, redis_delete, postgres_delete);
        for (tag, result) in [
            (LayerTag::Memory, memory_result),
            (LayerTag::Redis, redis_result),
            (LayerTag::Postgres, postgres_result),
        ] {
            if let Err(e) = result {
                tracing::warn!(key, layer = %tag, error = %e, "delete fan-out failed");
                self.metrics.record_error();
            }
        }

        self.metrics.record_delete();
        true
    }

    /// Whether any layer (or the targeted layer) holds a live entry.
    pub async fn exists(&self, key: &str, layer: Option<LayerTag>) -> bool {
        if !self.is_connected() {
            return false;
        }

        if let Some(tag) = layer {
            return match self.layer(tag) {
                Some(target) => target.exists(key).await.unwrap_or(false),
                None => false,
            };
        }

        if self.memory.exists(key).await.unwrap_or(false) {
            return true;
        }
        if let Some(redis) = self.redis_layer() {
            if redis.exists(key).await.unwrap_or(false) {
                return true;
            }
        }
        if let Some(postgres) = &self.postgres {
            if postgres.exists(key).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }

    /// Re-write a key with a fresh TTL. Returns false when the key is
    /// absent.
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        let Some(value) = self.get(key, &GetOptions::default()).await else {
            return false;
        };
        self.set(key, &value, &SetOptions::ttl(ttl)).await
    }

    // ========================================================================
    // INCREMENT CASCADE
    // ========================================================================

    /// Atomically adjust a numeric key on the most authoritative available
    /// tier, then propagate the result upward with plain writes.
    ///
    /// This is the one operation that surfaces errors: a silent wrong number
    /// is worse than a failure to the caller composing on it.
    pub async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> NuvexResult<i64> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected {
                state: self.state().to_string(),
            }
            .into());
        }

        let (value, authoritative) = if let Some(postgres) = &self.postgres {
            let value = postgres.increment(key, delta, ttl).await.map_err(|e| {
                self.metrics.record_error();
                e
            })?;
            (value, LayerTag::Postgres)
        } else if let Some(redis) = self.redis_layer() {
            let value = redis.increment(key, delta, ttl).await.map_err(|e| {
                self.metrics.record_error();
                e
            })?;
            (value, LayerTag::Redis)
        } else {
            let value = self.memory.increment(key, delta, ttl).await.map_err(|e| {
                self.metrics.record_error();
                e
            })?;
            (value, LayerTag::Memory)
        };

        // Plain writes avoid a second race at the cache tier: the
        // authoritative layer's atomicity alone decides the value.
        let propagated = Value::from(value);
        for tag in authoritative.faster_layers() {
            let outcome = match tag {
                LayerTag::Memory => self.memory.set(key, &propagated, ttl).await,
                LayerTag::Redis => match self.redis_layer() {
                    Some(redis) => redis.set(key, &propagated, ttl).await,
                    None => Ok(()),
                },
                LayerTag::Postgres => Ok(()),
            };
            if let Err(e) = outcome {
                tracing::warn!(key, layer = %tag, error = %e, "increment propagation failed");
            }
        }

        Ok(value)
    }

    pub async fn decrement(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> NuvexResult<i64> {
        self.increment(key, -delta, ttl).await
    }

    // ========================================================================
    // BATCH
    // ========================================================================

    /// Sequential multi-set. A failed entry is reported, not fatal.
    pub async fn set_batch(&self, items: &[BatchSetItem]) -> Vec<BatchEntry> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let options = SetOptions {
                ttl: item.ttl,
                layer: None,
            };
            if self.set(&item.key, &item.value, &options).await {
                results.push(BatchEntry::ok(&item.key));
            } else {
                results.push(BatchEntry::failed(&item.key, "set failed"));
            }
        }
        results
    }

    /// Sequential multi-get. Misses are successful entries with no value.
    pub async fn get_batch(&self, keys: &[String]) -> Vec<BatchEntry> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get(key, &GetOptions::default()).await {
                Some(value) => results.push(BatchEntry::ok_with_value(key, value)),
                None => results.push(BatchEntry::ok(key)),
            }
        }
        results
    }

    /// Sequential multi-delete.
    pub async fn delete_batch(&self, keys: &[String]) -> Vec<BatchEntry> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            if self.delete(key, None).await {
                results.push(BatchEntry::ok(key));
            } else {
                results.push(BatchEntry::failed(key, "delete failed"));
            }
        }
        results
    }

    // ========================================================================
    // ENUMERATION & QUERY
    // ========================================================================

    /// Union of non-expired keys across every layer, glob-filtered.
    pub async fn keys(&self, pattern: Option<&str>) -> Vec<String> {
        if !self.is_connected() {
            return Vec::new();
        }
        let pattern = pattern.unwrap_or("*");
        let mut merged = BTreeSet::new();

        match self.memory.keys(pattern).await {
            Ok(keys) => merged.extend(keys),
            Err(e) => tracing::warn!(pattern, error = %e, "memory key scan failed"),
        }
        if let Some(redis) = self.redis_layer() {
            match redis.keys(pattern).await {
                Ok(keys) => merged.extend(keys),
                Err(e) => tracing::warn!(pattern, error = %e, "redis key scan failed"),
            }
        }
        if let Some(postgres) = &self.postgres {
            match postgres.keys(pattern).await {
                Ok(keys) => merged.extend(keys),
                Err(e) => tracing::warn!(pattern, error = %e, "postgres key scan failed"),
            }
        }

        merged.into_iter().collect()
    }

    /// Enumerate, fetch, sort and paginate.
    pub async fn query(&self, options: &QueryOptions) -> QueryResult {
        let pattern = options.pattern.as_deref();
        let keys = self.keys(pattern).await;

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(value) = self.get(&key, &GetOptions::default()).await else {
                continue;
            };
            let created_at = if options.sort_by == SortField::CreatedAt {
                match &self.postgres {
                    Some(postgres) => postgres
                        .get_entry(&key)
                        .await
                        .ok()
                        .flatten()
                        .map(|entry| entry.created_at),
                    None => None,
                }
            } else {
                None
            };
            items.push(QueryItem {
                key,
                value,
                created_at,
            });
        }

        match options.sort_by {
            SortField::Key => items.sort_by(|a, b| a.key.cmp(&b.key)),
            // Unknown creation times sort last in ascending order.
            SortField::CreatedAt => items.sort_by(|a, b| match (a.created_at, b.created_at) {
                (Some(a_at), Some(b_at)) => a_at.cmp(&b_at).then_with(|| a.key.cmp(&b.key)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.key.cmp(&b.key),
            }),
        }
        if options.order == SortOrder::Descending {
            items.reverse();
        }

        let total = items.len();
        let page: Vec<QueryItem> = items
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();
        let has_more = match options.limit {
            Some(limit) => options.offset + limit < total,
            None => false,
        };

        QueryResult {
            items: page,
            has_more,
            total,
        }
    }

    /// Remove everything (no pattern) or every key matching a glob. Returns
    /// the number of keys removed from the most authoritative layer.
    pub async fn clear(&self, pattern: Option<&str>) -> u64 {
        if !self.is_connected() {
            return 0;
        }

        match pattern {
            None => {
                let memory_cleared = self.memory.clear().await.unwrap_or(0);
                let redis_cleared = match self.redis_layer() {
                    Some(redis) => match redis.clear().await {
                        Ok(count) => count,
                        Err(e) => {
                            tracing::warn!(error = %e, "redis clear failed");
                            0
                        }
                    },
                    None => 0,
                };
                match &self.postgres {
                    Some(postgres) => match postgres.clear().await {
                        Ok(count) => count,
                        Err(e) => {
                            tracing::warn!(error = %e, "postgres clear failed");
                            0
                        }
                    },
                    None => memory_cleared.max(redis_cleared),
                }
            }
            Some(pattern) => {
                let keys = self.keys(Some(pattern)).await;
                let mut removed = 0;
                for key in &keys {
                    if self.delete(key, None).await {
                        removed += 1;
                    }
                }
                removed
            }
        }
    }

    // ========================================================================
    // PROMOTE / DEMOTE / PLACEMENT
    // ========================================================================

    /// Copy a key's current value (via the cascade) into the target layer.
    pub async fn promote(&self, key: &str, target: LayerTag) -> bool {
        let Some(value) = self.get(key, &GetOptions::default()).await else {
            return false;
        };
        let options = SetOptions {
            ttl: self.warm_ttl(target),
            layer: Some(target),
        };
        self.set(key, &value, &options).await
    }

    /// Drop a key from every layer faster than the target.
    pub async fn demote(&self, key: &str, target: LayerTag) -> bool {
        if !self.is_connected() {
            return false;
        }
        for tag in target.faster_layers() {
            if let Some(layer) = self.layer(*tag) {
                if let Err(e) = layer.delete(key).await {
                    tracing::warn!(key, layer = %tag, error = %e, "demote delete failed");
                }
            }
        }
        true
    }

    /// Which layers currently hold the key.
    pub async fn layer_info(&self, key: &str) -> KeyPlacement {
        let mut placement = KeyPlacement::default();
        if !self.is_connected() {
            return placement;
        }

        placement.memory = self.memory.exists(key).await.unwrap_or(false);
        if let Some(redis) = self.redis_layer() {
            placement.redis = redis.exists(key).await.unwrap_or(false);
        }
        if let Some(postgres) = &self.postgres {
            if let Ok(Some(entry)) = postgres.get_entry(key).await {
                placement.postgres = true;
                placement.ttl_remaining = entry.ttl_remaining();
            }
        }
        placement
    }

    // ========================================================================
    // HEALTH / METRICS / MAINTENANCE
    // ========================================================================

    /// Ping the selected layers in parallel. Unconfigured layers report
    /// false. The result contains exactly the selected layers.
    pub async fn health_check(&self, selector: &LayerSelector) -> BTreeMap<LayerTag, bool> {
        let tags = selector.resolve();
        let probes = tags.iter().map(|tag| async move {
            let alive = match self.layer(*tag) {
                Some(layer) => layer.ping().await,
                None => false,
            };
            (*tag, alive)
        });
        futures::future::join_all(probes).await.into_iter().collect()
    }

    /// Metrics view for the selected layers.
    pub fn metrics(&self, selector: &LayerSelector) -> MetricsReport {
        self.metrics
            .report(selector, self.memory.len(), self.memory.max_size())
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// On-demand sweep: expired entries out of L1 and expired rows out of
    /// L3.
    pub async fn cleanup(&self) -> CleanupReport {
        let memory_purged = self.memory.cleanup();
        let postgres_purged = match &self.postgres {
            Some(postgres) => match postgres.cleanup_expired().await {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(error = %e, "postgres cleanup failed");
                    0
                }
            },
            None => 0,
        };
        CleanupReport {
            memory_purged,
            postgres_purged,
        }
    }

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    /// Merge a partial configuration update. Connections are unaffected.
    pub fn configure(&self, patch: ConfigPatch) {
        self.config.write().apply(patch);
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> NuvexConfig {
        self.config.read().clone()
    }

    /// The memory layer, for diagnostics.
    pub fn memory_layer(&self) -> &MemoryLayer {
        &self.memory
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        // The sweep task holds only a clone of the memory layer; aborting it
        // here covers engines dropped without a disconnect.
        if let Some(handle) = self.cleanup_handle.lock().take() {
            handle.abort();
        }
    }
}
