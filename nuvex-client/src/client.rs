//! The Nuvex client.
//!
//! Wraps the storage engine with namespace helpers and the high-level
//! surface. All storage behavior (cascade, write protocol, metrics) lives in
//! the engine; the client only composes keys and options.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nuvex_core::{
    BatchEntry, BatchSetItem, ConfigPatch, GetOptions, HealthReport, KeyPlacement, LayerSelector,
    LayerTag, NuvexConfig, NuvexResult, QueryOptions, QueryResult, SetOptions, Value,
};
use nuvex_storage::{CleanupReport, EngineState, MetricsReport, StorageEngine};
use parking_lot::Mutex;

/// Keys starting with this prefix are engine-internal and excluded from
/// backups and enumeration-driven features.
pub(crate) const INTERNAL_KEY_PREFIX: &str = "__nuvex";

/// Result of `compact`: a cleanup pass plus the post-cleanup metrics.
#[derive(Debug, Clone)]
pub struct CompactReport {
    pub cleanup: CleanupReport,
    pub metrics: MetricsReport,
}

/// High-level handle over a storage engine.
///
/// Cheap to clone; clones share the engine.
#[derive(Clone)]
pub struct Nuvex {
    engine: Arc<StorageEngine>,
    pub(crate) last_backup: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Nuvex {
    /// Build an unconnected client. Call [`connect`](Self::connect) before
    /// use.
    pub fn new(config: NuvexConfig) -> NuvexResult<Self> {
        Ok(Self {
            engine: Arc::new(StorageEngine::new(config)?),
            last_backup: Arc::new(Mutex::new(None)),
        })
    }

    /// Build a client around an existing engine.
    pub fn from_engine(engine: Arc<StorageEngine>) -> Self {
        Self {
            engine,
            last_backup: Arc::new(Mutex::new(None)),
        }
    }

    /// The underlying engine, for callers that need the full surface.
    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    pub async fn connect(&self) -> NuvexResult<()> {
        self.engine.connect().await
    }

    pub async fn disconnect(&self) {
        self.engine.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    // ========================================================================
    // CRUD PASS-THROUGH
    // ========================================================================

    pub async fn get(&self, key: &str, options: &GetOptions) -> Option<Value> {
        self.engine.get(key, options).await
    }

    pub async fn set(&self, key: &str, value: &Value, options: &SetOptions) -> bool {
        self.engine.set(key, value, options).await
    }

    pub async fn delete(&self, key: &str, layer: Option<LayerTag>) -> bool {
        self.engine.delete(key, layer).await
    }

    pub async fn exists(&self, key: &str, layer: Option<LayerTag>) -> bool {
        self.engine.exists(key, layer).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        self.engine.expire(key, ttl).await
    }

    pub async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> NuvexResult<i64> {
        self.engine.increment(key, delta, ttl).await
    }

    pub async fn decrement(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> NuvexResult<i64> {
        self.engine.decrement(key, delta, ttl).await
    }

    /// Write only when the key is absent. Check-then-set: not atomic across
    /// concurrent callers racing on the same key.
    pub async fn set_if_not_exists(
        &self,
        key: &str,
        value: &Value,
        options: &SetOptions,
    ) -> bool {
        if self.engine.exists(key, options.layer).await {
            return false;
        }
        self.engine.set(key, value, options).await
    }

    // ========================================================================
    // BATCH / QUERY
    // ========================================================================

    pub async fn set_batch(&self, items: &[BatchSetItem]) -> Vec<BatchEntry> {
        self.engine.set_batch(items).await
    }

    pub async fn get_batch(&self, keys: &[String]) -> Vec<BatchEntry> {
        self.engine.get_batch(keys).await
    }

    pub async fn delete_batch(&self, keys: &[String]) -> Vec<BatchEntry> {
        self.engine.delete_batch(keys).await
    }

    pub async fn query(&self, options: &QueryOptions) -> QueryResult {
        self.engine.query(options).await
    }

    pub async fn keys(&self, pattern: Option<&str>) -> Vec<String> {
        self.engine.keys(pattern).await
    }

    pub async fn clear(&self, pattern: Option<&str>) -> u64 {
        self.engine.clear(pattern).await
    }

    /// Every key under a prefix, with its value.
    pub async fn get_by_prefix(&self, prefix: &str) -> Vec<(String, Value)> {
        let pattern = format!("{prefix}*");
        let keys = self.engine.keys(Some(&pattern)).await;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.engine.get(&key, &GetOptions::default()).await {
                entries.push((key, value));
            }
        }
        entries
    }

    // ========================================================================
    // NAMESPACES
    // ========================================================================

    /// Compose a namespaced key: `<ns>:<key>`.
    pub fn namespaced(namespace: &str, key: &str) -> String {
        format!("{namespace}:{key}")
    }

    pub async fn get_ns(&self, namespace: &str, key: &str, options: &GetOptions) -> Option<Value> {
        self.engine
            .get(&Self::namespaced(namespace, key), options)
            .await
    }

    pub async fn set_ns(
        &self,
        namespace: &str,
        key: &str,
        value: &Value,
        options: &SetOptions,
    ) -> bool {
        self.engine
            .set(&Self::namespaced(namespace, key), value, options)
            .await
    }

    pub async fn delete_ns(&self, namespace: &str, key: &str) -> bool {
        self.engine
            .delete(&Self::namespaced(namespace, key), None)
            .await
    }

    /// All keys under a namespace.
    pub async fn namespace_keys(&self, namespace: &str) -> Vec<String> {
        let pattern = format!("{namespace}:*");
        self.engine.keys(Some(&pattern)).await
    }

    /// Remove every key under a namespace. Returns how many were removed.
    pub async fn clear_namespace(&self, namespace: &str) -> u64 {
        let pattern = format!("{namespace}:*");
        self.engine.clear(Some(&pattern)).await
    }

    // ========================================================================
    // PLACEMENT / HEALTH / METRICS
    // ========================================================================

    pub async fn promote(&self, key: &str, target: LayerTag) -> bool {
        self.engine.promote(key, target).await
    }

    pub async fn demote(&self, key: &str, target: LayerTag) -> bool {
        self.engine.demote(key, target).await
    }

    pub async fn layer_info(&self, key: &str) -> KeyPlacement {
        self.engine.layer_info(key).await
    }

    pub async fn health_check(&self, selector: &LayerSelector) -> BTreeMap<LayerTag, bool> {
        self.engine.health_check(selector).await
    }

    /// Health check summarized into a single status.
    pub async fn health_report(&self, selector: &LayerSelector) -> HealthReport {
        HealthReport::from_layers(self.engine.health_check(selector).await)
    }

    pub fn get_metrics(&self, selector: &LayerSelector) -> MetricsReport {
        self.engine.metrics(selector)
    }

    pub fn reset_metrics(&self) {
        self.engine.reset_metrics();
    }

    // ========================================================================
    // MAINTENANCE / CONFIGURATION
    // ========================================================================

    pub async fn cleanup(&self) -> CleanupReport {
        self.engine.cleanup().await
    }

    /// Cleanup plus a metrics snapshot; the maintenance entry point.
    pub async fn compact(&self) -> CompactReport {
        let cleanup = self.engine.cleanup().await;
        CompactReport {
            cleanup,
            metrics: self.engine.metrics(&LayerSelector::All),
        }
    }

    /// Merge a partial configuration update. Does not reconnect.
    pub fn configure(&self, patch: ConfigPatch) {
        if let Some(logging) = patch.logging.as_ref() {
            tracing::info!(
                enabled = logging.enabled,
                level = %logging.level,
                "log routing reconfigured"
            );
        }
        self.engine.configure(patch);
    }

    pub fn get_config(&self) -> NuvexConfig {
        self.engine.config()
    }

    /// When the last backup was taken by this client, if any.
    pub fn last_backup_time(&self) -> Option<DateTime<Utc>> {
        *self.last_backup.lock()
    }
}
