//! Distributed cache layer (L2) backed by Redis.
//!
//! Values are stored as serialized JSON text; TTLs use Redis-native expiry
//! (`SET ... EX`, `EXPIRE`), and `increment` maps to the server-side atomic
//! `INCRBY`. Connections go through a shared [`ConnectionManager`], which
//! multiplexes and reconnects on its own.
//!
//! Error policy: reads and existence checks degrade to absent/false on
//! transport errors (logged); writes and increments surface their errors so
//! the engine can apply its own fan-out policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nuvex_core::{CacheError, LayerTag, NuvexResult, Value};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::layer::StorageLayer;

/// How many keys each SCAN page requests.
const SCAN_PAGE_SIZE: usize = 100;

/// Remote cache with network round-trip latency and native TTL support.
#[derive(Clone)]
pub struct RedisLayer {
    client: redis::Client,
    conn: Arc<RwLock<Option<ConnectionManager>>>,
    default_ttl: Duration,
}

impl RedisLayer {
    /// Create an unconnected layer for the given URL. `connect` must be
    /// called before use.
    pub fn new(url: &str, default_ttl: Duration) -> NuvexResult<Self> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Unavailable {
            reason: format!("invalid redis url: {e}"),
        })?;
        Ok(Self {
            client,
            conn: Arc::new(RwLock::new(None)),
            default_ttl,
        })
    }

    /// The default TTL applied when warming this layer.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Establish the managed connection. Fails when the server is
    /// unreachable; the engine drops the layer in that case.
    pub async fn connect(&self) -> NuvexResult<()> {
        let manager = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| CacheError::Unavailable {
                reason: e.to_string(),
            })?;
        *self.conn.write().await = Some(manager);
        tracing::debug!("redis layer connected");
        Ok(())
    }

    /// Drop the managed connection. Idempotent.
    pub async fn disconnect(&self) {
        if self.conn.write().await.take().is_some() {
            tracing::debug!("redis layer disconnected");
        }
    }

    async fn manager(&self) -> NuvexResult<ConnectionManager> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| {
                CacheError::Unavailable {
                    reason: "not connected".to_string(),
                }
                .into()
            })
    }

    fn transient(e: redis::RedisError) -> CacheError {
        CacheError::Transient {
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl StorageLayer for RedisLayer {
    fn tag(&self) -> LayerTag {
        LayerTag::Redis
    }

    async fn get(&self, key: &str) -> NuvexResult<Option<Value>> {
        let mut conn = match self.manager().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(key, error = %e, "redis get skipped, not connected");
                return Ok(None);
            }
        };
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    tracing::warn!(key, error = %e, "redis entry is not valid JSON, treating as miss");
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(key, error = %e, "redis get failed, treating as miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> NuvexResult<()> {
        let mut conn = self.manager().await?;
        let raw = serde_json::to_string(value)?;
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                conn.set_ex::<_, _, ()>(key, raw, secs)
                    .await
                    .map_err(Self::transient)?;
            }
            None => {
                conn.set::<_, _, ()>(key, raw)
                    .await
                    .map_err(Self::transient)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> NuvexResult<bool> {
        let mut conn = self.manager().await?;
        let removed: i64 = conn.del(key).await.map_err(Self::transient)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> NuvexResult<bool> {
        let mut conn = match self.manager().await {
            Ok(conn) => conn,
            Err(_) => return Ok(false),
        };
        match conn.exists::<_, bool>(key).await {
            Ok(found) => Ok(found),
            Err(e) => {
                tracing::warn!(key, error = %e, "redis exists failed, treating as absent");
                Ok(false)
            }
        }
    }

    async fn clear(&self) -> NuvexResult<u64> {
        let mut conn = self.manager().await?;
        let count: i64 = redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .map_err(Self::transient)?;
        redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(Self::transient)?;
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> bool {
        let mut conn = match self.manager().await {
            Ok(conn) => conn,
            Err(_) => return false,
        };
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(reply) => reply.eq_ignore_ascii_case("pong"),
            Err(e) => {
                tracing::warn!(error = %e, "redis ping failed");
                false
            }
        }
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> NuvexResult<i64> {
        let mut conn = self.manager().await?;
        let next: i64 = conn.incr(key, delta).await.map_err(Self::transient)?;
        if let Some(ttl) = ttl {
            let secs = ttl.as_secs().max(1) as i64;
            conn.expire::<_, ()>(key, secs)
                .await
                .map_err(Self::transient)?;
        }
        Ok(next)
    }

    async fn keys(&self, pattern: &str) -> NuvexResult<Vec<String>> {
        let mut conn = match self.manager().await {
            Ok(conn) => conn,
            Err(_) => return Ok(Vec::new()),
        };
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, page): (u64, Vec<String>) = match redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_PAGE_SIZE)
                .query_async(&mut conn)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "redis scan failed, returning partial keys");
                    break;
                }
            };
            keys.extend(page);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}
