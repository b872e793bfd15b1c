//! Durable store layer (L3) backed by PostgreSQL.
//!
//! One table per engine, configured by (table, key column, value column);
//! all three identifiers are validated before any SQL is built, so every
//! statement here interpolates pre-validated identifiers only and binds data
//! through parameters.
//!
//! Writes and increments are single-statement upserts so that concurrent
//! callers compose under the database's row-level locking. Reads carry the
//! non-expired predicate; expired rows are invisible long before the sweep
//! removes them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use nuvex_core::{
    LayerTag, NuvexResult, PostgresConfig, SchemaConfig, SslMode, StoreError, Value,
};
use tokio_postgres::NoTls;

use crate::layer::StorageLayer;
use crate::pattern::{glob_match, like_prefix};
use crate::schema::SchemaManager;

/// A full row from the store, used by `layer_info` and query sorting.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoreEntry {
    /// Remaining TTL, when the row carries an expiry in the future.
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at
            .and_then(|at| (at - Utc::now()).to_std().ok())
    }
}

/// Pre-rendered SQL for one (table, key, value) identifier triple.
struct Statements {
    get: String,
    get_entry: String,
    set: String,
    delete: String,
    exists: String,
    clear: String,
    increment: String,
    cleanup: String,
    keys_all: String,
    keys_prefix: String,
}

impl Statements {
    fn render(schema: &SchemaConfig) -> Self {
        let t = &schema.table_name;
        let k = &schema.key_column;
        let v = &schema.value_column;
        let live = "(expires_at IS NULL OR expires_at > now())";
        Self {
            get: format!("SELECT {v} FROM {t} WHERE {k} = $1 AND {live}"),
            get_entry: format!(
                "SELECT {v}, created_at, updated_at, expires_at FROM {t} \
                 WHERE {k} = $1 AND {live}"
            ),
            set: format!(
                "INSERT INTO {t} ({k}, {v}, expires_at) VALUES ($1, $2, $3) \
                 ON CONFLICT ({k}) DO UPDATE SET \
                 {v} = EXCLUDED.{v}, expires_at = EXCLUDED.expires_at"
            ),
            delete: format!("DELETE FROM {t} WHERE {k} = $1"),
            exists: format!("SELECT EXISTS(SELECT 1 FROM {t} WHERE {k} = $1 AND {live})"),
            clear: format!("DELETE FROM {t}"),
            // The CASE folds an expired row back to the bare delta; row-level
            // locking on the conflict target makes concurrent increments
            // compose (no lost updates).
            increment: format!(
                "INSERT INTO {t} ({k}, {v}, expires_at) \
                 VALUES ($1, to_jsonb($2::bigint), $3) \
                 ON CONFLICT ({k}) DO UPDATE SET \
                 {v} = to_jsonb(CASE WHEN {t}.expires_at IS NULL OR {t}.expires_at > now() \
                                     THEN ({t}.{v} #>> '{{}}')::numeric + $2 \
                                     ELSE $2::numeric END), \
                 expires_at = $3 \
                 RETURNING ({v} #>> '{{}}')"
            ),
            cleanup: format!(
                "DELETE FROM {t} WHERE expires_at IS NOT NULL AND expires_at <= now()"
            ),
            keys_all: format!("SELECT {k} FROM {t} WHERE {live}"),
            keys_prefix: format!("SELECT {k} FROM {t} WHERE {k} LIKE $1 AND {live}"),
        }
    }
}

/// Durable source of truth over a deadpool-managed connection pool.
pub struct PostgresLayer {
    pool: Pool,
    /// Whether the engine created (and therefore closes) the pool.
    owned: bool,
    sql: Statements,
    schema: SchemaConfig,
}

impl PostgresLayer {
    /// Build the layer and its pool from configuration. The pool is
    /// engine-owned and closed on disconnect. Identifiers are validated
    /// before any SQL is rendered.
    pub fn new(config: &PostgresConfig) -> NuvexResult<Self> {
        SchemaManager::validate(&config.schema)?;
        let pool = create_pool(config)?;
        Ok(Self {
            pool,
            owned: true,
            sql: Statements::render(&config.schema),
            schema: config.schema.clone(),
        })
    }

    /// Wrap an already-constructed pool. The pool stays caller-owned: the
    /// engine never closes it.
    pub fn from_pool(pool: Pool, schema: SchemaConfig) -> NuvexResult<Self> {
        SchemaManager::validate(&schema)?;
        Ok(Self {
            pool,
            owned: false,
            sql: Statements::render(&schema),
            schema,
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn schema(&self) -> &SchemaConfig {
        &self.schema
    }

    /// Apply the schema DDL (table, indexes, trigger, cleanup function, and
    /// the optional scheduled sweep).
    pub async fn setup_schema(&self) -> NuvexResult<()> {
        SchemaManager::new(self.pool.clone(), self.schema.clone())
            .ensure()
            .await
    }

    /// Close the pool, only when the engine owns it.
    pub fn close(&self) {
        if self.owned {
            self.pool.close();
        }
    }

    async fn client(&self) -> NuvexResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            StoreError::Pool {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Fetch the full row for a key, ignoring expired rows.
    pub async fn get_entry(&self, key: &str) -> NuvexResult<Option<StoreEntry>> {
        let client = self.client().await?;
        let row = client
            .query_opt(self.sql.get_entry.as_str(), &[&key])
            .await
            .map_err(|e| StoreError::Read {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(row.map(|row| StoreEntry {
            value: row.get(0),
            created_at: row.get(1),
            updated_at: row.get(2),
            expires_at: row.get(3),
        }))
    }

    /// Purge expired rows, returning how many were removed.
    pub async fn cleanup_expired(&self) -> NuvexResult<u64> {
        let client = self.client().await?;
        let purged = client
            .execute(self.sql.cleanup.as_str(), &[])
            .await
            .map_err(|e| StoreError::Write {
                key: String::new(),
                reason: e.to_string(),
            })?;
        if purged > 0 {
            tracing::debug!(purged, "purged expired rows");
        }
        Ok(purged)
    }

    fn expiry_from(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl)
    }
}

#[async_trait]
impl StorageLayer for PostgresLayer {
    fn tag(&self) -> LayerTag {
        LayerTag::Postgres
    }

    async fn get(&self, key: &str) -> NuvexResult<Option<Value>> {
        let client = self.client().await?;
        let row = client
            .query_opt(self.sql.get.as_str(), &[&key])
            .await
            .map_err(|e| StoreError::Read {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(row.map(|row| row.get(0)))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> NuvexResult<()> {
        let client = self.client().await?;
        let expires_at = Self::expiry_from(ttl);
        client
            .execute(self.sql.set.as_str(), &[&key, value, &expires_at])
            .await
            .map_err(|e| StoreError::Write {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> NuvexResult<bool> {
        let client = self.client().await?;
        let removed = client
            .execute(self.sql.delete.as_str(), &[&key])
            .await
            .map_err(|e| StoreError::Write {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> NuvexResult<bool> {
        let client = self.client().await?;
        let row = client
            .query_one(self.sql.exists.as_str(), &[&key])
            .await
            .map_err(|e| StoreError::Read {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(row.get(0))
    }

    async fn clear(&self) -> NuvexResult<u64> {
        let client = self.client().await?;
        let removed = client
            .execute(self.sql.clear.as_str(), &[])
            .await
            .map_err(|e| StoreError::Write {
                key: String::new(),
                reason: e.to_string(),
            })?;
        Ok(removed)
    }

    async fn ping(&self) -> bool {
        match self.client().await {
            Ok(client) => match client.query_one("SELECT 1", &[]).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "postgres ping failed");
                    false
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "postgres ping failed to acquire a client");
                false
            }
        }
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> NuvexResult<i64> {
        let client = self.client().await?;
        let expires_at = Self::expiry_from(ttl);
        let row = client
            .query_one(self.sql.increment.as_str(), &[&key, &delta, &expires_at])
            .await
            .map_err(|e| StoreError::Increment {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        let raw: String = row.get(0);
        // `#>> '{}'` renders the JSONB scalar as text; integral values may
        // still carry a fractional part after numeric arithmetic.
        raw.parse::<i64>()
            .or_else(|_| raw.parse::<f64>().map(|f| f as i64))
            .map_err(|_| {
                StoreError::NotNumeric {
                    key: key.to_string(),
                }
                .into()
            })
    }

    async fn keys(&self, pattern: &str) -> NuvexResult<Vec<String>> {
        let client = self.client().await?;
        let rows = match like_prefix(pattern) {
            Some(prefix) => client
                .query(self.sql.keys_prefix.as_str(), &[&prefix])
                .await
                .map_err(|e| StoreError::Read {
                    key: pattern.to_string(),
                    reason: e.to_string(),
                })?,
            None => client
                .query(self.sql.keys_all.as_str(), &[])
                .await
                .map_err(|e| StoreError::Read {
                    key: pattern.to_string(),
                    reason: e.to_string(),
                })?,
        };
        Ok(rows
            .iter()
            .map(|row| row.get::<_, String>(0))
            .filter(|key| glob_match(pattern, key))
            .collect())
    }
}

fn create_pool(config: &PostgresConfig) -> NuvexResult<Pool> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.database.clone());
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.ssl_mode = Some(match config.ssl {
        SslMode::Disable => deadpool_postgres::SslMode::Disable,
        SslMode::Prefer => deadpool_postgres::SslMode::Prefer,
        SslMode::Require => deadpool_postgres::SslMode::Require,
    });

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let mut pool_config = PoolConfig::new(config.max_size);
    pool_config.timeouts.wait = Some(config.connection_timeout);
    pool_config.timeouts.create = Some(config.connection_timeout);
    pool_config.timeouts.recycle = Some(config.idle_timeout);
    cfg.pool = Some(pool_config);

    cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
        StoreError::Pool {
            reason: format!("failed to create pool: {e}"),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> SchemaConfig {
        SchemaConfig::default()
    }

    #[test]
    fn test_statements_use_configured_identifiers() {
        let sql = Statements::render(&SchemaConfig {
            table_name: "kv_cache".to_string(),
            key_column: "cache_key".to_string(),
            value_column: "payload".to_string(),
            ..schema()
        });
        assert!(sql.get.contains("FROM kv_cache"));
        assert!(sql.get.contains("cache_key = $1"));
        assert!(sql.set.contains("ON CONFLICT (cache_key)"));
        assert!(sql.increment.contains("to_jsonb($2::bigint)"));
        assert!(sql.increment.contains("RETURNING (payload #>> '{}')"));
    }

    #[test]
    fn test_reads_filter_expired_rows() {
        let sql = Statements::render(&schema());
        for stmt in [&sql.get, &sql.exists, &sql.keys_all, &sql.keys_prefix] {
            assert!(
                stmt.contains("expires_at IS NULL OR expires_at > now()"),
                "statement missing liveness predicate: {stmt}"
            );
        }
    }

    #[test]
    fn test_increment_folds_expired_rows_to_delta() {
        let sql = Statements::render(&schema());
        assert!(sql.increment.contains("ELSE $2::numeric END"));
        assert!(sql
            .increment
            .contains("THEN (nuvex_store.value #>> '{}')::numeric + $2"));
    }

    #[test]
    fn test_new_rejects_invalid_identifiers() {
        let config = PostgresConfig {
            schema: SchemaConfig {
                table_name: "kv; DROP TABLE users".to_string(),
                ..schema()
            },
            ..PostgresConfig::default()
        };
        assert!(PostgresLayer::new(&config).is_err());
    }

    #[test]
    fn test_expiry_from_ttl() {
        let expiry = PostgresLayer::expiry_from(Some(Duration::from_secs(60))).unwrap();
        let delta = expiry - Utc::now();
        assert!(delta.num_seconds() >= 59 && delta.num_seconds() <= 60);
        assert!(PostgresLayer::expiry_from(None).is_none());
    }

    // Live-database tests are in tests/postgres_layer_tests.rs behind the
    // `db-tests` feature.
}
