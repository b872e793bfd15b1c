//! Configuration types
//!
//! Every sub-config carries a `Default` impl and a `from_env` constructor
//! reading `NUVEX_*` variables, plus `development()` and `production()`
//! presets for the tunables that differ between the two.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum entries held by the memory layer.
pub const DEFAULT_MEMORY_MAX_SIZE: usize = 10_000;
/// Default memory-layer TTL in milliseconds.
pub const DEFAULT_MEMORY_TTL_MS: u64 = 300_000;
/// Default Redis cache TTL in seconds, used when warming and when an
/// operation supplies no TTL of its own.
pub const DEFAULT_REDIS_TTL_SECS: u64 = 3_600;
/// Default Postgres pool size.
pub const DEFAULT_PG_POOL_SIZE: usize = 10;
/// The memory cleanup cadence is derived from the memory TTL by this divisor
/// unless `cleanup_interval` overrides it.
pub const CLEANUP_CADENCE_DIVISOR: u32 = 24;

/// TLS mode for the Postgres connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// No TLS.
    #[default]
    Disable,
    /// TLS when the server supports it.
    Prefer,
    /// TLS required.
    Require,
}

/// Durable store (L3) connection and schema configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl: SslMode,
    /// Maximum pool size.
    pub max_size: usize,
    /// How long an idle pooled connection is kept.
    pub idle_timeout: Duration,
    /// How long to wait for a connection from the pool.
    pub connection_timeout: Duration,
    pub schema: SchemaConfig,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "nuvex".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            ssl: SslMode::Disable,
            max_size: DEFAULT_PG_POOL_SIZE,
            idle_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            schema: SchemaConfig::default(),
        }
    }
}

impl PostgresConfig {
    /// Read the Postgres configuration from `NUVEX_PG_*` variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_string("NUVEX_PG_HOST", defaults.host),
            port: env_parse("NUVEX_PG_PORT", defaults.port),
            database: env_string("NUVEX_PG_DATABASE", defaults.database),
            user: env_string("NUVEX_PG_USER", defaults.user),
            password: env_string("NUVEX_PG_PASSWORD", defaults.password),
            ssl: match std::env::var("NUVEX_PG_SSL").ok().as_deref() {
                Some("prefer") => SslMode::Prefer,
                Some("require") => SslMode::Require,
                _ => SslMode::Disable,
            },
            max_size: env_parse("NUVEX_PG_POOL_SIZE", defaults.max_size),
            idle_timeout: Duration::from_secs(env_parse("NUVEX_PG_IDLE_TIMEOUT_SECS", 30u64)),
            connection_timeout: Duration::from_secs(env_parse("NUVEX_PG_CONNECT_TIMEOUT_SECS", 10u64)),
            schema: SchemaConfig::from_env(),
        }
    }
}

/// Identifiers and options for the L3 table.
///
/// `table_name`, `key_column` and `value_column` are interpolated into DDL
/// and DML after validation against `^[A-Za-z_][A-Za-z0-9_]*$`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub table_name: String,
    pub key_column: String,
    pub value_column: String,
    /// Install a trigram index on the key column for fuzzy key lookup.
    pub trigram_index: bool,
    /// Cron expression for the database-side expired-row sweep. Absent means
    /// no scheduled job; scheduling requires the pg_cron extension.
    pub cleanup_schedule: Option<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            table_name: "nuvex_store".to_string(),
            key_column: "key".to_string(),
            value_column: "value".to_string(),
            trigram_index: false,
            cleanup_schedule: None,
        }
    }
}

impl SchemaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            table_name: env_string("NUVEX_PG_TABLE", defaults.table_name),
            key_column: env_string("NUVEX_PG_KEY_COLUMN", defaults.key_column),
            value_column: env_string("NUVEX_PG_VALUE_COLUMN", defaults.value_column),
            trigram_index: env_bool("NUVEX_PG_TRIGRAM_INDEX", false),
            cleanup_schedule: std::env::var("NUVEX_PG_CLEANUP_SCHEDULE").ok(),
        }
    }
}

/// Distributed cache (L2) configuration. Absent from `NuvexConfig` means
/// two-layer mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Default cache TTL applied when warming and when an operation supplies
    /// no TTL.
    pub ttl: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            ttl: Duration::from_secs(DEFAULT_REDIS_TTL_SECS),
        }
    }
}

impl RedisConfig {
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("NUVEX_REDIS_URL").ok()?;
        Some(Self {
            url,
            ttl: Duration::from_secs(env_parse("NUVEX_REDIS_TTL_SECS", DEFAULT_REDIS_TTL_SECS)),
        })
    }
}

/// Memory layer (L1) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Default L1 TTL. Also drives the cleanup cadence (`ttl / 24`).
    pub ttl: Duration,
    /// Maximum number of entries before LRU eviction.
    pub max_size: usize,
    /// Override for the cleanup cadence.
    pub cleanup_interval: Option<Duration>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(DEFAULT_MEMORY_TTL_MS),
            max_size: DEFAULT_MEMORY_MAX_SIZE,
            cleanup_interval: None,
        }
    }
}

impl MemoryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl: Duration::from_millis(env_parse("NUVEX_MEMORY_TTL_MS", DEFAULT_MEMORY_TTL_MS)),
            max_size: env_parse("NUVEX_MEMORY_MAX_SIZE", defaults.max_size),
            cleanup_interval: std::env::var("NUVEX_MEMORY_CLEANUP_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis),
        }
    }

    /// The effective cleanup cadence: the override when present, otherwise
    /// `ttl / 24`, floored at one second.
    pub fn effective_cleanup_interval(&self) -> Duration {
        self.cleanup_interval
            .unwrap_or(self.ttl / CLEANUP_CADENCE_DIVISOR)
            .max(Duration::from_secs(1))
    }
}

/// Structured log routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// Level hint for the host's subscriber ("trace" through "error").
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("NUVEX_LOG_ENABLED", defaults.enabled),
            level: env_string("NUVEX_LOG_LEVEL", defaults.level),
        }
    }
}

/// Master configuration for the engine and client.
///
/// `postgres: None` disables the durable store (cache-only mode) and
/// `redis: None` disables the distributed cache (two-layer mode). The memory
/// layer is always present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NuvexConfig {
    pub postgres: Option<PostgresConfig>,
    pub redis: Option<RedisConfig>,
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

impl NuvexConfig {
    /// Read the full configuration from the environment. Postgres is enabled
    /// when `NUVEX_PG_HOST` is set; Redis when `NUVEX_REDIS_URL` is set.
    pub fn from_env() -> Self {
        Self {
            postgres: std::env::var("NUVEX_PG_HOST")
                .ok()
                .map(|_| PostgresConfig::from_env()),
            redis: RedisConfig::from_env(),
            memory: MemoryConfig::from_env(),
            logging: LoggingConfig::from_env(),
        }
    }

    /// Memory-only configuration with short TTLs, for tests and local runs.
    pub fn development() -> Self {
        Self {
            postgres: None,
            redis: None,
            memory: MemoryConfig {
                ttl: Duration::from_secs(60),
                max_size: 1_000,
                cleanup_interval: Some(Duration::from_secs(5)),
            },
            logging: LoggingConfig {
                enabled: true,
                level: "debug".to_string(),
            },
        }
    }

    /// Full three-tier configuration with the standard defaults.
    pub fn production() -> Self {
        Self {
            postgres: Some(PostgresConfig::default()),
            redis: Some(RedisConfig::default()),
            memory: MemoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Merge a partial update into this configuration. Only fields present in
    /// the patch change; connections are not affected.
    pub fn apply(&mut self, patch: ConfigPatch) {
        if let Some(memory_ttl) = patch.memory_ttl {
            self.memory.ttl = memory_ttl;
        }
        if let Some(redis_ttl) = patch.redis_ttl {
            if let Some(redis) = self.redis.as_mut() {
                redis.ttl = redis_ttl;
            }
        }
        if let Some(logging) = patch.logging {
            self.logging = logging;
        }
    }
}

/// Partial configuration accepted by `configure`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub memory_ttl: Option<Duration>,
    pub redis_ttl: Option<Duration>,
    pub logging: Option<LoggingConfig>,
}

fn env_string(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| s.to_lowercase() != "false" && s != "0")
        .unwrap_or(default)
}
