//! NUVEX-CORE - Shared Types for the Nuvex Tiered Storage Engine
//!
//! This crate holds everything the storage and client crates agree on:
//! - The error taxonomy (`NuvexError` and the per-domain enums)
//! - The configuration surface (`NuvexConfig` and its sub-configs)
//! - Layer addressing (`LayerTag`) and the operation option structs
//! - Health reporting types shared by the engine and the client

pub mod config;
pub mod error;
pub mod health;
pub mod types;

pub use config::{
    ConfigPatch, LoggingConfig, MemoryConfig, NuvexConfig, PostgresConfig, RedisConfig,
    SchemaConfig, SslMode,
};
pub use error::{
    BackupError, CacheError, EngineError, NuvexError, NuvexResult, SchemaError, StoreError,
};
pub use health::{HealthReport, HealthStatus};
pub use types::{
    BatchEntry, BatchSetItem, GetOptions, KeyPlacement, LayerSelector, LayerTag, QueryItem,
    QueryOptions, QueryResult, SetOptions, SortField, SortOrder, Value,
};
