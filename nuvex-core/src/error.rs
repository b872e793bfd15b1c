//! Error types for Nuvex operations

use thiserror::Error;

use crate::types::LayerTag;

/// Convenient result alias used across all Nuvex crates.
pub type NuvexResult<T> = Result<T, NuvexError>;

/// Durable store (L3) errors.
///
/// Read failures are recoverable (the engine falls back to a cache miss);
/// write and increment failures are fatal to the enclosing operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("postgres pool unavailable: {reason}")]
    Pool { reason: String },

    #[error("postgres read failed for key {key:?}: {reason}")]
    Read { key: String, reason: String },

    #[error("postgres write failed for key {key:?}: {reason}")]
    Write { key: String, reason: String },

    #[error("postgres increment failed for key {key:?}: {reason}")]
    Increment { key: String, reason: String },

    #[error("stored value for key {key:?} is not numeric")]
    NotNumeric { key: String },
}

/// Cache layer (L1/L2) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("redis unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("redis command failed: {reason}")]
    Transient { reason: String },

    #[error("memory layer internal failure: {reason}")]
    MemoryInternal { reason: String },

    #[error("cached value for key {key:?} is not numeric")]
    NotNumeric { key: String },
}

/// Schema setup errors. Both kinds are fatal during setup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid SQL identifier {identifier:?}: must match ^[A-Za-z_][A-Za-z0-9_]*$")]
    InvalidIdentifier { identifier: String },

    #[error("schema setup failed at {step}: {reason}")]
    Setup { step: String, reason: String },

    #[error("scheduler extension pg_cron is not installed")]
    SchedulerMissing,
}

/// Engine orchestration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine is not connected (state: {state})")]
    NotConnected { state: String },

    #[error("no storage layer available for {operation}")]
    NoLayerAvailable { operation: String },

    #[error("layer {layer} is not configured")]
    LayerNotConfigured { layer: LayerTag },

    #[error("client singleton already initialized")]
    AlreadyInitialized,

    #[error("client singleton is not initialized")]
    NotInitialized,
}

/// Backup and restore errors. Fatal to that operation only.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid backup envelope: {reason}")]
    Format { reason: String },

    #[error("backup file not found: {path}")]
    NotFound { path: String },
}

/// Top-level error wrapper.
#[derive(Debug, Error)]
pub enum NuvexError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NuvexError {
    /// Whether this error may be treated as a cache miss on a read path.
    ///
    /// Read-path policy: layer read errors never surface to the caller, they
    /// degrade into a miss and the cascade continues to the next layer.
    pub fn is_recoverable_read(&self) -> bool {
        matches!(
            self,
            NuvexError::Store(StoreError::Read { .. } | StoreError::Pool { .. })
                | NuvexError::Cache(
                    CacheError::Transient { .. }
                        | CacheError::Unavailable { .. }
                        | CacheError::MemoryInternal { .. }
                )
                | NuvexError::Serialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Write {
            key: "user:1".to_string(),
            reason: "connection reset".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "postgres write failed for key \"user:1\": connection reset"
        );
    }

    #[test]
    fn test_schema_error_display_names_the_pattern() {
        let err = SchemaError::InvalidIdentifier {
            identifier: "kv; DROP TABLE".to_string(),
        };
        assert!(err.to_string().contains("^[A-Za-z_][A-Za-z0-9_]*$"));
    }

    #[test]
    fn test_read_errors_are_recoverable() {
        let read: NuvexError = StoreError::Read {
            key: "k".into(),
            reason: "timeout".into(),
        }
        .into();
        assert!(read.is_recoverable_read());

        let write: NuvexError = StoreError::Write {
            key: "k".into(),
            reason: "timeout".into(),
        }
        .into();
        assert!(!write.is_recoverable_read());

        let transient: NuvexError = CacheError::Transient {
            reason: "broken pipe".into(),
        }
        .into();
        assert!(transient.is_recoverable_read());
    }

    #[test]
    fn test_engine_error_carries_layer() {
        let err = EngineError::LayerNotConfigured {
            layer: LayerTag::Redis,
        };
        assert_eq!(err.to_string(), "layer redis is not configured");
    }
}
