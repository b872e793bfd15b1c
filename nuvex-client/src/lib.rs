//! NUVEX-CLIENT - High-Level Facade
//!
//! Thin client over [`nuvex_storage::StorageEngine`] adding the conveniences
//! applications actually call:
//! - namespace helpers over the `<ns>:<key>` convention
//! - `set_if_not_exists`, prefix reads and batch pass-throughs
//! - backup/restore with an on-disk JSON envelope (optionally gzipped)
//! - a process-singleton lifecycle for hosts that want one shared client

pub mod backup;
pub mod client;
pub mod singleton;

pub use backup::{
    BackupEnvelope, BackupMetadata, BackupOptions, BackupRecord, BackupSummary, BackupType,
    LayerInfoRecord, RestoreOptions, RestoreSummary, BACKUP_VERSION,
};
pub use client::{CompactReport, Nuvex};
pub use singleton::{initialize, instance, is_initialized, shutdown};
