//! Backup and restore.
//!
//! A backup snapshots every non-internal key into a JSON envelope
//! `{metadata, data}` and writes it under `nuvex-backups/` as
//! `<id>.json`, or `<id>.json.gz` when compression is on. Restore reads the
//! envelope back (gzip is auto-detected from the magic bytes) and re-writes
//! each entry, preserving the recorded layer targeting and TTL.
//!
//! Incremental mode records the marker and the last backup time in the
//! envelope but does not yet filter keys by modification time; doing that
//! needs per-row `updated_at` surfaced through the engine's enumeration.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use nuvex_core::{BackupError, GetOptions, LayerTag, NuvexResult, SetOptions, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::{Nuvex, INTERNAL_KEY_PREFIX};

/// Envelope format version.
pub const BACKUP_VERSION: &str = "1.0.0";

/// Directory (under the working directory) where backups land by default.
const BACKUP_DIR_NAME: &str = "nuvex-backups";

/// Gzip magic bytes, used to auto-detect compressed envelopes on restore.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Kind of backup recorded in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Incremental,
}

/// Where a key lived when it was backed up, and its remaining TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerInfoRecord {
    pub layer: LayerTag,
    /// Remaining TTL in seconds, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// One backed-up key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub value: Value,
    pub layer_info: Option<LayerInfoRecord>,
    pub created_at: DateTime<Utc>,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_type: Option<BackupType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup_time: Option<DateTime<Utc>>,
}

/// Envelope header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub key_count: usize,
    pub keys_skipped: usize,
    pub version: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub last_backup_time: Option<DateTime<Utc>>,
    pub compression: bool,
    pub total_keys: usize,
}

/// The on-disk backup format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEnvelope {
    pub metadata: BackupMetadata,
    pub data: BTreeMap<String, BackupRecord>,
}

/// Options for `backup`.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub compress: bool,
    pub backup_type: BackupType,
    /// Destination directory; defaults to `<cwd>/nuvex-backups`.
    pub dir: Option<PathBuf>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            compress: false,
            backup_type: BackupType::Full,
            dir: None,
        }
    }
}

/// Options for `restore`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Wipe every layer before restoring.
    pub clear_first: bool,
    /// Parse and count without writing anything.
    pub dry_run: bool,
}

/// Result of a backup run.
#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub id: String,
    pub path: PathBuf,
    pub key_count: usize,
    pub keys_skipped: usize,
    pub compressed: bool,
}

/// Result of a restore run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreSummary {
    pub restored: usize,
    pub failed: usize,
    pub dry_run: bool,
}

impl Nuvex {
    /// Snapshot every non-internal key to disk.
    pub async fn backup(&self, options: &BackupOptions) -> NuvexResult<BackupSummary> {
        let last_backup_time = self.last_backup_time();
        let keys: Vec<String> = self
            .keys(None)
            .await
            .into_iter()
            .filter(|key| !key.starts_with(INTERNAL_KEY_PREFIX))
            .collect();
        let total_keys = keys.len();

        let created_at = Utc::now();
        let incremental_marker = match options.backup_type {
            BackupType::Incremental => Some(BackupType::Incremental),
            BackupType::Full => None,
        };

        let mut data = BTreeMap::new();
        let mut keys_skipped = 0usize;
        for key in keys {
            let Some(value) = self.get(&key, &GetOptions::default()).await else {
                // Expired or deleted between enumeration and read.
                keys_skipped += 1;
                continue;
            };
            let placement = self.layer_info(&key).await;
            let layer_info = deepest_layer(&placement).map(|layer| LayerInfoRecord {
                layer,
                ttl: placement.ttl_remaining.map(|ttl| ttl.as_secs()),
            });
            data.insert(
                key,
                BackupRecord {
                    value,
                    layer_info,
                    created_at,
                    version: BACKUP_VERSION.to_string(),
                    backup_type: incremental_marker,
                    last_backup_time: incremental_marker.and(last_backup_time),
                },
            );
        }

        let id = format!("backup-{}", Uuid::new_v4());
        let envelope = BackupEnvelope {
            metadata: BackupMetadata {
                id: id.clone(),
                created_at,
                key_count: data.len(),
                keys_skipped,
                version: BACKUP_VERSION.to_string(),
                backup_type: options.backup_type,
                last_backup_time,
                compression: options.compress,
                total_keys,
            },
            data,
        };

        let dir = match options.dir.clone() {
            Some(dir) => dir,
            None => std::env::current_dir()
                .map_err(BackupError::Io)?
                .join(BACKUP_DIR_NAME),
        };
        std::fs::create_dir_all(&dir).map_err(BackupError::Io)?;

        let file_name = if options.compress {
            format!("{id}.json.gz")
        } else {
            format!("{id}.json")
        };
        let path = dir.join(file_name);
        let json = serde_json::to_vec_pretty(&envelope)?;
        if options.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&json).map_err(BackupError::Io)?;
            let compressed = encoder.finish().map_err(BackupError::Io)?;
            std::fs::write(&path, compressed).map_err(BackupError::Io)?;
        } else {
            std::fs::write(&path, &json).map_err(BackupError::Io)?;
        }

        *self.last_backup.lock() = Some(created_at);
        tracing::info!(
            id = %envelope.metadata.id,
            path = %path.display(),
            keys = envelope.metadata.key_count,
            skipped = keys_skipped,
            compressed = options.compress,
            "backup written"
        );

        Ok(BackupSummary {
            id,
            path,
            key_count: envelope.metadata.key_count,
            keys_skipped,
            compressed: options.compress,
        })
    }

    /// Load a backup envelope and re-write its entries.
    pub async fn restore(
        &self,
        path: &Path,
        options: &RestoreOptions,
    ) -> NuvexResult<RestoreSummary> {
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackupError::NotFound {
                    path: path.display().to_string(),
                }
            } else {
                BackupError::Io(e)
            }
        })?;

        let json = if bytes.starts_with(&GZIP_MAGIC) {
            let mut decoder = GzDecoder::new(&bytes[..]);
            let mut decoded = Vec::new();
            decoder.read_to_end(&mut decoded).map_err(BackupError::Io)?;
            decoded
        } else {
            bytes
        };

        let envelope: BackupEnvelope =
            serde_json::from_slice(&json).map_err(|e| BackupError::Format {
                reason: e.to_string(),
            })?;

        if options.clear_first && !options.dry_run {
            self.clear(None).await;
        }

        let mut summary = RestoreSummary {
            dry_run: options.dry_run,
            ..RestoreSummary::default()
        };
        for (key, record) in &envelope.data {
            if options.dry_run {
                summary.restored += 1;
                continue;
            }
            let set_options = SetOptions {
                ttl: record
                    .layer_info
                    .as_ref()
                    .and_then(|info| info.ttl)
                    .map(Duration::from_secs),
                layer: record.layer_info.as_ref().map(|info| info.layer),
            };
            if self.set(key, &record.value, &set_options).await {
                summary.restored += 1;
            } else {
                tracing::warn!(key, "restore entry failed");
                summary.failed += 1;
            }
        }

        tracing::info!(
            id = %envelope.metadata.id,
            restored = summary.restored,
            failed = summary.failed,
            dry_run = options.dry_run,
            "restore finished"
        );
        Ok(summary)
    }
}

/// The most authoritative tier holding the key; restore targets it so that
/// the caches refill naturally through the cascade.
fn deepest_layer(placement: &nuvex_core::KeyPlacement) -> Option<LayerTag> {
    if placement.postgres {
        Some(LayerTag::Postgres)
    } else if placement.redis {
        Some(LayerTag::Redis)
    } else if placement.memory {
        Some(LayerTag::Memory)
    } else {
        None
    }
}
