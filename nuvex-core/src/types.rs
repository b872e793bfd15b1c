//! Layer addressing and operation option types.
//!
//! The engine's public operations take small explicit option structs instead
//! of ad-hoc parameter lists, and layers are addressed with the closed
//! `LayerTag` sum type.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Values stored by the engine. Cache layers hold the serialized JSON form;
/// Postgres stores a JSONB column.
pub type Value = serde_json::Value;

/// One of the three storage tiers.
///
/// Ordering is by authority: `Postgres` is the source of truth, `Memory` is
/// the fastest and least authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerTag {
    Memory,
    Redis,
    Postgres,
}

impl LayerTag {
    /// All tiers, fastest first. This is also the read-cascade order.
    pub const ALL: [LayerTag; 3] = [LayerTag::Memory, LayerTag::Redis, LayerTag::Postgres];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerTag::Memory => "memory",
            LayerTag::Redis => "redis",
            LayerTag::Postgres => "postgres",
        }
    }

    /// Layers strictly faster (less authoritative) than this one.
    ///
    /// Used by the increment cascade (propagate upward) and by `demote`
    /// (drop the key from every faster tier).
    pub fn faster_layers(&self) -> &'static [LayerTag] {
        match self {
            LayerTag::Memory => &[],
            LayerTag::Redis => &[LayerTag::Memory],
            LayerTag::Postgres => &[LayerTag::Memory, LayerTag::Redis],
        }
    }
}

impl fmt::Display for LayerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(LayerTag::Memory),
            "redis" => Ok(LayerTag::Redis),
            "postgres" => Ok(LayerTag::Postgres),
            other => Err(format!("unknown layer: {other}")),
        }
    }
}

/// Selector for metrics and health operations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LayerSelector {
    /// Every tier, configured or not.
    #[default]
    All,
    /// A single tier.
    One(LayerTag),
    /// An explicit subset.
    Subset(Vec<LayerTag>),
}

impl LayerSelector {
    /// Resolve the selector into the concrete list of tiers it names,
    /// preserving cascade order and deduplicating.
    pub fn resolve(&self) -> Vec<LayerTag> {
        match self {
            LayerSelector::All => LayerTag::ALL.to_vec(),
            LayerSelector::One(tag) => vec![*tag],
            LayerSelector::Subset(tags) => {
                let mut seen = BTreeMap::new();
                for tag in tags {
                    seen.entry(*tag).or_insert(());
                }
                LayerTag::ALL
                    .iter()
                    .copied()
                    .filter(|t| seen.contains_key(t))
                    .collect()
            }
        }
    }
}

impl From<LayerTag> for LayerSelector {
    fn from(tag: LayerTag) -> Self {
        LayerSelector::One(tag)
    }
}

/// Options for `get`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Read only this layer, returning absent if it is not configured.
    pub layer: Option<LayerTag>,
    /// Bypass both caches and read the durable store directly.
    pub skip_cache: bool,
    /// TTL to apply when the read warms a cache, overriding the per-layer
    /// defaults.
    pub ttl: Option<Duration>,
}

impl GetOptions {
    pub fn layer(tag: LayerTag) -> Self {
        Self {
            layer: Some(tag),
            ..Self::default()
        }
    }

    pub fn skip_cache() -> Self {
        Self {
            skip_cache: true,
            ..Self::default()
        }
    }
}

/// Options for `set`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Time-to-live for the written entry. Absent means no expiry.
    pub ttl: Option<Duration>,
    /// Write only this layer, bypassing the L3-first protocol.
    pub layer: Option<LayerTag>,
}

impl SetOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn layer(tag: LayerTag) -> Self {
        Self {
            layer: Some(tag),
            ..Self::default()
        }
    }
}

/// Sort field for `query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Key,
    CreatedAt,
}

/// Sort direction for `query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Options for `query`.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Glob pattern (`*` and `?`) restricting the key set. Absent matches all.
    pub pattern: Option<String>,
    pub sort_by: SortField,
    pub order: SortOrder,
    pub offset: usize,
    /// Page size. Absent returns everything from `offset` on.
    pub limit: Option<usize>,
}

/// One item of a query result.
#[derive(Debug, Clone, Serialize)]
pub struct QueryItem {
    pub key: String,
    pub value: Value,
    /// Creation timestamp, known only when the durable store holds the key.
    pub created_at: Option<DateTime<Utc>>,
}

/// Result of `query`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub items: Vec<QueryItem>,
    /// Whether entries beyond `offset + limit` exist.
    pub has_more: bool,
    /// Total matching keys before pagination.
    pub total: usize,
}

/// Input entry for `set_batch`.
#[derive(Debug, Clone)]
pub struct BatchSetItem {
    pub key: String,
    pub value: Value,
    pub ttl: Option<Duration>,
}

impl BatchSetItem {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Per-entry outcome of a batch operation. A failed entry never aborts the
/// batch; it is reported here instead.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub key: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    pub fn ok(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            success: true,
            value: None,
            error: None,
        }
    }

    pub fn ok_with_value(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            success: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn failed(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            success: false,
            value: None,
            error: Some(error.into()),
        }
    }
}

/// Which tiers currently hold a key, as reported by `layer_info`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KeyPlacement {
    pub memory: bool,
    pub redis: bool,
    pub postgres: bool,
    /// Remaining TTL at the durable store, when it holds the key with expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_remaining: Option<Duration>,
}

impl KeyPlacement {
    /// The fastest tier holding the key, if any.
    pub fn fastest(&self) -> Option<LayerTag> {
        if self.memory {
            Some(LayerTag::Memory)
        } else if self.redis {
            Some(LayerTag::Redis)
        } else if self.postgres {
            Some(LayerTag::Postgres)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_tag_round_trip() {
        for tag in LayerTag::ALL {
            assert_eq!(tag.as_str().parse::<LayerTag>().unwrap(), tag);
        }
        assert!("disk".parse::<LayerTag>().is_err());
    }

    #[test]
    fn test_layer_tag_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&LayerTag::Postgres).unwrap(),
            "\"postgres\""
        );
        let tag: LayerTag = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(tag, LayerTag::Memory);
    }

    #[test]
    fn test_faster_layers_order() {
        assert_eq!(
            LayerTag::Postgres.faster_layers(),
            &[LayerTag::Memory, LayerTag::Redis]
        );
        assert_eq!(LayerTag::Redis.faster_layers(), &[LayerTag::Memory]);
        assert!(LayerTag::Memory.faster_layers().is_empty());
    }

    #[test]
    fn test_selector_resolution_dedupes_and_orders() {
        let selector = LayerSelector::Subset(vec![
            LayerTag::Postgres,
            LayerTag::Memory,
            LayerTag::Postgres,
        ]);
        assert_eq!(
            selector.resolve(),
            vec![LayerTag::Memory, LayerTag::Postgres]
        );
        assert_eq!(LayerSelector::All.resolve(), LayerTag::ALL.to_vec());
        assert_eq!(
            LayerSelector::One(LayerTag::Redis).resolve(),
            vec![LayerTag::Redis]
        );
    }

    #[test]
    fn test_key_placement_fastest() {
        let placement = KeyPlacement {
            memory: false,
            redis: true,
            postgres: true,
            ttl_remaining: None,
        };
        assert_eq!(placement.fastest(), Some(LayerTag::Redis));
        assert_eq!(KeyPlacement::default().fastest(), None);
    }
}
