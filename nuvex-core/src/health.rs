//! Unified health check types
//!
//! The engine reports per-layer liveness as a map of booleans; these types
//! summarize that map into an overall status for callers that want a single
//! answer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::LayerTag;

/// Health of the engine as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every checked layer responded.
    Healthy,
    /// Some layers responded, some did not.
    Degraded,
    /// No checked layer responded.
    Unhealthy,
}

/// Result of a health check across one or more layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Liveness per requested layer. Contains exactly the requested layers.
    pub layers: BTreeMap<LayerTag, bool>,
}

impl HealthReport {
    /// Summarize a per-layer liveness map.
    pub fn from_layers(layers: BTreeMap<LayerTag, bool>) -> Self {
        let up = layers.values().filter(|ok| **ok).count();
        let status = if layers.is_empty() || up == layers.len() {
            HealthStatus::Healthy
        } else if up == 0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        Self { status, layers }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layers(entries: &[(LayerTag, bool)]) -> BTreeMap<LayerTag, bool> {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_all_up_is_healthy() {
        let report = HealthReport::from_layers(layers(&[
            (LayerTag::Memory, true),
            (LayerTag::Postgres, true),
        ]));
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.is_healthy());
    }

    #[test]
    fn test_partial_is_degraded() {
        let report = HealthReport::from_layers(layers(&[
            (LayerTag::Memory, true),
            (LayerTag::Redis, false),
        ]));
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_all_down_is_unhealthy() {
        let report = HealthReport::from_layers(layers(&[(LayerTag::Redis, false)]));
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_report_contains_only_requested_layers() {
        let report = HealthReport::from_layers(layers(&[
            (LayerTag::Redis, false),
            (LayerTag::Postgres, true),
        ]));
        assert_eq!(report.layers.len(), 2);
        assert!(!report.layers.contains_key(&LayerTag::Memory));
    }
}
