//! Engine metrics: per-layer hit counters, operation counters and a smoothed
//! response time.
//!
//! Counters are plain atomics updated from any task; readers take point-in-
//! time snapshots. Within a session counters only move forward until an
//! explicit `reset`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use nuvex_core::{LayerSelector, LayerTag};
use serde::Serialize;

/// Smoothing factor for the response-time EMA.
pub const RESPONSE_EMA_ALPHA: f64 = 0.2;

/// Counter block owned by the engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    memory_hits: AtomicU64,
    redis_hits: AtomicU64,
    postgres_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    /// EMA of response time in milliseconds, stored as f64 bits.
    avg_response_ms_bits: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, layer: LayerTag) {
        let counter = match layer {
            LayerTag::Memory => &self.memory_hits,
            LayerTag::Redis => &self.redis_hits,
            LayerTag::Postgres => &self.postgres_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one response-time sample into the EMA with α = 0.2. The first
    /// sample seeds the average.
    pub fn record_response_time(&self, elapsed: Duration) {
        let sample_ms = elapsed.as_secs_f64() * 1_000.0;
        let _ = self
            .avg_response_ms_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let previous = f64::from_bits(bits);
                let next = if bits == 0 {
                    sample_ms
                } else {
                    previous + RESPONSE_EMA_ALPHA * (sample_ms - previous)
                };
                Some(next.to_bits())
            });
    }

    /// Zero every counter and the EMA.
    pub fn reset(&self) {
        self.memory_hits.store(0, Ordering::Relaxed);
        self.redis_hits.store(0, Ordering::Relaxed);
        self.postgres_hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.avg_response_ms_bits.store(0, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            redis_hits: self.redis_hits.load(Ordering::Relaxed),
            postgres_hits: self.postgres_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            avg_response_ms: f64::from_bits(self.avg_response_ms_bits.load(Ordering::Relaxed)),
        }
    }

    /// Build the caller-facing view for a selector. A single selected layer
    /// yields only that layer's block; two or more layers also yield totals
    /// with the hit ratio restricted to the selected layers.
    pub fn report(
        &self,
        selector: &LayerSelector,
        memory_len: usize,
        memory_max: usize,
    ) -> MetricsReport {
        let snapshot = self.snapshot();
        let selected = selector.resolve();

        let mut layers = BTreeMap::new();
        for tag in &selected {
            let mut block = LayerMetrics {
                hits: snapshot.layer_hits(*tag),
                size: None,
                max_size: None,
            };
            if *tag == LayerTag::Memory {
                block.size = Some(memory_len);
                block.max_size = Some(memory_max);
            }
            layers.insert(*tag, block);
        }

        let totals = if selected.len() >= 2 {
            let hits: u64 = selected.iter().map(|tag| snapshot.layer_hits(*tag)).sum();
            Some(MetricsTotals {
                hits,
                misses: snapshot.misses,
                sets: snapshot.sets,
                deletes: snapshot.deletes,
                errors: snapshot.errors,
                cache_hit_ratio: ratio(hits, snapshot.misses),
                avg_response_ms: snapshot.avg_response_ms,
            })
        } else {
            None
        };

        MetricsReport { layers, totals }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub memory_hits: u64,
    pub redis_hits: u64,
    pub postgres_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub avg_response_ms: f64,
}

impl MetricsSnapshot {
    pub fn layer_hits(&self, layer: LayerTag) -> u64 {
        match layer {
            LayerTag::Memory => self.memory_hits,
            LayerTag::Redis => self.redis_hits,
            LayerTag::Postgres => self.postgres_hits,
        }
    }

    pub fn total_hits(&self) -> u64 {
        self.memory_hits + self.redis_hits + self.postgres_hits
    }

    /// Hits over reads. Zero reads yields zero.
    pub fn cache_hit_ratio(&self) -> f64 {
        ratio(self.total_hits(), self.misses)
    }
}

/// Per-layer metrics block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LayerMetrics {
    pub hits: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<usize>,
}

/// Aggregates across the selected layers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsTotals {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub cache_hit_ratio: f64,
    pub avg_response_ms: f64,
}

/// Selector-shaped metrics view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub layers: BTreeMap<LayerTag, LayerMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<MetricsTotals>,
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let reads = hits + misses;
    if reads == 0 {
        0.0
    } else {
        hits as f64 / reads as f64
    }
}
