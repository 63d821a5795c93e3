//! Prometheus metrics for entity stores.
//!
//! One [`CacheMetrics`] instance can be shared by several stores; every
//! series carries a `store` label.

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::backend::MutationKind;

#[derive(Clone)]
pub struct CacheMetrics {
    block_hits: IntCounterVec,
    block_misses: IntCounterVec,
    fetches: IntCounterVec,
    coalesced_fetches: IntCounterVec,
    evictions: IntCounterVec,
    invalidations: IntCounterVec,
    consistency_violations: IntCounterVec,
    mutations: IntCounterVec,
    resident_blocks: IntGaugeVec,
}

fn counter(name: &str, help: &str, labels: &[&str]) -> prometheus::Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help).namespace("entity_cache"), labels)
}

impl CacheMetrics {
    /// Create the metric families and register them with `registry`.
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self {
            block_hits: counter("block_hits_total", "Blocks served from memory", &["store"])?,
            block_misses: counter("block_misses_total", "Blocks that had to be fetched", &["store"])?,
            fetches: counter(
                "fetches_total",
                "Backend page fetches by outcome",
                &["store", "outcome"],
            )?,
            coalesced_fetches: counter(
                "coalesced_fetches_total",
                "Block requests that joined an in-flight fetch",
                &["store"],
            )?,
            evictions: counter("evictions_total", "Blocks evicted by the LRU policy", &["store"])?,
            invalidations: counter(
                "invalidations_total",
                "Full cache clears by reason",
                &["store", "reason"],
            )?,
            consistency_violations: counter(
                "consistency_violations_total",
                "Fetched pages shown but not cached",
                &["store", "kind"],
            )?,
            mutations: counter(
                "mutations_total",
                "Mutations by kind and outcome",
                &["store", "kind", "outcome"],
            )?,
            resident_blocks: IntGaugeVec::new(
                Opts::new("resident_blocks", "Blocks currently cached").namespace("entity_cache"),
                &["store"],
            )?,
        };

        registry.register(Box::new(metrics.block_hits.clone()))?;
        registry.register(Box::new(metrics.block_misses.clone()))?;
        registry.register(Box::new(metrics.fetches.clone()))?;
        registry.register(Box::new(metrics.coalesced_fetches.clone()))?;
        registry.register(Box::new(metrics.evictions.clone()))?;
        registry.register(Box::new(metrics.invalidations.clone()))?;
        registry.register(Box::new(metrics.consistency_violations.clone()))?;
        registry.register(Box::new(metrics.mutations.clone()))?;
        registry.register(Box::new(metrics.resident_blocks.clone()))?;
        Ok(metrics)
    }

    pub fn record_hits(&self, store: &str, count: u64) {
        self.block_hits.with_label_values(&[store]).inc_by(count);
    }

    pub fn record_misses(&self, store: &str, count: u64) {
        self.block_misses.with_label_values(&[store]).inc_by(count);
    }

    pub fn record_fetch(&self, store: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.fetches.with_label_values(&[store, outcome]).inc();
    }

    pub fn record_coalesced(&self, store: &str) {
        self.coalesced_fetches.with_label_values(&[store]).inc();
    }

    pub fn record_evictions(&self, store: &str, count: usize) {
        self.evictions.with_label_values(&[store]).inc_by(count as u64);
    }

    pub fn record_invalidation(&self, store: &str, reason: &str) {
        self.invalidations.with_label_values(&[store, reason]).inc();
    }

    pub fn record_violation(&self, store: &str, kind: &str) {
        self.consistency_violations.with_label_values(&[store, kind]).inc();
    }

    pub fn record_mutation(&self, store: &str, kind: MutationKind, ok: bool) {
        let kind = kind.to_string();
        let outcome = if ok { "applied" } else { "failed" };
        self.mutations.with_label_values(&[store, &kind, outcome]).inc();
    }

    pub fn set_resident(&self, store: &str, blocks: usize) {
        self.resident_blocks.with_label_values(&[store]).set(blocks as i64);
    }
}

/// Render every metric in `registry` in the Prometheus text format.
pub fn render(registry: &Registry) -> String {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .unwrap_or_default()
}
