// src/core/metrics.rs

//! Defines and registers Prometheus metrics for cache monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, GaugeVec, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge_vec, register_histogram,
};
use tracing::warn;

lazy_static! {
    // --- Sweep Metrics ---
    /// The total number of caching agent sweeps, labeled by `success` or `failure`.
    pub static ref SWEEPS_TOTAL: CounterVec =
        register_counter_vec!("topocache_sweeps_total", "Total number of caching agent sweeps, labeled by result.", &["result"]).unwrap();
    /// A histogram of sweep durations, from provider fetch to store apply.
    pub static ref SWEEP_DURATION_SECONDS: Histogram =
        register_histogram!("topocache_sweep_duration_seconds", "Duration of caching agent sweeps in seconds.").unwrap();


    // --- On-Demand Metrics ---
    /// On-demand requests, labeled by `handled`, `unhandled` or `error`.
    pub static ref ON_DEMAND_REQUESTS_TOTAL: CounterVec =
        register_counter_vec!("topocache_on_demand_requests_total", "Total number of on-demand requests, labeled by outcome.", &["outcome"]).unwrap();
    /// The number of on-demand payloads a sweep copied over live data.
    pub static ref ON_DEMAND_OVERLAYS_TOTAL: Counter =
        register_counter!("topocache_on_demand_overlays_total", "Total number of on-demand payloads overlaid onto sweep results.").unwrap();
    /// The number of on-demand entries evicted by sweeps or by requests for missing resources.
    pub static ref ON_DEMAND_EVICTIONS_TOTAL: Counter =
        register_counter!("topocache_on_demand_evictions_total", "Total number of on-demand entries evicted.").unwrap();


    // --- Store Metrics ---
    /// The number of stored entries per namespace, refreshed by the expiry task.
    pub static ref CACHE_ENTRIES: GaugeVec =
        register_gauge_vec!("topocache_cache_entries", "Number of stored cache entries, labeled by namespace.", &["namespace"]).unwrap();
    /// The total number of entries purged after their TTL elapsed.
    pub static ref EXPIRED_ENTRIES_TOTAL: Counter =
        register_counter!("topocache_expired_entries_total", "Total number of cache entries purged after expiring.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| {
            warn!("Failed to encode metrics: {}", e);
            String::new()
        })
}
