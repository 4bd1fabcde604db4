//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Upstream Metrics
    pub static ref UPSTREAM_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pollution_aggregator_upstream_requests_total", "Total number of upstream HTTP requests"),
        &["upstream", "status"]
    ).expect("metric can be created");
    pub static ref UPSTREAM_RETRIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pollution_aggregator_upstream_retries_total", "Total number of upstream retry attempts"),
        &["upstream"]
    ).expect("metric can be created");
    pub static ref SESSION_EXCHANGES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pollution_aggregator_session_exchanges_total", "Total number of login/refresh exchanges"),
        &["exchange", "result"]
    ).expect("metric can be created");
    pub static ref ENRICHMENT_OUTCOMES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pollution_aggregator_enrichment_outcomes_total", "Total number of city summary lookups by outcome"),
        &["outcome"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pollution_aggregator_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pollution_aggregator_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_SIZE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("pollution_aggregator_cache_size", "Current number of entries in cache"),
        &["cache_name"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pollution_aggregator_errors_total", "Total number of errors returned to callers"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_metrics() {
    static INIT: std::sync::Once = std::sync::Once::new();

    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(UPSTREAM_REQUESTS_TOTAL.clone()))
            .expect("UPSTREAM_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(UPSTREAM_RETRIES_TOTAL.clone()))
            .expect("UPSTREAM_RETRIES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(SESSION_EXCHANGES_TOTAL.clone()))
            .expect("SESSION_EXCHANGES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ENRICHMENT_OUTCOMES_TOTAL.clone()))
            .expect("ENRICHMENT_OUTCOMES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_HITS_TOTAL.clone()))
            .expect("CACHE_HITS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_MISSES_TOTAL.clone()))
            .expect("CACHE_MISSES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_SIZE.clone()))
            .expect("CACHE_SIZE can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
