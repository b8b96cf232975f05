//! Metrics collection using Prometheus
//!
//! This module provides a centralized metrics registry for tracking:
//! - Cache behaviour (hits, misses, coalesced waits)
//! - Fetch attempts and retries by kind
//! - Validation failures by reason
//! - Delivery outcomes

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge, HistogramVec,
    TextEncoder,
};

// ======================
// CACHE METRICS
// ======================

lazy_static! {
    /// Cache lookups by outcome
    /// Labels: outcome (hit/miss/coalesced/corrupt)
    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = register_counter_vec!(
        "soundgrab_cache_lookups_total",
        "Cache lookups by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Store operations that failed and were degraded to a miss or skipped write
    /// Labels: operation (load/save/set_file_id/remove/prune)
    pub static ref CACHE_STORE_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "soundgrab_cache_store_errors_total",
        "Cache store failures that were degraded",
        &["operation"]
    )
    .unwrap();

    /// Fetches currently in flight
    pub static ref FETCHES_IN_FLIGHT: Gauge = register_gauge!(
        "soundgrab_fetches_in_flight",
        "Track fetches currently running"
    )
    .unwrap();
}

// ======================
// DOWNLOAD METRICS
// ======================

lazy_static! {
    /// End-to-end fetch duration (select + fetch + validate) by protocol
    /// Labels: protocol (progressive/hls)
    pub static ref DOWNLOAD_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "soundgrab_download_duration_seconds",
        "Time spent fetching and validating a track",
        &["protocol"],
        vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap();

    /// HTTP fetch attempts by kind
    /// Labels: kind (segment/direct/manifest)
    pub static ref FETCH_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "soundgrab_fetch_attempts_total",
        "HTTP fetch attempts by kind",
        &["kind"]
    )
    .unwrap();

    /// Retries performed by the retry helper
    /// Labels: attempt (1, 2, ...)
    pub static ref TASK_RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "soundgrab_task_retries_total",
        "Retries by attempt number",
        &["attempt"]
    )
    .unwrap();

    /// Failed downloads by error category
    /// Labels: category
    pub static ref DOWNLOAD_FAILURE_TOTAL: CounterVec = register_counter_vec!(
        "soundgrab_download_failure_total",
        "Failed downloads by error category",
        &["category"]
    )
    .unwrap();

    /// Files rejected by the validator
    /// Labels: reason
    pub static ref VALIDATION_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "soundgrab_validation_failures_total",
        "Downloads rejected by the validator",
        &["reason"]
    )
    .unwrap();
}

// ======================
// DELIVERY METRICS
// ======================

lazy_static! {
    /// Terminal delivery outcomes
    /// Labels: state (delivered/failed), kind (ok or error category)
    pub static ref DELIVERY_OUTCOMES_TOTAL: CounterVec = register_counter_vec!(
        "soundgrab_delivery_outcomes_total",
        "Delivery outcomes by final state and error kind",
        &["state", "kind"]
    )
    .unwrap();
}

/// Touches every metric so it shows up in exports before the first event.
pub fn init_metrics() {
    log::info!("Initializing metrics registry...");

    for outcome in ["hit", "miss", "coalesced", "corrupt"] {
        CACHE_LOOKUPS_TOTAL.with_label_values(&[outcome]);
    }
    let _ = &*CACHE_STORE_ERRORS_TOTAL;
    let _ = &*FETCHES_IN_FLIGHT;

    for protocol in ["progressive", "hls"] {
        DOWNLOAD_DURATION_SECONDS.with_label_values(&[protocol]);
    }
    for kind in ["segment", "direct", "manifest"] {
        FETCH_ATTEMPTS_TOTAL.with_label_values(&[kind]);
    }
    let _ = &*TASK_RETRIES_TOTAL;
    let _ = &*DOWNLOAD_FAILURE_TOTAL;
    let _ = &*VALIDATION_FAILURES_TOTAL;

    DELIVERY_OUTCOMES_TOTAL.with_label_values(&["delivered", "ok"]);

    log::info!("Metrics registry initialized successfully");
}

/// Helper function to record a cache lookup outcome
pub fn record_cache_lookup(outcome: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Helper function to record a degraded store failure
pub fn record_store_error(operation: &str) {
    CACHE_STORE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
}

/// Helper function to record a fetch attempt
pub fn record_fetch_attempt(kind: &str) {
    FETCH_ATTEMPTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Helper function to record download failure
pub fn record_download_failure(category: &str) {
    DOWNLOAD_FAILURE_TOTAL.with_label_values(&[category]).inc();
}

/// Helper function to record a validator rejection
pub fn record_validation_failure(reason: &str) {
    VALIDATION_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

/// Helper function to record a terminal delivery outcome
pub fn record_delivery(state: &str, kind: &str) {
    DELIVERY_OUTCOMES_TOTAL.with_label_values(&[state, kind]).inc();
}

/// Renders the default registry in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        log::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
