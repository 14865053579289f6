/// Metrics and telemetry for the agent directory
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Verification outcomes by method
/// - Key lookup latencies
/// - Reverification scans and worker throughput
/// - API errors

use crate::error::{DirError, DirResult};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== Verification Metrics ==========

    /// Verification attempts by method and outcome
    pub static ref VERIFICATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "name_verifications_total",
        "Total number of name verification attempts",
        &["method", "status"]
    )
    .unwrap();

    /// Key lookup duration in seconds, including timeouts
    pub static ref KEY_LOOKUP_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "key_lookup_duration_seconds",
        "Domain key lookup latencies in seconds",
        &["method"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    // ========== Reverification Metrics ==========

    /// Reverification scans executed
    pub static ref REVERIFICATION_SCANS_TOTAL: IntCounter = register_int_counter!(
        "reverification_scans_total",
        "Total number of reverification scans"
    )
    .unwrap();

    /// Work items handed to the worker pool
    pub static ref REVERIFICATION_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        "reverification_enqueued_total",
        "Total number of records enqueued for reverification"
    )
    .unwrap();

    /// Processed work items by outcome
    pub static ref REVERIFICATION_ITEMS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reverification_items_total",
        "Total number of reverification work items processed",
        &["outcome"]
    )
    .unwrap();

    /// Records currently queued or being verified
    pub static ref REVERIFICATION_IN_FLIGHT: IntGauge = register_int_gauge!(
        "reverification_in_flight",
        "Number of records queued or being reverified"
    )
    .unwrap();

    // ========== Error Metrics ==========

    /// Errors by type and module
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "errors_total",
        "Total number of errors",
        &["error_type", "module"]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> DirResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| DirError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| DirError::Internal(format!("Metrics are not UTF-8: {}", e)))
}

/// Record a verification attempt
pub fn record_verification(method: &str, verified: bool) {
    let status = if verified { "verified" } else { "failed" };
    VERIFICATIONS_TOTAL
        .with_label_values(&[method, status])
        .inc();
}

/// Record how long a key lookup took
pub fn observe_key_lookup(method: &str, duration: f64) {
    KEY_LOOKUP_DURATION_SECONDS
        .with_label_values(&[method])
        .observe(duration);
}

/// Record a completed reverification scan
pub fn record_reverification_scan(enqueued: usize) {
    REVERIFICATION_SCANS_TOTAL.inc();
    REVERIFICATION_ENQUEUED_TOTAL.inc_by(enqueued as u64);
}

/// Record a processed reverification item
pub fn record_reverification_item(outcome: &str) {
    REVERIFICATION_ITEMS_TOTAL
        .with_label_values(&[outcome])
        .inc();
}

/// Record an error
pub fn record_error(error_type: &str, module: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, module])
        .inc();
}
