//! Metrics module
//!
//! Prometheus metrics for uploads and object storage traffic, registered in
//! the default registry.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "upload_destination_uploads_total",
        "Total number of uploads",
        &["client_mode", "status"]
    ).unwrap();

    pub static ref UPLOAD_FAILURES: CounterVec = register_counter_vec!(
        "upload_destination_upload_failures_total",
        "Failed uploads by reason",
        &["client_mode", "reason"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "upload_destination_upload_bytes_total",
        "Total bytes persisted"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "upload_destination_upload_duration_seconds",
        "Upload duration in seconds",
        &["client_mode"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).unwrap();

    // Object storage metrics
    pub static ref OBJECT_STORAGE_REQUESTS: CounterVec = register_counter_vec!(
        "upload_destination_object_storage_requests_total",
        "Object storage requests by operation",
        &["operation", "status"]
    ).unwrap();

    pub static ref OBJECT_STORAGE_UPLOAD_BYTES: Counter = register_counter!(
        "upload_destination_object_storage_upload_bytes_total",
        "Bytes uploaded to object storage"
    ).unwrap();

    // Multipart metrics
    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "upload_destination_multipart_parts",
        "Number of parts per multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "upload_destination_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a successful upload
pub fn record_upload_success(client_mode: &str, bytes: u64) {
    UPLOADS_TOTAL
        .with_label_values(&[client_mode, "success"])
        .inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed upload
pub fn record_upload_failure(client_mode: &str, reason: &str) {
    UPLOADS_TOTAL
        .with_label_values(&[client_mode, "failure"])
        .inc();
    UPLOAD_FAILURES
        .with_label_values(&[client_mode, reason])
        .inc();
}

/// Record upload duration
pub fn record_upload_duration(client_mode: &str, duration_secs: f64) {
    UPLOAD_DURATION
        .with_label_values(&[client_mode])
        .observe(duration_secs);
}

/// Record the outcome of one object storage request
pub fn record_object_storage_request(operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    OBJECT_STORAGE_REQUESTS
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_object_storage_bytes(bytes: u64) {
    OBJECT_STORAGE_UPLOAD_BYTES.inc_by(bytes as f64);
}

/// Record a completed multipart upload
pub fn record_multipart_parts(parts_count: usize) {
    MULTIPART_PARTS.observe(parts_count as f64);
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Text exposition of every registered metric
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
