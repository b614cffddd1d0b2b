//! Metrics module
//!
//! Provides Prometheus metrics for uploads.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "b2_uploads_total",
        "Total number of finished uploads",
        &["status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "b2_upload_bytes_total",
        "Total bytes confirmed by storage"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "b2_upload_duration_seconds",
        "Upload duration in seconds",
        &["method"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    ).unwrap();

    // Part metrics
    pub static ref UPLOAD_PARTS: CounterVec = register_counter_vec!(
        "b2_upload_parts_total",
        "Part uploads by outcome",
        &["status"]
    ).unwrap();

    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "b2_multipart_parts",
        "Number of parts per multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 10000.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "b2_errors_total",
        "Total upload errors",
        &["kind"]
    ).unwrap();
}

/// Record a successful upload
pub fn record_upload_success(method: &str, duration_secs: f64) {
    UPLOADS_TOTAL.with_label_values(&["success"]).inc();
    UPLOAD_DURATION
        .with_label_values(&[method])
        .observe(duration_secs);
}

/// Record an upload that ended in error or was canceled
pub fn record_upload_failure(status: &str, kind: &str) {
    UPLOADS_TOTAL.with_label_values(&[status]).inc();
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a confirmed part
pub fn record_part_success(bytes: u64) {
    UPLOAD_PARTS.with_label_values(&["success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed part
pub fn record_part_failure() {
    UPLOAD_PARTS.with_label_values(&["failure"]).inc();
}

/// Record a finished multipart upload
pub fn record_multipart_parts(parts_count: usize) {
    MULTIPART_PARTS.observe(parts_count as f64);
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_upload_success() {
        record_upload_success("multipart", 0.5);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_record_part_outcomes() {
        record_part_success(5 * 1024 * 1024);
        record_part_failure();
        record_multipart_parts(3);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_gather_text_contains_upload_metrics() {
        record_upload_failure("error", "upload_part_failed");
        let text = gather_text();
        assert!(text.contains("b2_uploads_total"));
        assert!(text.contains("b2_errors_total"));
    }
}
