/// Metrics and telemetry for the DID registrar
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Operation building and ledger submissions
/// - Confirmations and rejections by cause
/// - Resolution counts and latency
/// - Background job execution

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, Encoder, Gauge, Histogram, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Operation Metrics ==========

    /// Signed operations built, by kind
    pub static ref OPERATIONS_BUILT_TOTAL: IntCounterVec = register_int_counter_vec!(
        "did_operations_built_total",
        "Total number of signed DID operations built",
        &["kind"]
    )
    .unwrap();

    /// Ledger submissions by outcome (accepted, transient, permanent)
    pub static ref LEDGER_SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ledger_submissions_total",
        "Total number of ledger submission attempts",
        &["outcome"]
    )
    .unwrap();

    /// Submission retries after transient failures
    pub static ref LEDGER_SUBMISSION_RETRIES_TOTAL: IntCounter = register_int_counter!(
        "ledger_submission_retries_total",
        "Total number of ledger submission retries"
    )
    .unwrap();

    /// Operations confirmed into the store
    pub static ref OPERATIONS_CONFIRMED_TOTAL: IntCounter = register_int_counter!(
        "did_operations_confirmed_total",
        "Total number of confirmed DID operations"
    )
    .unwrap();

    /// Operations rejected, by cause
    pub static ref OPERATIONS_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "did_operations_rejected_total",
        "Total number of rejected DID operations",
        &["cause"]
    )
    .unwrap();

    /// Scheduled operations not yet terminal
    pub static ref SCHEDULED_OPERATIONS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "scheduled_operations_in_flight",
        "Number of scheduled operations awaiting a terminal status"
    )
    .unwrap();

    // ========== Resolution Metrics ==========

    /// Resolutions by outcome
    pub static ref RESOLUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "did_resolutions_total",
        "Total number of DID resolutions",
        &["status"]
    )
    .unwrap();

    /// Resolution duration in seconds
    pub static ref RESOLUTION_DURATION_SECONDS: Histogram = register_histogram!(
        "did_resolution_duration_seconds",
        "DID resolution latencies in seconds",
        vec![0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .unwrap();

    // ========== System Metrics ==========

    /// Application uptime in seconds
    pub static ref UPTIME_SECONDS: Gauge = register_gauge!(
        "uptime_seconds",
        "Application uptime in seconds"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record a built operation
pub fn record_operation_built(kind: &str) {
    OPERATIONS_BUILT_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a ledger submission attempt
pub fn record_submission(outcome: &str) {
    LEDGER_SUBMISSIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a submission retry
pub fn record_retry() {
    LEDGER_SUBMISSION_RETRIES_TOTAL.inc();
}

/// Record a confirmation
pub fn record_confirmation() {
    OPERATIONS_CONFIRMED_TOTAL.inc();
}

/// Record a rejection
pub fn record_rejection(cause: &str) {
    OPERATIONS_REJECTED_TOTAL.with_label_values(&[cause]).inc();
}

/// Record a resolution
pub fn record_resolution(success: bool, duration: f64) {
    RESOLUTIONS_TOTAL
        .with_label_values(&[if success { "success" } else { "failure" }])
        .inc();
    RESOLUTION_DURATION_SECONDS.observe(duration);
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}
