use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all service metrics
const PREFIX: &str = "reelfilter";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Refresh Metrics
    pub static ref REFRESH_CYCLES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_refresh_cycles_total"), "Completed refresh cycles by status"),
        &["status"]
    ).expect("Failed to create refresh_cycles_total metric");

    pub static ref REFRESH_CYCLE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_refresh_cycle_duration_seconds"),
            "Refresh cycle duration in seconds"
        )
        .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0])
    ).expect("Failed to create refresh_cycle_duration_seconds metric");

    pub static ref REFRESH_LISTINGS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_refresh_listings_total"), "Processed listings by outcome"),
        &["outcome"]
    ).expect("Failed to create refresh_listings_total metric");

    pub static ref MATCH_DECISIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_match_decisions_total"), "Matching engine decisions by band"),
        &["decision"]
    ).expect("Failed to create match_decisions_total metric");

    pub static ref SOURCE_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_source_errors_total"), "Source adapter errors by kind"),
        &["source", "kind"]
    ).expect("Failed to create source_errors_total metric");

    // Review Queue Metrics
    pub static ref REVIEW_QUEUE_PENDING: Gauge = Gauge::new(
        format!("{PREFIX}_review_queue_pending"),
        "Pending review queue entries"
    ).expect("Failed to create review_queue_pending metric");

    pub static ref REVIEW_RESOLUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_review_resolutions_total"), "Review resolutions by outcome"),
        &["outcome"]
    ).expect("Failed to create review_resolutions_total metric");

    // Database Metrics
    pub static ref DB_QUERY_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_db_query_duration_seconds"),
            "Database query duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["operation"]
    ).expect("Failed to create db_query_duration_seconds metric");

    // Catalog Metrics
    pub static ref CATALOG_ENTRIES_TOTAL: Gauge = Gauge::new(
        format!("{PREFIX}_catalog_entries_total"),
        "Total entries in the reconciled catalog"
    ).expect("Failed to create catalog_entries_total metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.1, 1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    // Error Metrics
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_errors_total"), "Total errors by type and endpoint"),
        &["error_type", "endpoint"]
    ).expect("Failed to create errors_total metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(REFRESH_CYCLES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REFRESH_CYCLE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(REFRESH_LISTINGS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(MATCH_DECISIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SOURCE_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REVIEW_QUEUE_PENDING.clone()));
    let _ = REGISTRY.register(Box::new(REVIEW_RESOLUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DB_QUERY_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CATALOG_ENTRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn set_catalog_entries(count: usize) {
    CATALOG_ENTRIES_TOTAL.set(count as f64);
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_refresh_cycle(status: &str, duration: Duration) {
    REFRESH_CYCLES_TOTAL.with_label_values(&[status]).inc();
    REFRESH_CYCLE_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Outcome is one of created, updated, unchanged, queued_for_review, unmatched, failed.
pub fn record_listing_outcome(outcome: &str) {
    REFRESH_LISTINGS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_match_decision(decision: &str) {
    MATCH_DECISIONS_TOTAL.with_label_values(&[decision]).inc();
}

pub fn record_source_error(source: &str, kind: &str) {
    SOURCE_ERRORS_TOTAL.with_label_values(&[source, kind]).inc();
}

pub fn set_pending_reviews(count: usize) {
    REVIEW_QUEUE_PENDING.set(count as f64);
}

pub fn record_review_resolution(outcome: &str) {
    REVIEW_RESOLUTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a database query
pub fn record_db_query(operation: &str, duration: Duration) {
    DB_QUERY_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Record a background job execution
pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// Record an error
pub fn record_error(error_type: &str, endpoint: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, endpoint])
        .inc();
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // RSS in kB
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
