use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

use crate::error::EngineResult;

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Store Metrics (MongoDB, Redis, in-memory)
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "store_operations_total",
        "Total number of store operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "store_operation_duration_seconds",
        "Store operation duration in seconds",
        &["operation", "collection"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Quiz Metrics
    pub static ref SESSIONS_CREATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_sessions_created_total",
        "Total number of quiz sessions created",
        &["mode"]
    )
    .unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "quiz_sessions_active",
        "Number of quiz sessions held by this instance"
    )
    .unwrap();

    pub static ref LEVELS_COMPLETED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_levels_completed_total",
        "Total number of completed level attempts",
        &["mode", "outcome"]
    )
    .unwrap();

    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_answers_submitted_total",
        "Total number of answers submitted",
        &["correct"]
    )
    .unwrap();

    pub static ref PREDICTOR_CALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_predictor_calls_total",
        "Total number of prediction service calls",
        &["outcome"]
    )
    .unwrap();

    pub static ref PREDICTOR_CALL_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "quiz_predictor_call_duration_seconds",
        "Prediction service call duration in seconds",
        &["outcome"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap();

    pub static ref QUESTIONS_SAMPLED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_questions_sampled_total",
        "Sampled questions by outcome",
        &["difficulty", "outcome"]
    )
    .unwrap();

    pub static ref RESULTS_RECORDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_results_recorded_total",
        "Total number of attempt results persisted",
        &["source"]
    )
    .unwrap();

    pub static ref PROGRESS_CONFLICTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_progress_conflicts_total",
        "Optimistic version conflicts while saving learner progress",
        &["resolution"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track a store operation with metrics
pub async fn track_store_operation<F, T>(
    operation: &str,
    collection: &str,
    future: F,
) -> EngineResult<T>
where
    F: std::future::Future<Output = EngineResult<T>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = match &result {
        Ok(_) => "success",
        Err(err) => err.kind(),
    };

    STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

pub fn record_answer(correct: bool) {
    ANSWERS_SUBMITTED_TOTAL
        .with_label_values(&[if correct { "true" } else { "false" }])
        .inc();
}

pub fn record_level_completed(mode: &str, pass: bool) {
    LEVELS_COMPLETED_TOTAL
        .with_label_values(&[mode, if pass { "pass" } else { "fail" }])
        .inc();
}
