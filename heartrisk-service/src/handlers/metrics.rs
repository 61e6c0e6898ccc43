use std::sync::LazyLock;

use prometheus::{
    register_histogram, register_int_counter_vec, Encoder, Histogram, IntCounterVec, TextEncoder,
};

const LATENCY_HISTOGRAM_BUCKETS: [f64; 12] = [
    0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 15.0,
];

/// Counter metric that tracks the number of `/predict` requests.
///
/// # Metric Details
/// - Name: `heartrisk_predict_num_requests`
/// - Type: Counter
/// - Labels: `outcome` (success, invalid_body, validation_error, inference_error, model_contract_error)
pub static PREDICT_NUM_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "heartrisk_predict_num_requests",
        "The number of prediction requests, by outcome",
        &["outcome"]
    )
    .expect("Failed to register heartrisk_predict_num_requests")
});

/// Histogram metric that tracks the time taken to validate and score a patient record.
///
/// # Metric Details
/// - Name: `heartrisk_predict_latency`
/// - Type: Histogram
/// - Unit: seconds
pub static PREDICT_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "heartrisk_predict_latency",
        "Time taken to serve a prediction request in seconds",
        LATENCY_HISTOGRAM_BUCKETS.to_vec()
    )
    .expect("Failed to register heartrisk_predict_latency")
});

/// Counter metric that tracks the number of `/chat` requests.
///
/// A growing `fallback` count means the external assistant is degraded, even though
/// callers keep receiving successful responses.
///
/// # Metric Details
/// - Name: `heartrisk_chat_num_requests`
/// - Type: Counter
/// - Labels: `outcome` (answered, fallback, invalid_body)
pub static CHAT_NUM_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "heartrisk_chat_num_requests",
        "The number of chat requests, by outcome",
        &["outcome"]
    )
    .expect("Failed to register heartrisk_chat_num_requests")
});

/// Histogram metric that tracks the time taken to serve a chat request, upstream call included.
///
/// # Metric Details
/// - Name: `heartrisk_chat_latency`
/// - Type: Histogram
/// - Unit: seconds
pub static CHAT_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "heartrisk_chat_latency",
        "Time taken to serve a chat request in seconds",
        LATENCY_HISTOGRAM_BUCKETS.to_vec()
    )
    .expect("Failed to register heartrisk_chat_latency")
});

/// Renders every metric of the default registry in the Prometheus text format.
///
/// # Errors
///
/// Returns a [`prometheus::Error`] if the metric families cannot be encoded.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    // Touch the statics so the families are registered even before the first request.
    LazyLock::force(&PREDICT_NUM_REQUESTS);
    LazyLock::force(&PREDICT_LATENCY);
    LazyLock::force(&CHAT_NUM_REQUESTS);
    LazyLock::force(&CHAT_LATENCY);

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
