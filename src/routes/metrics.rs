//! Prometheus metrics endpoint
//!
//! Exposes gateway metrics in Prometheus format for monitoring.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    let _ = &*PROMETHEUS_HANDLE;

    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "docent_upstream_requests_total",
        "Backend requests by operation and outcome"
    );
    metrics::describe_histogram!(
        "docent_upstream_request_duration_seconds",
        "Time until the backend answered, in seconds"
    );
    metrics::describe_counter!(
        "docent_stream_fragments_total",
        "Answer fragments relayed to clients"
    );
    metrics::describe_counter!(
        "docent_stream_parse_errors_total",
        "Answer stream units dropped because they were not valid JSON"
    );
    metrics::describe_counter!("docent_uploads_total", "Uploads handled by outcome");
    metrics::describe_gauge!(
        "docent_active_connections",
        "Open realtime WebSocket connections"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

/// Record one backend call
pub fn record_upstream(operation: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "docent_upstream_requests_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "docent_upstream_request_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

/// Record a fragment relayed to a client
pub fn record_fragment() {
    metrics::counter!("docent_stream_fragments_total").increment(1);
}

/// Record a dropped, unparseable stream unit
pub fn record_parse_error() {
    metrics::counter!("docent_stream_parse_errors_total").increment(1);
}

/// Record an upload outcome
pub fn record_upload(outcome: &str) {
    metrics::counter!("docent_uploads_total", "outcome" => outcome.to_string()).increment(1);
}

/// Track realtime connections opening and closing
pub fn connection_opened() {
    metrics::gauge!("docent_active_connections").increment(1.0);
}

pub fn connection_closed() {
    metrics::gauge!("docent_active_connections").decrement(1.0);
}
