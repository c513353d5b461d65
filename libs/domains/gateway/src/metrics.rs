//! Prometheus recorder and gateway metrics.
//!
//! Metric names:
//! - `gateway_operations_total{operation, outcome}`
//! - `gateway_operation_duration_seconds{operation}`
//! - `gateway_agent_failures_total{operation, code}`
//! - `gateway_search_partial_total`
//! - `gateway_stream_items_total{operation, outcome}`
//! - `gateway_agents` (gauge, set by discovery)
//! - `http_requests_total{method, path, status}` and
//!   `http_request_duration_seconds{method, path}`

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

use crate::models::AgentFailure;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init_metrics() -> Result<&'static PrometheusHandle, BuildError> {
    METRICS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        register_metric_descriptions();
        info!("Prometheus metrics recorder initialized");
        Ok(handle)
    })
}

/// Rendered exposition text, or a placeholder when the recorder is not installed.
pub fn render_metrics() -> String {
    match METRICS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

fn register_metric_descriptions() {
    describe_counter!("gateway_operations_total", "Gateway operations by outcome");
    describe_histogram!(
        "gateway_operation_duration_seconds",
        "Gateway operation latency in seconds"
    );
    describe_counter!(
        "gateway_agent_failures_total",
        "Agents that failed to contribute to a fan-out"
    );
    describe_counter!(
        "gateway_search_partial_total",
        "Searches answered with warnings"
    );
    describe_counter!("gateway_stream_items_total", "Items processed on streams");
    describe_gauge!("gateway_agents", "Agents in the current membership snapshot");
    describe_counter!(
        "gateway_client_attempts_total",
        "Outbound call attempts by destination and outcome"
    );
    describe_counter!(
        "gateway_circuit_transitions_total",
        "Circuit breaker state transitions"
    );
    describe_counter!("gateway_discovery_errors_total", "Failed membership polls");
    describe_counter!(
        "gateway_membership_events_total",
        "Agents added to or removed from membership"
    );
    describe_counter!("http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
}

pub struct GatewayMetrics;

impl GatewayMetrics {
    pub fn record_operation(operation: &'static str, ok: bool, elapsed: Duration) {
        let outcome = if ok { "ok" } else { "error" };
        counter!("gateway_operations_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
        histogram!("gateway_operation_duration_seconds", "operation" => operation)
            .record(elapsed.as_secs_f64());
    }

    pub fn record_agent_failures(operation: &'static str, failures: &[AgentFailure]) {
        for failure in failures {
            counter!(
                "gateway_agent_failures_total",
                "operation" => operation,
                "code" => format!("{:?}", failure.code)
            )
            .increment(1);
        }
    }

    pub fn record_partial_search() {
        counter!("gateway_search_partial_total").increment(1);
    }

    pub fn record_stream_item(operation: &'static str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        counter!("gateway_stream_items_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
    }
}

/// Records `http_requests_total` and `http_request_duration_seconds`.
pub async fn metrics_middleware(
    matched_path: Option<MatchedPath>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = matched_path
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    counter!(
        "http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    histogram!("http_request_duration_seconds", "method" => method, "path" => path)
        .record(start.elapsed().as_secs_f64());

    response
}
