//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, status
//! - `http_request_duration_seconds` (histogram): latency distribution
//! - `http_rate_limited_total` (counter): requests rejected by the rate limiter
//! - `http_cors_rejected_total` (counter): requests from unlisted origins
//! - `database_connection_status` (gauge): 0 disconnected, 1 connecting,
//!   2 connected, 3 error
//!
//! Recording is a no-op until an exporter is installed.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::database::ConnectionStatus;

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "status" => status.clone()
    )
    .increment(1);
    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    metrics::counter!("http_rate_limited_total").increment(1);
}

pub fn record_cors_rejected() {
    metrics::counter!("http_cors_rejected_total").increment(1);
}

pub fn record_db_status(status: ConnectionStatus) {
    let value = match status {
        ConnectionStatus::Disconnected => 0.0,
        ConnectionStatus::Connecting => 1.0,
        ConnectionStatus::Connected => 2.0,
        ConnectionStatus::Error => 3.0,
    };
    metrics::gauge!("database_connection_status").set(value);
}

/// Middleware recording request count and latency.
pub async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    record_request(&method, response.status().as_u16(), start);
    response
}
