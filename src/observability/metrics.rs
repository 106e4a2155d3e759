//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency by route
//! - `gateway_rate_limited_total` (counter): limiter denials by route
//! - `gateway_auth_denied_total` (counter): guard denials by reason
//! - `gateway_upstream_errors_total` (counter): worker failures by route, kind
//! - `gateway_upstream_duration_seconds` (histogram): worker latency by route
//! - `gateway_rate_limit_buckets` (gauge): live limiter buckets
//! - `gateway_rate_limit_evicted_total` (counter): buckets removed by the reaper
//! - `gateway_trigger_total` (counter): post-upload triggers by outcome
//!
//! # Design Decisions
//! - Macros from the `metrics` facade; recording is a no-op without an exporter
//! - Labels are route class names, never raw paths or client keys

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{extract::Request, middleware::Next, response::Response};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::routing::RouteClass;

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, started: Instant) {
    counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_rate_limited(route: &str) {
    counter!("gateway_rate_limited_total", "route" => route.to_string()).increment(1);
}

pub fn record_auth_denied(reason: &'static str) {
    counter!("gateway_auth_denied_total", "reason" => reason).increment(1);
}

pub fn record_upstream_error(route: &str, kind: &'static str) {
    counter!(
        "gateway_upstream_errors_total",
        "route" => route.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_upstream_latency(route: &str, elapsed: Duration) {
    histogram!("gateway_upstream_duration_seconds", "route" => route.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_buckets(live: usize, evicted: usize) {
    gauge!("gateway_rate_limit_buckets").set(live as f64);
    if evicted > 0 {
        counter!("gateway_rate_limit_evicted_total").increment(evicted as u64);
    }
}

pub fn record_trigger(outcome: &'static str) {
    counter!("gateway_trigger_total", "outcome" => outcome).increment(1);
}

/// Label for a gateway path: the route class name, or `other`.
pub fn route_label(path: &str) -> &'static str {
    if path == "/health/full" {
        return "health_full";
    }
    RouteClass::ALL
        .iter()
        .find(|class| class.worker_path() == path)
        .map(|class| class.name())
        .unwrap_or("other")
}

/// Count every response by route class.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = route_label(request.uri().path());

    let response = next.run(request).await;
    record_request(route, response.status().as_u16(), started);
    response
}
