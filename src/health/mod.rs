//! Liveness endpoints.
//!
//! # Data Flow
//! ```text
//! GET /health       → 200 immediately (process is up)
//! GET /health/full  → probe worker GET /health with the probe budget
//!                   → 200 "ok" when the worker answers 2xx
//!                   → 503 "degraded" otherwise
//! ```
//!
//! # Design Decisions
//! - Neither endpoint is authenticated or rate limited
//! - The probe reports reachability, never the worker address

use std::time::Instant;

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::http::request::RequestContext;
use crate::http::server::GatewayState;
use crate::routing::RouteClass;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerProbe>,
}

#[derive(Debug, Serialize)]
pub struct WorkerProbe {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub latency_ms: u64,
}

impl WorkerProbe {
    fn healthy(&self) -> bool {
        self.status.is_some_and(|s| (200..300).contains(&s))
    }
}

/// `GET /health`
pub async fn health() -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        worker: None,
    })
}

/// `GET /health/full`
pub async fn health_full(State(state): State<GatewayState>, ctx: RequestContext) -> Response {
    let probe = probe_worker(&state, &ctx).await;
    let (code, status) = if probe.healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthReport {
            status,
            worker: Some(probe),
        }),
    )
        .into_response()
}

async fn probe_worker(state: &GatewayState, ctx: &RequestContext) -> WorkerProbe {
    let started = Instant::now();
    let req = state.worker_request(RouteClass::Health, Method::GET, ctx);
    let result = state.worker.send(req).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(resp) => WorkerProbe {
            reachable: true,
            status: Some(resp.status().as_u16()),
            latency_ms,
        },
        Err(e) => {
            tracing::warn!(request_id = %ctx.request_id, error = %e, "Worker health probe failed");
            WorkerProbe {
                reachable: false,
                status: None,
                latency_ms,
            }
        }
    }
}
