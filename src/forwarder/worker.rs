//! Outbound calls to the worker service.
//!
//! # Responsibilities
//! - Resolve the worker base address (override → configured → fallback)
//! - Build outbound requests carrying the correlation id and worker credential
//! - Enforce the route's deadline on every call, body reads included
//! - Relay worker responses (status, body, selected headers)
//!
//! # Design Decisions
//! - The client's `Authorization` header is never forwarded
//! - Response bodies are streamed, not buffered, unless a caller asks
//! - Worker 4xx is relayed as-is; worker 5xx becomes a 502 with detail

use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri},
    response::Response,
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tower_http::timeout::TimeoutBody;
use url::Url;

use crate::config::WorkerConfig;
use crate::error::{truncate_detail, GatewayError};
use crate::http::request::X_REQUEST_ID;
use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;
use crate::routing::RouteClass;

/// Used when neither an override nor a configured address exists.
pub const FALLBACK_WORKER_URL: &str = "http://127.0.0.1:8000";

/// Content type assumed when the worker does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Response headers copied from the worker to the client.
const RELAYED_HEADERS: [HeaderName; 3] = [
    header::CONTENT_TYPE,
    header::CONTENT_DISPOSITION,
    header::CONTENT_LENGTH,
];

/// Request headers copied from the client to the worker.
const FORWARDED_HEADERS: [HeaderName; 2] = [header::CONTENT_TYPE, header::ACCEPT];

pub type HttpClient = Client<HttpConnector, Body>;

/// Pick the worker base address: explicit override, then the configured
/// default, then [`FALLBACK_WORKER_URL`].
pub fn resolve_worker_base(config: &WorkerConfig) -> Result<Url, url::ParseError> {
    let raw = [config.override_url.as_deref(), config.base_url.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(FALLBACK_WORKER_URL);
    Url::parse(raw)
}

/// One outbound call.
pub struct WorkerRequest {
    pub route: RouteClass,
    pub method: Method,
    /// Worker path; defaults to the route's path.
    pub path: Option<String>,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Body,
    pub timeout: Duration,
    pub request_id: String,
}

impl WorkerRequest {
    pub fn new(route: RouteClass, method: Method, timeout: Duration, request_id: &str) -> Self {
        Self {
            route,
            method,
            path: None,
            query: None,
            headers: HeaderMap::new(),
            body: Body::empty(),
            timeout,
            request_id: request_id.to_string(),
        }
    }

    pub fn query(mut self, query: Option<String>) -> Self {
        self.query = query;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn content_type(mut self, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(header::CONTENT_TYPE, value);
        }
        self
    }

    /// Copy the allow-listed client headers.
    pub fn forward_headers(mut self, inbound: &HeaderMap) -> Self {
        for name in FORWARDED_HEADERS {
            if let Some(value) = inbound.get(&name) {
                self.headers.insert(name, value.clone());
            }
        }
        self
    }
}

/// Handle to the worker service. Cheap to clone.
#[derive(Clone)]
pub struct WorkerClient {
    client: HttpClient,
    base: Url,
    credential: Option<HeaderValue>,
}

impl std::fmt::Debug for WorkerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerClient")
            .field("base", &self.base.as_str())
            .field("credential", &self.credential.is_some())
            .finish()
    }
}

impl WorkerClient {
    pub fn new(config: &WorkerConfig) -> Result<Self, url::ParseError> {
        let base = resolve_worker_base(config)?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let token = config.token.trim();
        let credential = if token.is_empty() {
            None
        } else {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    Some(value)
                }
                Err(_) => {
                    tracing::error!("Worker token contains invalid header characters; calls will be unauthenticated");
                    None
                }
            }
        };

        Ok(Self {
            client,
            base,
            credential,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Full worker URI for `path` and an already-filtered query.
    pub fn uri_for(&self, path: &str, query: Option<&str>) -> Result<Uri, GatewayError> {
        let mut target = format!("{}{}", self.base.as_str().trim_end_matches('/'), path);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(query);
        }
        target
            .parse()
            .map_err(|_| GatewayError::Misconfigured("worker address is not a valid URI".into()))
    }

    /// Issue a call and return the worker response once its headers arrive.
    ///
    /// The route's budget starts here and also bounds the body read that
    /// follows (see [`WorkerResponse`]).
    pub async fn send(&self, req: WorkerRequest) -> Result<WorkerResponse, GatewayError> {
        let path = req
            .path
            .as_deref()
            .unwrap_or_else(|| req.route.worker_path());
        let uri = self.uri_for(path, req.query.as_deref())?;

        let mut outbound = Request::new(req.body);
        *outbound.method_mut() = req.method.clone();
        *outbound.uri_mut() = uri;
        let headers = outbound.headers_mut();
        headers.extend(req.headers);
        if let Ok(id) = HeaderValue::from_str(&req.request_id) {
            headers.insert(X_REQUEST_ID, id);
        }
        match &self.credential {
            Some(credential) => {
                headers.insert(header::AUTHORIZATION, credential.clone());
            }
            None => {
                headers.remove(header::AUTHORIZATION);
            }
        }

        tracing::debug!(
            request_id = %req.request_id,
            route = req.route.name(),
            method = %req.method,
            path,
            "Forwarding to worker"
        );

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + req.timeout;
        let result = with_deadline(req.timeout, self.client.request(outbound)).await;
        metrics::record_upstream_latency(req.route.name(), started.elapsed());

        match result {
            Ok(Ok(response)) => Ok(WorkerResponse {
                response,
                route: req.route,
                request_id: req.request_id,
                deadline,
                budget: req.timeout,
            }),
            Ok(Err(e)) => {
                tracing::warn!(
                    request_id = %req.request_id,
                    route = req.route.name(),
                    error = %e,
                    "Worker request failed"
                );
                metrics::record_upstream_error(req.route.name(), "unavailable");
                Err(GatewayError::UpstreamUnavailable(e.to_string()))
            }
            Err(elapsed) => {
                tracing::warn!(
                    request_id = %req.request_id,
                    route = req.route.name(),
                    timeout_secs = elapsed.budget().as_secs_f64(),
                    "Worker request timed out"
                );
                metrics::record_upstream_error(req.route.name(), "timeout");
                Err(GatewayError::UpstreamTimeout(elapsed.budget()))
            }
        }
    }

    /// Issue a call and relay the outcome to the client.
    pub async fn forward(&self, req: WorkerRequest) -> Result<Response, GatewayError> {
        let response = self.send(req).await?;
        into_client_response(response).await
    }
}

/// A worker reply whose body is still bound by the call's deadline.
pub struct WorkerResponse {
    response: Response<Incoming>,
    route: RouteClass,
    request_id: String,
    deadline: tokio::time::Instant,
    budget: Duration,
}

impl WorkerResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// What is left of the route's budget.
    pub fn remaining(&self) -> Duration {
        self.deadline
            .saturating_duration_since(tokio::time::Instant::now())
    }
}

fn body_stalled(route: RouteClass, request_id: &str, budget: Duration) -> GatewayError {
    tracing::warn!(
        request_id = %request_id,
        route = route.name(),
        timeout_secs = budget.as_secs_f64(),
        "Worker body not received within the deadline"
    );
    metrics::record_upstream_error(route.name(), "timeout");
    GatewayError::UpstreamTimeout(budget)
}

/// Map a worker response onto the client contract.
///
/// 5xx is turned into [`GatewayError::UpstreamFailed`]; everything else is
/// relayed with its body streamed through.
pub async fn into_client_response(response: WorkerResponse) -> Result<Response, GatewayError> {
    reject_server_error(response).await.map(relay)
}

/// Pass a worker response through unless its status is 5xx.
pub async fn reject_server_error(response: WorkerResponse) -> Result<WorkerResponse, GatewayError> {
    let status = response.status();
    if !status.is_server_error() {
        return Ok(response);
    }
    tracing::warn!(
        request_id = %response.request_id,
        route = response.route.name(),
        status = status.as_u16(),
        "Worker returned a server error"
    );
    metrics::record_upstream_error(response.route.name(), "status");
    Err(upstream_failure(response).await)
}

/// Turn a failed worker response into an error carrying its status and body excerpt.
///
/// A body that does not arrive within the remaining budget yields
/// [`GatewayError::UpstreamTimeout`] instead.
pub async fn upstream_failure(response: WorkerResponse) -> GatewayError {
    let remaining = response.remaining();
    let WorkerResponse {
        response,
        route,
        request_id,
        budget,
        ..
    } = response;
    let status = response.status().as_u16();
    let read = axum::body::to_bytes(Body::new(response.into_body()), 64 * 1024);
    let detail = match with_deadline(remaining, read).await {
        Ok(Ok(bytes)) => truncate_detail(&bytes),
        Ok(Err(_)) => "<unreadable worker body>".to_string(),
        Err(_) => return body_stalled(route, &request_id, budget),
    };
    GatewayError::UpstreamFailed { status, detail }
}

/// Stream a worker response to the client.
///
/// Headers are already out when the body is relayed, so a worker that goes
/// quiet for longer than the remaining budget has its stream cut off.
pub fn relay(response: WorkerResponse) -> Response {
    let remaining = response.remaining();
    let (parts, body) = response.response.into_parts();
    build_response(
        parts.status,
        &parts.headers,
        Body::new(TimeoutBody::new(remaining, body)),
    )
}

/// Read a worker response fully, up to `limit` bytes, within the remaining budget.
pub async fn buffer(
    response: WorkerResponse,
    limit: usize,
) -> Result<(StatusCode, HeaderMap, Bytes), GatewayError> {
    let remaining = response.remaining();
    let WorkerResponse {
        response,
        route,
        request_id,
        budget,
        ..
    } = response;
    let (parts, body) = response.into_parts();
    match with_deadline(remaining, axum::body::to_bytes(Body::new(body), limit)).await {
        Ok(Ok(bytes)) => Ok((parts.status, parts.headers, bytes)),
        Ok(Err(e)) => Err(GatewayError::UpstreamUnavailable(format!(
            "reading worker body: {}",
            e
        ))),
        Err(_) => Err(body_stalled(route, &request_id, budget)),
    }
}

/// Client response with the worker's status and relayed headers.
pub fn build_response(status: StatusCode, worker_headers: &HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for name in RELAYED_HEADERS {
        if let Some(value) = worker_headers.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(DEFAULT_CONTENT_TYPE),
        );
    }
    response
}
