//! Handlers for the worker-backed routes.
//!
//! # Responsibilities
//! - Validate client input that the worker contract depends on
//! - Apply the per-route query allow-list
//! - Forward through [`WorkerClient`](crate::forwarder::WorkerClient) and relay the reply
//! - `/upload`: re-stream multipart and fire the post-upload trigger
//! - `/ask`: fall back to a search-only answer when the worker cannot answer
//!
//! Auth and rate limiting are applied as route layers in `server.rs`; by the
//! time a handler runs the request has already been admitted.

use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartRejection, Multipart, RawQuery, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use url::form_urlencoded;

use crate::error::GatewayError;
use crate::forwarder::{
    multipart::{self, DecodeFailure},
    query::{filter_query, query_param},
    worker::{self, WorkerRequest},
};
use crate::http::request::RequestContext;
use crate::http::server::GatewayState;
use crate::observability::metrics;
use crate::routing::RouteClass;

/// Worker path receiving the post-upload processing trigger.
pub const TRIGGER_PATH: &str = "/process";

/// Upload replies are small JSON documents; anything larger is relayed as an error.
const UPLOAD_REPLY_LIMIT: usize = 1024 * 1024;
const SEARCH_RESULTS_LIMIT: usize = 8 * 1024 * 1024;

const DEFAULT_ASK_K: u32 = 5;
const MAX_K: u32 = 100;

fn finish(ctx: &RequestContext, result: Result<Response, GatewayError>) -> Response {
    result.unwrap_or_else(|e| e.into_response_for(&ctx.request_id))
}

/// `GET /status`
pub async fn status(
    State(state): State<GatewayState>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Response {
    let req = state
        .worker_request(RouteClass::Status, Method::GET, &ctx)
        .forward_headers(&headers);
    finish(&ctx, state.worker.forward(req).await)
}

/// `GET /search`
pub async fn search(
    State(state): State<GatewayState>,
    ctx: RequestContext,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Response {
    let result = async {
        validate_search(raw.as_deref())?;
        let req = state
            .worker_request(RouteClass::Search, Method::GET, &ctx)
            .query(filter_query(raw.as_deref(), RouteClass::Search.allowed_params()))
            .forward_headers(&headers);
        state.worker.forward(req).await
    }
    .await;
    finish(&ctx, result)
}

fn validate_search(raw: Option<&str>) -> Result<(), GatewayError> {
    let q = query_param(raw, "q").unwrap_or_default();
    if q.trim().is_empty() {
        return Err(GatewayError::BadRequest(
            "query parameter 'q' is required".into(),
        ));
    }
    if let Some(k) = query_param(raw, "k") {
        parse_k(&k)?;
    }
    Ok(())
}

fn parse_k(raw: &str) -> Result<u32, GatewayError> {
    raw.trim().parse::<u32>().ok().and_then(k_in_range).ok_or_else(k_error)
}

fn k_in_range(k: u32) -> Option<u32> {
    (1..=MAX_K).contains(&k).then_some(k)
}

fn k_error() -> GatewayError {
    GatewayError::BadRequest(format!("'k' must be an integer between 1 and {MAX_K}"))
}

/// `GET /export`
pub async fn export(
    State(state): State<GatewayState>,
    ctx: RequestContext,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Response {
    passthrough(state, ctx, headers, raw, RouteClass::Export).await
}

/// `GET /export/archive`
pub async fn export_archive(
    State(state): State<GatewayState>,
    ctx: RequestContext,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Response {
    passthrough(state, ctx, headers, raw, RouteClass::ExportArchive).await
}

async fn passthrough(
    state: GatewayState,
    ctx: RequestContext,
    headers: HeaderMap,
    raw: Option<String>,
    route: RouteClass,
) -> Response {
    let req = state
        .worker_request(route, Method::GET, &ctx)
        .query(filter_query(raw.as_deref(), route.allowed_params()))
        .forward_headers(&headers);
    finish(&ctx, state.worker.forward(req).await)
}

#[derive(Debug, Deserialize)]
struct AskBody {
    #[serde(default)]
    question: String,
    k: Option<u32>,
}

/// `POST /ask`
///
/// The body goes to the worker untouched. When the worker is unreachable,
/// times out, or answers 404/5xx, the question is run as a plain search and
/// the results are returned with `"mode": "search_only"`.
pub async fn ask(
    State(state): State<GatewayState>,
    ctx: RequestContext,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let parsed: AskBody = serde_json::from_slice(&body).map_err(|_| {
            GatewayError::BadRequest("body must be a JSON object with a 'question' field".into())
        })?;
        let question = parsed.question.trim().to_string();
        if question.is_empty() {
            return Err(GatewayError::BadRequest("'question' must not be empty".into()));
        }
        let k = match parsed.k {
            Some(k) => k_in_range(k).ok_or_else(k_error)?,
            None => DEFAULT_ASK_K,
        };

        let req = state
            .worker_request(RouteClass::Ask, Method::POST, &ctx)
            .forward_headers(&headers)
            .content_type("application/json")
            .body(Body::from(body));

        let failure = match state.worker.send(req).await {
            Ok(resp) if !wants_fallback(resp.status()) => return Ok(worker::relay(resp)),
            Ok(resp) => {
                if resp.status().is_server_error() {
                    metrics::record_upstream_error(RouteClass::Ask.name(), "status");
                }
                worker::upstream_failure(resp).await
            }
            Err(e) => e,
        };

        tracing::warn!(
            request_id = %ctx.request_id,
            error = %failure,
            "Ask unavailable, answering from search"
        );

        match search_only(&state, &ctx, &question, k).await {
            Ok(response) => Ok(response),
            Err(fallback) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    error = %fallback,
                    "Search fallback failed"
                );
                Err(failure)
            }
        }
    }
    .await;
    finish(&ctx, result)
}

fn wants_fallback(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status.is_server_error()
}

async fn search_only(
    state: &GatewayState,
    ctx: &RequestContext,
    question: &str,
    k: u32,
) -> Result<Response, GatewayError> {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("q", question)
        .append_pair("k", &k.to_string())
        .finish();
    let req = state
        .worker_request(RouteClass::Search, Method::GET, ctx)
        .query(Some(query));

    let resp = state.worker.send(req).await?;
    if !resp.status().is_success() {
        return Err(worker::upstream_failure(resp).await);
    }
    let (status, _, bytes) = worker::buffer(resp, SEARCH_RESULTS_LIMIT).await?;
    let results: Value = serde_json::from_slice(&bytes).map_err(|_| GatewayError::UpstreamFailed {
        status: status.as_u16(),
        detail: "search results were not JSON".into(),
    })?;

    Ok(Json(json!({
        "answer": null,
        "mode": "search_only",
        "results": results,
    }))
    .into_response())
}

/// `POST /upload`
///
/// Parts are re-streamed to the worker one chunk at a time. The worker's
/// reply is buffered (it is small) so its `doc_id` can seed the processing
/// trigger. The trigger is spawned once the client response is built and
/// never affects it.
pub async fn upload(
    State(state): State<GatewayState>,
    ctx: RequestContext,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let result = async {
        if let Some(declared) = declared_length(&headers) {
            if declared > state.max_upload_bytes {
                return Err(GatewayError::PayloadTooLarge {
                    limit: state.max_upload_bytes,
                });
            }
        }
        let multipart = multipart.map_err(|rejection| {
            GatewayError::BadRequest(format!("expected multipart/form-data: {}", rejection.body_text()))
        })?;

        let boundary = multipart::new_boundary();
        let (body, mut decode) = multipart::restream(multipart, boundary.clone());
        let req = state
            .worker_request(RouteClass::Upload, Method::POST, &ctx)
            .content_type(&multipart::content_type(&boundary))
            .body(body);

        let sent = state.worker.send(req).await;
        // A form that failed to decode aborted the outbound body; that is the
        // client's fault whatever the worker call returned.
        if let Ok(failure) = decode.try_recv() {
            return Err(rejected_form(failure, state.max_upload_bytes));
        }
        let resp = worker::reject_server_error(sent?).await?;
        let (status, worker_headers, bytes) = worker::buffer(resp, UPLOAD_REPLY_LIMIT).await?;

        let doc_id = if status.is_success() {
            document_id(&bytes)
        } else {
            None
        };
        let response = worker::build_response(status, &worker_headers, Body::from(bytes));

        match doc_id {
            Some(doc_id) => spawn_trigger(&state, &ctx.request_id, doc_id),
            None if status.is_success() => tracing::debug!(
                request_id = %ctx.request_id,
                "Upload reply carried no document id; skipping processing trigger"
            ),
            None => {}
        }
        Ok(response)
    }
    .await;
    finish(&ctx, result)
}

fn rejected_form(failure: DecodeFailure, limit: usize) -> GatewayError {
    if failure.status == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::PayloadTooLarge { limit }
    } else {
        GatewayError::BadRequest(format!("malformed multipart body: {}", failure.message))
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// `doc_id` (or `id`) from a worker upload reply.
fn document_id(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    ["doc_id", "id"].iter().find_map(|key| match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn spawn_trigger(state: &GatewayState, request_id: &str, doc_id: String) {
    let worker = state.worker.clone();
    let timeout = state.trigger_timeout;
    let request_id = request_id.to_string();

    tokio::spawn(async move {
        let payload = json!({ "doc_id": doc_id }).to_string();
        let req = WorkerRequest::new(RouteClass::Upload, Method::POST, timeout, &request_id)
            .path(TRIGGER_PATH)
            .content_type("application/json")
            .body(Body::from(payload));

        let outcome = match worker.send(req).await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(request_id = %request_id, doc_id = %doc_id, "Processing triggered");
                "ok"
            }
            Ok(resp) => {
                tracing::warn!(
                    request_id = %request_id,
                    doc_id = %doc_id,
                    status = resp.status().as_u16(),
                    "Processing trigger rejected by worker"
                );
                "rejected"
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    doc_id = %doc_id,
                    error = %e,
                    "Processing trigger failed"
                );
                e.kind()
            }
        };
        metrics::record_trigger(outcome);
    });
}
