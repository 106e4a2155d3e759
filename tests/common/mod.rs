//! Shared utilities for integration tests: a recording mock worker and a
//! helper that runs the gateway on an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use doc_gateway::config::{AuthMode, GatewayConfig};
use futures_util::{stream, StreamExt};
use doc_gateway::security::RateLimiterRegistry;
use doc_gateway::{GatewayServer, Shutdown};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// How the mock worker answers `POST /ask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskMode {
    Answer,
    NotFound,
    ServerError,
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadedPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Everything the mock worker observed, plus its programmable behaviour.
#[derive(Debug)]
pub struct WorkerState {
    pub seen: Mutex<Vec<SeenRequest>>,
    pub uploads: Mutex<Vec<UploadedPart>>,
    pub processed: Mutex<Vec<String>>,
    pub ask_mode: Mutex<AskMode>,
    pub status_delay: Mutex<Duration>,
    pub fail_status: Mutex<bool>,
    pub fail_process: Mutex<bool>,
    /// Send headers and the start of the body, then never finish.
    pub stall_upload: Mutex<bool>,
    pub stall_export: Mutex<bool>,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            processed: Mutex::new(Vec::new()),
            ask_mode: Mutex::new(AskMode::Answer),
            status_delay: Mutex::new(Duration::ZERO),
            fail_status: Mutex::new(false),
            fail_process: Mutex::new(false),
            stall_upload: Mutex::new(false),
            stall_export: Mutex::new(false),
        }
    }
}

impl WorkerState {
    pub fn seen_for(&self, path: &str) -> Vec<SeenRequest> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn processed(&self) -> Vec<String> {
        self.processed.lock().unwrap().clone()
    }

    /// Poll until the processing trigger has been observed `n` times.
    pub async fn wait_for_processed(&self, n: usize) -> Vec<String> {
        for _ in 0..100 {
            let processed = self.processed();
            if processed.len() >= n {
                return processed;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.processed()
    }
}

pub struct MockWorker {
    pub addr: SocketAddr,
    pub state: Arc<WorkerState>,
}

impl MockWorker {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

async fn record(State(state): State<Arc<WorkerState>>, request: Request, next: Next) -> Response {
    let seen = {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        SeenRequest {
            path: request.uri().path().to_string(),
            query: request.uri().query().map(String::from),
            authorization: header("authorization"),
            request_id: header("x-request-id"),
        }
    };
    state.seen.lock().unwrap().push(seen);
    next.run(request).await
}

/// A body that yields `head` and then stays open forever.
fn stalled_body(head: &'static str) -> Body {
    let first = stream::once(async move { Ok::<_, std::io::Error>(Bytes::from_static(head.as_bytes())) });
    Body::from_stream(first.chain(stream::pending()))
}

async fn worker_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn worker_status(State(state): State<Arc<WorkerState>>) -> Response {
    let delay = *state.status_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if *state.fail_status.lock().unwrap() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "index offline").into_response();
    }
    Json(json!({ "documents": 3, "ready": true })).into_response()
}

async fn worker_upload(State(state): State<Arc<WorkerState>>, mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        let part = UploadedPart {
            name: field.name().unwrap_or_default().to_string(),
            file_name: field.file_name().map(String::from),
            content_type: field.content_type().map(String::from),
            bytes: Vec::new(),
        };
        let bytes = field.bytes().await.unwrap_or_default().to_vec();
        state
            .uploads
            .lock()
            .unwrap()
            .push(UploadedPart { bytes, ..part });
    }
    if *state.stall_upload.lock().unwrap() {
        return ([(header::CONTENT_TYPE, "application/json")], stalled_body("{\"doc_")).into_response();
    }
    let n = state.uploads.lock().unwrap().len();
    Json(json!({ "doc_id": format!("doc-{}", n), "status": "queued" })).into_response()
}

async fn worker_process(State(state): State<Arc<WorkerState>>, Json(body): Json<Value>) -> Response {
    let doc_id = body["doc_id"].as_str().unwrap_or_default().to_string();
    state.processed.lock().unwrap().push(doc_id);
    if *state.fail_process.lock().unwrap() {
        return (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response();
    }
    StatusCode::ACCEPTED.into_response()
}

async fn worker_search(request: Request) -> Json<Value> {
    Json(json!({
        "query": request.uri().query(),
        "results": [{ "doc_id": "doc-1", "score": 0.9 }],
    }))
}

async fn worker_ask(State(state): State<Arc<WorkerState>>, body: Bytes) -> Response {
    match *state.ask_mode.lock().unwrap() {
        AskMode::Answer => {
            let question: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            Json(json!({ "answer": "forty-two", "question": question["question"] })).into_response()
        }
        AskMode::NotFound => StatusCode::NOT_FOUND.into_response(),
        AskMode::ServerError => (StatusCode::BAD_GATEWAY, "llm offline").into_response(),
    }
}

async fn worker_export(State(state): State<Arc<WorkerState>>, request: Request) -> Response {
    if *state.stall_export.lock().unwrap() {
        return (
            [(header::CONTENT_TYPE, "application/x-ndjson")],
            stalled_body("{\"doc_id\":\"doc-1\"}\n"),
        )
            .into_response();
    }
    let body = format!(
        "{{\"doc_id\":\"doc-1\",\"query\":{:?}}}\n{{\"doc_id\":\"doc-2\"}}\n",
        request.uri().query().unwrap_or("")
    );
    ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
}

/// Bytes the mock archive endpoint returns.
pub const ARCHIVE_BYTES: &[u8] = &[0x50, 0x4b, 0x03, 0x04, 0x00, 0xff, 0x10, 0x80];

async fn worker_archive() -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/zip"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"export.zip\""),
        ],
        ARCHIVE_BYTES.to_vec(),
    )
        .into_response()
}

/// Start a mock worker on an ephemeral port.
pub async fn start_mock_worker() -> MockWorker {
    let state = Arc::new(WorkerState::default());
    let app = Router::new()
        .route("/health", get(worker_health))
        .route("/status", get(worker_status))
        .route("/upload", post(worker_upload))
        .route("/process", post(worker_process))
        .route("/search", get(worker_search))
        .route("/ask", post(worker_ask))
        .route("/export", get(worker_export))
        .route("/export/archive", get(worker_archive))
        .layer(middleware::from_fn_with_state(state.clone(), record))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockWorker { addr, state }
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Gateway config pointing at `worker_url` with auth disabled.
pub fn config_for(worker_url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.worker.override_url = Some(worker_url.to_string());
    config.auth.mode = Some(AuthMode::Disabled);
    config.timeouts.trigger_secs = 2;
    config.timeouts.health_probe_secs = 1;
    config
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub limiter: Arc<RateLimiterRegistry>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Run the gateway on an ephemeral port until the returned handle drops.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GatewayServer::new(config).unwrap();
    let limiter = server.limiter();
    let shutdown = Shutdown::new();

    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, &server_shutdown).await;
    });

    TestGateway {
        addr,
        shutdown,
        limiter,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
