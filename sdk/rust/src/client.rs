//! Typed client for the document gateway.

use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The gateway answered with a non-success status.
    #[error("gateway returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl SdkError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SdkError::Status { status, .. } => Some(*status),
            SdkError::Transport(e) => e.status(),
        }
    }

    /// The gateway's machine-readable error code, when the body carries one.
    pub fn code(&self) -> Option<String> {
        match self {
            SdkError::Status { body, .. } => serde_json::from_str::<Value>(body)
                .ok()?
                .pointer("/error/code")?
                .as_str()
                .map(String::from),
            SdkError::Transport(_) => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<u32>,
}

#[derive(Debug, Default, Serialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub worker: Option<WorkerProbe>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerProbe {
    pub reachable: bool,
    #[serde(default)]
    pub status: Option<u16>,
    pub latency_ms: u64,
}

pub struct GatewayClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    request_id: Option<String>,
}

impl GatewayClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            request_id: None,
        }
    }

    /// Send `Authorization: Bearer <token>` on protected calls.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Send a fixed `X-Request-Id` on every call.
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.decorate(self.client.get(format!("{}{}", self.base_url, path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.decorate(self.client.post(format!("{}{}", self.base_url, path)))
    }

    fn decorate(&self, mut builder: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(id) = &self.request_id {
            builder = builder.header("x-request-id", id);
        }
        builder
    }

    pub async fn health(&self) -> Result<HealthReport, SdkError> {
        json(check(self.get("/health").send().await?).await?).await
    }

    /// Liveness plus worker probe. A degraded report is returned, not an error.
    pub async fn health_full(&self) -> Result<HealthReport, SdkError> {
        let resp = self.get("/health/full").send().await?;
        if resp.status() == StatusCode::SERVICE_UNAVAILABLE {
            return json(resp).await;
        }
        json(check(resp).await?).await
    }

    pub async fn status(&self) -> Result<Value, SdkError> {
        json(check(self.get("/status").send().await?).await?).await
    }

    pub async fn search(&self, params: &SearchParams) -> Result<Value, SdkError> {
        let resp = self.get("/search").query(params).send().await?;
        json(check(resp).await?).await
    }

    pub async fn ask(&self, req: &AskRequest) -> Result<Value, SdkError> {
        let resp = self.post("/ask").json(req).send().await?;
        json(check(resp).await?).await
    }

    /// Upload one file as the `file` form field.
    pub async fn upload(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Value, SdkError> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)?;
        let form = multipart::Form::new().part("file", part);
        let resp = self.post("/upload").multipart(form).send().await?;
        json(check(resp).await?).await
    }

    /// Raw export bytes (JSONL, or the archive when `archive` is set).
    pub async fn export(&self, doc_id: Option<&str>, archive: bool) -> Result<Vec<u8>, SdkError> {
        let path = if archive { "/export/archive" } else { "/export" };
        let mut builder = self.get(path);
        if let Some(doc_id) = doc_id {
            builder = builder.query(&[("doc_id", doc_id)]);
        }
        let resp = check(builder.send().await?).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

async fn check(resp: Response) -> Result<Response, SdkError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SdkError::Status { status, body })
}

async fn json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, SdkError> {
    Ok(resp.json().await?)
}
