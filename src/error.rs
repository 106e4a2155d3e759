//! Client-visible error taxonomy.
//!
//! Every failure the gateway reports is rendered as a JSON body:
//!
//! ```json
//! { "error": { "code": "rate_limited", "message": "rate limit exceeded", "request_id": "..." } }
//! ```
//!
//! Upstream failures add `upstream_status` and a truncated `detail` taken from
//! the worker's body. Worker addresses and credentials never appear here.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::security::auth::AuthFailure;

/// Upper bound on the worker body excerpt copied into an error response.
pub const MAX_DETAIL_BYTES: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed client input.
    #[error("{0}")]
    BadRequest(String),

    /// No gateway route matches the path.
    #[error("no route for {0}")]
    NotFound(String),

    /// Declared upload size above the configured ceiling.
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Missing or invalid client credential.
    #[error("{0}")]
    Unauthorized(AuthFailure),

    /// Quota for the route exhausted.
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// The server cannot make a safe decision with its configuration.
    #[error("server misconfigured: {0}")]
    Misconfigured(String),

    /// Connection to the worker failed. The inner string is for logs only.
    #[error("worker unreachable")]
    UpstreamUnavailable(String),

    /// The worker answered with a failure status.
    #[error("worker returned status {status}")]
    UpstreamFailed { status: u16, detail: String },

    /// The worker did not answer within the route's budget.
    #[error("worker did not respond within {}s", .0.as_secs())]
    UpstreamTimeout(Duration),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::UpstreamUnavailable(_) | GatewayError::UpstreamFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::Unauthorized(AuthFailure::Missing) => "missing_credential",
            GatewayError::Unauthorized(AuthFailure::Invalid) => "invalid_credential",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::Misconfigured(_) => "auth_misconfigured",
            GatewayError::UpstreamUnavailable(_) => "upstream_unavailable",
            GatewayError::UpstreamFailed { .. } => "upstream_error",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::UpstreamUnavailable(_) => "unavailable",
            GatewayError::UpstreamFailed { .. } => "status",
            GatewayError::UpstreamTimeout(_) => "timeout",
            _ => "client",
        }
    }

    /// Render with the correlation id of the failing request.
    pub fn into_response_for(self, request_id: &str) -> Response {
        self.render(Some(request_id))
    }

    fn render(self, request_id: Option<&str>) -> Response {
        let status = self.status();
        let message = match &self {
            // The connect error may name the worker address.
            GatewayError::UpstreamUnavailable(_) => "worker service unreachable".to_string(),
            other => other.to_string(),
        };
        let (upstream_status, detail) = match &self {
            GatewayError::UpstreamFailed { status, detail } => {
                (Some(*status), Some(detail.clone()))
            }
            _ => (None, None),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message,
                request_id,
                upstream_status,
                detail,
            },
        };

        let mut response = (status, Json(body)).into_response();
        match self {
            GatewayError::RateLimited { retry_after_secs } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            }
            GatewayError::Unauthorized(_) => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer"),
                );
            }
            _ => {}
        }
        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.render(None)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// Lossy UTF-8 excerpt of a worker body, cut at a character boundary.
pub fn truncate_detail(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_DETAIL_BYTES {
        return text.into_owned();
    }
    let mut end = MAX_DETAIL_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
