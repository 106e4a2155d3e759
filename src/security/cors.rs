//! Cross-origin policy.
//!
//! `Access-Control-Allow-Origin` is emitted only when the request's `Origin`
//! is in the configured allow-list. Every `OPTIONS` request is answered by the
//! CORS layer with `204 No Content` and never reaches a handler or the auth
//! guard.

use std::time::Duration;

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::http::request::X_REQUEST_ID;

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(600);

fn normalize(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Origins from configuration as header values; wildcards and values that are
/// not valid header values are skipped.
pub fn allowed_origins<I, S>(origins: I) -> Vec<HeaderValue>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut allowed = Vec::new();
    for origin in origins {
        let origin = normalize(origin.as_ref());
        if origin.is_empty() {
            continue;
        }
        if origin == "*" {
            tracing::warn!("Wildcard CORS origin is not supported; skipping");
            continue;
        }
        match HeaderValue::from_str(&origin) {
            Ok(value) if !allowed.contains(&value) => allowed.push(value),
            Ok(_) => {}
            Err(_) => tracing::warn!(origin = %origin, "Invalid CORS origin in config; skipping"),
        }
    }
    allowed
}

/// CORS layer for the configured allow-list.
pub fn cors_layer<I, S>(origins: I) -> CorsLayer
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins(origins)))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, X_REQUEST_ID])
        .expose_headers([
            X_REQUEST_ID,
            header::CONTENT_DISPOSITION,
            header::RETRY_AFTER,
        ])
        .allow_credentials(false)
        .max_age(PREFLIGHT_MAX_AGE)
}

/// Preflight answers carry no body; report them as `204 No Content`.
///
/// Must wrap [`cors_layer`], which short-circuits every `OPTIONS` request.
pub async fn preflight_no_content(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}
