//! Request correlation.
//!
//! # Responsibilities
//! - Accept an inbound `X-Request-Id` or generate a UUID v4
//! - Echo the id on every response
//! - Expose the id to handlers and middleware
//!
//! # Design Decisions
//! - Id assigned by the outermost layer so guards and limiters can log it
//! - The same id is sent to the worker on every outbound call

use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap, HeaderName},
};
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Layer assigning the correlation id on the way in.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer copying the correlation id onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

fn from_parts(extensions: &axum::http::Extensions, headers: &HeaderMap) -> String {
    extensions
        .get::<RequestId>()
        .map(|id| id.header_value())
        .or_else(|| headers.get(X_REQUEST_ID))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Correlation id of a request inside middleware.
pub fn request_id_of(request: &Request) -> String {
    from_parts(request.extensions(), request.headers())
}

/// Per-request context extracted in handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            request_id: from_parts(&parts.extensions, &parts.headers),
        })
    }
}
