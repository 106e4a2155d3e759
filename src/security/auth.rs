//! Bearer-token authentication guard.
//!
//! # Decision table (strict mode)
//! ```text
//! no token configured          → Misconfigured (500, fail closed)
//! header absent                → Deny(Missing)
//! header not "Bearer <value>"  → Deny(Missing)
//! value != configured token    → Deny(Invalid)
//! value == configured token    → Allow
//! ```
//! `disabled` and `local` modes allow every request.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::{AuthMode, AuthSection};
use crate::error::GatewayError;
use crate::http::request::request_id_of;
use crate::observability::metrics;

/// Why a credential was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("missing credential")]
    Missing,
    #[error("invalid credential")]
    Invalid,
}

/// Outcome of checking one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny(AuthFailure),
    Misconfigured,
}

/// Effective, immutable authentication settings.
#[derive(Clone)]
pub struct AuthConfig {
    mode: AuthMode,
    token: String,
}

impl AuthConfig {
    pub fn new(mode: AuthMode, token: impl Into<String>) -> Self {
        Self {
            mode,
            token: token.into().trim().to_string(),
        }
    }

    /// Resolve the effective mode.
    ///
    /// An explicit mode always wins. Without one, a configured token implies
    /// `strict` and no token falls back to `disabled`.
    pub fn resolve(section: &AuthSection) -> Self {
        let token = section.token.trim();
        let mode = match section.mode {
            Some(mode) => mode,
            None if !token.is_empty() => AuthMode::Strict,
            None => AuthMode::Disabled,
        };
        Self::new(mode, token)
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Strict mode without a token can never admit anyone.
    pub fn is_misconfigured(&self) -> bool {
        self.mode == AuthMode::Strict && self.token.is_empty()
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("mode", &self.mode)
            .field("token_set", &!self.token.is_empty())
            .finish()
    }
}

/// Validates bearer credentials for protected routes.
#[derive(Debug, Clone)]
pub struct AuthGuard {
    config: AuthConfig,
}

impl AuthGuard {
    pub fn new(config: AuthConfig) -> Self {
        if config.is_misconfigured() {
            tracing::error!("Auth mode is strict but no token is configured; protected routes will answer 500");
        } else if config.mode() == AuthMode::Disabled {
            tracing::warn!("No API token configured; protected routes are open");
        }
        Self { config }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Decide allow/deny from the request headers alone.
    pub fn check(&self, headers: &HeaderMap) -> AuthDecision {
        match self.config.mode {
            AuthMode::Disabled | AuthMode::Local => AuthDecision::Allow,
            AuthMode::Strict => {
                if self.config.token.is_empty() {
                    return AuthDecision::Misconfigured;
                }
                match bearer_token(headers) {
                    None => AuthDecision::Deny(AuthFailure::Missing),
                    Some(presented) => {
                        if bool::from(presented.as_bytes().ct_eq(self.config.token.as_bytes())) {
                            AuthDecision::Allow
                        } else {
                            AuthDecision::Deny(AuthFailure::Invalid)
                        }
                    }
                }
            }
        }
    }
}

/// Extract `<token>` from `Authorization: Bearer <token>`.
///
/// The value must be exactly two space-separated parts with the scheme
/// spelled `Bearer`; anything else counts as no credential.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// Middleware enforcing the guard on the routes it wraps.
pub async fn auth_middleware(
    State(guard): State<Arc<AuthGuard>>,
    request: Request,
    next: Next,
) -> Response {
    match guard.check(request.headers()) {
        AuthDecision::Allow => next.run(request).await,
        AuthDecision::Deny(failure) => {
            let request_id = request_id_of(&request);
            tracing::info!(
                request_id = %request_id,
                path = %request.uri().path(),
                reason = %failure,
                "Authentication rejected"
            );
            metrics::record_auth_denied(match failure {
                AuthFailure::Missing => "missing",
                AuthFailure::Invalid => "invalid",
            });
            GatewayError::Unauthorized(failure).into_response_for(&request_id)
        }
        AuthDecision::Misconfigured => {
            let request_id = request_id_of(&request);
            tracing::error!(
                request_id = %request_id,
                "Rejecting request: strict auth mode without a configured token"
            );
            metrics::record_auth_denied("misconfigured");
            GatewayError::Misconfigured("authentication is required but no token is configured".into())
                .into_response_for(&request_id)
        }
    }
}
