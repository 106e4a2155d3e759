//! Configuration validation.
//!
//! Serde handles syntax; this module checks semantics. Every problem is
//! collected so a bad deployment is fixed in one pass.

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a socket address")]
    BindAddress(String),

    #[error("worker URL '{0}' is not a valid http:// URL")]
    WorkerUrl(String),

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("rate_limit.{0} must be greater than zero")]
    ZeroReaper(&'static str),

    #[error("listener.max_upload_bytes must be greater than zero")]
    ZeroUploadLimit,

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),
}

/// Validate a loaded configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.max_upload_bytes == 0 {
        errors.push(ValidationError::ZeroUploadLimit);
    }

    for candidate in [&config.worker.override_url, &config.worker.base_url]
        .into_iter()
        .flatten()
    {
        if !is_http_url(candidate) {
            errors.push(ValidationError::WorkerUrl(candidate.clone()));
        }
    }

    let t = &config.timeouts;
    for (name, secs) in [
        ("status_secs", t.status_secs),
        ("search_secs", t.search_secs),
        ("upload_secs", t.upload_secs),
        ("ask_secs", t.ask_secs),
        ("export_secs", t.export_secs),
        ("trigger_secs", t.trigger_secs),
        ("health_probe_secs", t.health_probe_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    if config.rate_limit.reaper_interval_secs == 0 {
        errors.push(ValidationError::ZeroReaper("reaper_interval_secs"));
    }
    if config.rate_limit.idle_multiple == 0 {
        errors.push(ValidationError::ZeroReaper("idle_multiple"));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_http_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|u| u.scheme() == "http" && u.host().is_some())
        .unwrap_or(false)
}
