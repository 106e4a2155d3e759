//! Configuration loading from disk and the environment.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::{AuthMode, GatewayConfig};
use crate::config::validation::ValidationError;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {message}")]
    Env { var: String, message: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML file without applying the environment.
pub fn load_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: GatewayConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Overlay environment variables onto `config`.
///
/// Each setting has a current name and, for some, a legacy name. When both
/// are present the current name wins; a differing legacy value is reported
/// and ignored.
pub fn apply_env<F>(config: &mut GatewayConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(mode) = lookup(&env, "GATEWAY_AUTH_MODE", Some("AUTH_MODE")) {
        let parsed = AuthMode::from_str(&mode.value).map_err(|message| ConfigError::Env {
            var: mode.var.to_string(),
            message,
        })?;
        config.auth.mode = Some(parsed);
    }
    if let Some(token) = lookup(&env, "GATEWAY_API_TOKEN", Some("API_TOKEN")) {
        config.auth.token = token.value;
    }
    if let Some(token) = lookup(&env, "GATEWAY_WORKER_TOKEN", Some("WORKER_TOKEN")) {
        config.worker.token = token.value;
    }
    if let Some(url) = lookup(&env, "GATEWAY_WORKER_URL", Some("WORKER_URL")) {
        config.worker.override_url = Some(url.value);
    }
    if let Some(origins) = lookup(&env, "GATEWAY_CORS_ORIGINS", Some("CORS_ORIGINS")) {
        config.cors.allowed_origins = origins
            .value
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();
    }

    if let Some(v) = lookup(&env, "GATEWAY_RATE_LIMIT_UPLOAD", Some("RATE_LIMIT_UPLOAD")) {
        config.rate_limit.upload_per_minute = parse_number(&v)?;
    }
    if let Some(v) = lookup(&env, "GATEWAY_RATE_LIMIT_ASK", Some("RATE_LIMIT_ASK")) {
        config.rate_limit.ask_per_minute = parse_number(&v)?;
    }
    if let Some(v) = lookup(&env, "GATEWAY_RATE_LIMIT_SEARCH", None) {
        config.rate_limit.search_per_minute = parse_number(&v)?;
    }

    let timeouts = &mut config.timeouts;
    for (var, slot) in [
        ("GATEWAY_TIMEOUT_STATUS", &mut timeouts.status_secs),
        ("GATEWAY_TIMEOUT_SEARCH", &mut timeouts.search_secs),
        ("GATEWAY_TIMEOUT_UPLOAD", &mut timeouts.upload_secs),
        ("GATEWAY_TIMEOUT_ASK", &mut timeouts.ask_secs),
        ("GATEWAY_TIMEOUT_EXPORT", &mut timeouts.export_secs),
    ] {
        if let Some(v) = lookup(&env, var, None) {
            *slot = parse_number(&v)?;
        }
    }

    if let Some(bind) = lookup(&env, "GATEWAY_BIND", None) {
        config.listener.bind_address = bind.value;
    } else if let Some(port) = lookup(&env, "PORT", None) {
        let port: u16 = parse_number(&port)?;
        let mut addr: SocketAddr =
            config
                .listener
                .bind_address
                .parse()
                .map_err(|_| ConfigError::Env {
                    var: "PORT".to_string(),
                    message: format!(
                        "cannot apply port to bind address '{}'",
                        config.listener.bind_address
                    ),
                })?;
        addr.set_port(port);
        config.listener.bind_address = addr.to_string();
    }

    Ok(())
}

struct EnvValue {
    var: &'static str,
    value: String,
}

fn lookup<F>(env: &F, current: &'static str, legacy: Option<&'static str>) -> Option<EnvValue>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &'static str| {
        env(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|value| EnvValue { var: name, value })
    };

    let current_value = read(current);
    let legacy_value = legacy.and_then(read);

    match (current_value, legacy_value) {
        (Some(cur), Some(old)) => {
            if cur.value != old.value {
                tracing::warn!(
                    using = cur.var,
                    ignored = old.var,
                    "Both current and legacy variables set; current name wins"
                );
            }
            Some(cur)
        }
        (Some(cur), None) => Some(cur),
        (None, Some(old)) => {
            tracing::debug!(var = old.var, "Using legacy environment variable");
            Some(old)
        }
        (None, None) => None,
    }
}

fn parse_number<T: FromStr>(v: &EnvValue) -> Result<T, ConfigError> {
    v.value.parse().map_err(|_| ConfigError::Env {
        var: v.var.to_string(),
        message: format!("expected a non-negative integer, got '{}'", v.value),
    })
}
