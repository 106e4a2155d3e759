//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files, and
//! every section has defaults so an empty file (or no file) is a valid config.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, upload ceiling).
    pub listener: ListenerConfig,

    /// Worker service location and credential.
    pub worker: WorkerConfig,

    /// Client-facing authentication.
    pub auth: AuthSection,

    /// Per-route rate limits and reaper tuning.
    pub rate_limit: RateLimitConfig,

    /// Per-route outbound timeout budgets.
    pub timeouts: TimeoutConfig,

    /// Cross-origin policy.
    pub cors: CorsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Largest accepted upload body in bytes.
    pub max_upload_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Worker service configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WorkerConfig {
    /// Configured default base URL (e.g., "http://worker:8000").
    pub base_url: Option<String>,

    /// Credential the gateway presents to the worker. Never sent to clients.
    pub token: String,

    /// Explicit override from the environment or command line.
    /// Takes precedence over `base_url`.
    #[serde(skip)]
    pub override_url: Option<String>,
}

/// Authentication posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No token configured and no explicit mode: open access.
    Disabled,
    /// Single-user deployment: every request passes.
    Local,
    /// Bearer token mandatory on protected routes.
    Strict,
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" | "none" => Ok(AuthMode::Disabled),
            "local" => Ok(AuthMode::Local),
            "strict" => Ok(AuthMode::Strict),
            other => Err(format!("unknown auth mode '{}'", other)),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthMode::Disabled => "disabled",
            AuthMode::Local => "local",
            AuthMode::Strict => "strict",
        };
        f.write_str(s)
    }
}

/// Client-facing authentication settings as written in config.
///
/// `mode` stays `None` unless set explicitly; the effective mode is
/// resolved by [`crate::security::auth::AuthConfig::resolve`].
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthSection {
    pub mode: Option<AuthMode>,
    pub token: String,
}

/// Rate limiting configuration. Capacities are tokens per minute;
/// zero means the route is not limited.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub upload_per_minute: u32,
    pub ask_per_minute: u32,
    pub search_per_minute: u32,

    /// How often the reaper scans for idle buckets.
    pub reaper_interval_secs: u64,

    /// A full bucket idle for `idle_multiple * reaper_interval_secs` is evicted.
    pub idle_multiple: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            upload_per_minute: 10,
            ask_per_minute: 30,
            search_per_minute: 0,
            reaper_interval_secs: 180,
            idle_multiple: 3,
        }
    }
}

/// Timeout budgets for outbound worker calls, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub status_secs: u64,
    pub search_secs: u64,
    pub upload_secs: u64,
    pub ask_secs: u64,
    pub export_secs: u64,

    /// Budget for the post-upload processing trigger.
    pub trigger_secs: u64,

    /// Budget for the worker probe behind `/health/full`.
    pub health_probe_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            status_secs: 10,
            search_secs: 30,
            upload_secs: 120,
            ask_secs: 120,
            export_secs: 300,
            trigger_secs: 30,
            health_probe_secs: 3,
        }
    }
}

/// Cross-origin configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Exact origins (scheme://host[:port]) allowed to call the gateway
    /// from a browser.
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub log_level: String,

    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
