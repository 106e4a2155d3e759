//! Document ingestion gateway.
//!
//! ```text
//!     Client ──▶ request id ─▶ CORS ─▶ auth ─▶ rate limit ─▶ forwarder ──▶ Worker
//!            ◀──────────────── status, headers and body relayed ◀──────────
//! ```
//!
//! Startup order: config file → logging → environment overlay → CLI
//! overrides → validation → metrics → listener. Any failure before the
//! listener binds is fatal.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use doc_gateway::config::{loader, validation::validate_config, ConfigError, GatewayConfig};
use doc_gateway::lifecycle::{spawn_signal_listener, Shutdown};
use doc_gateway::observability::{init_logging, init_metrics};
use doc_gateway::GatewayServer;

#[derive(Parser, Debug)]
#[command(name = "doc-gateway")]
#[command(about = "Authenticating, rate-limiting gateway in front of the document worker", long_about = None)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding config and environment.
    #[arg(long)]
    bind: Option<String>,

    /// Worker base URL, overriding config and environment.
    #[arg(long)]
    worker_url: Option<String>,
}

fn load(args: &Args) -> Result<GatewayConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => loader::load_file(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability);

    loader::apply_env(&mut config, |key| std::env::var(key).ok())?;
    if let Some(bind) = &args.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(url) = &args.worker_url {
        config.worker.override_url = Some(url.clone());
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Configuration rejected");
            return Err(e.into());
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        config_file = ?args.config,
        "doc-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let server = GatewayServer::new(config)?;
    server.run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
