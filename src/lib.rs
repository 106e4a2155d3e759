//! Document ingestion gateway library.
//!
//! Public front door for a document worker: authenticates callers,
//! rate-limits expensive routes, and forwards everything else to the worker
//! with a correlation id attached.

pub mod config;
pub mod error;
pub mod forwarder;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
