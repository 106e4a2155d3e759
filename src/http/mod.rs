//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, global layers, per-route guards)
//!     → request.rs (correlation id in, correlation id out)
//!     → handlers.rs (validate, forward, relay)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod server;

pub use request::{RequestContext, X_REQUEST_ID};
pub use server::{GatewayServer, GatewayState, ServerError};
