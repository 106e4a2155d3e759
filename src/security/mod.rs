//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (origin allow-list; OPTIONS answered here)
//!     → auth.rs (bearer credential per configured mode)
//!     → rate_limit.rs (per-client, per-route token bucket)
//!     → Pass to handler
//! ```
//!
//! # Design Decisions
//! - Fail closed: strict mode without a token rejects, never opens
//! - Denials are values, not errors; the middleware renders them
//! - No trust in client input

pub mod auth;
pub mod cors;
pub mod rate_limit;

pub use auth::{AuthConfig, AuthGuard};
pub use cors::cors_layer;
pub use rate_limit::{BucketReaper, RateLimiterRegistry};
