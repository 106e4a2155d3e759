//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request
//!     → axum Router (path + method match)
//!     → classes.rs (RouteClass: limiter scope, timeout budget, worker path,
//!                   query allow-list)
//!
//! Classification (at startup):
//!     RateLimitConfig + TimeoutConfig
//!     → RouteClassification
//!     → Freeze, shared via Arc
//! ```
//!
//! # Design Decisions
//! - Classification is static and immutable at runtime
//! - A route with no configured capacity is unlimited
//! - Each route names the exact worker path and query parameters it may reach

pub mod classes;

pub use classes::{RouteClass, RouteClassification};
