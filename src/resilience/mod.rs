//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to worker:
//!     → timeouts.rs (enforce the route's budget)
//!     → On expiry: call cancelled, client gets 504
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every worker call has a deadline
//! - No automatic retries: uploads and asks are not idempotent, and a
//!   denied or failed request must not multiply worker load

pub mod timeouts;
