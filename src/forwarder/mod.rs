//! Forwarding to the worker service.
//!
//! # Data Flow
//! ```text
//! handler
//!     → query.rs (allow-listed parameters only)
//!     → multipart.rs (uploads: re-stream parts, one chunk at a time)
//!     → worker.rs (build request, attach X-Request-Id + worker credential,
//!                  enforce deadline, relay response)
//! ```

pub mod multipart;
pub mod query;
pub mod worker;

pub use worker::{resolve_worker_base, WorkerClient, WorkerRequest, WorkerResponse};
