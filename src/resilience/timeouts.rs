//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap worker calls with the route's budget
//! - Cancel the call cleanly when the budget runs out
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; dropping the future cancels the call
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout

use std::future::Future;
use std::time::Duration;

/// The budget ran out before the future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline of {budget:?} elapsed")]
pub struct DeadlineElapsed {
    budget: Duration,
}

impl DeadlineElapsed {
    pub fn budget(&self) -> Duration {
        self.budget
    }
}

/// Run `future` with `budget`.
pub async fn with_deadline<F, T>(budget: Duration, future: F) -> Result<T, DeadlineElapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(budget, future)
        .await
        .map_err(|_| DeadlineElapsed { budget })
}
