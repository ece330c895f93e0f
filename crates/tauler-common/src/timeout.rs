//! Timeout utilities.
//!
//! The worker never retries. A timed-out future is dropped, which aborts
//! whatever request it was driving.

use std::future::Future;
use std::time::Duration;

use crate::TaulerError;

/// Run an operation with a timeout.
pub async fn with_timeout<T, F, Fut>(timeout: Duration, operation: F) -> Result<T, TaulerError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, operation())
        .await
        .map_err(|_| TaulerError::Timeout(timeout))
}
