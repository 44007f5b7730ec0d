//! Retry logic for vendor calls and uploads.
//!
//! Vendor APIs and the CleverTap endpoint are retried with a fixed delay
//! until they succeed, the error turns out to be permanent, or the run is
//! cancelled. Every sleep ends early when the cancellation token fires.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts.
    pub delay: Duration,
    /// Maximum retries after the first attempt; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    /// Unbounded retries with a fixed delay.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_retries: None,
        }
    }

    /// Caps the number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Delay honoring a rate-limit hint carried by `error`.
    #[must_use]
    pub fn delay_for(&self, error: &Error) -> Duration {
        match error {
            Error::RateLimit(secs) => Duration::from_secs(*secs).max(self.delay),
            _ => self.delay,
        }
    }

    fn exhausted(&self, retries: u32) -> bool {
        self.max_retries.is_some_and(|max| retries >= max)
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] when the token fires during the sleep.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        () = cancel.cancelled() => Err(Error::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Determines if an error is retryable.
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::RateLimit(_)
        | Error::Io(_)
        | Error::SourceConnection(_)
        | Error::Extraction(_)
        | Error::Upload(_) => true,
        Error::Http(e) => !e.is_builder(),
        _ => false,
    }
}

/// Executes an async operation, retrying retryable failures.
///
/// # Errors
///
/// Returns the first non-retryable error, the last error once the retry
/// budget is spent, or [`Error::Cancelled`].
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match operation().await {
            Ok(result) => {
                if retries > 0 {
                    debug!("{}: Succeeded after {} retries", operation_name, retries);
                }
                return Ok(result);
            }
            Err(e) if is_retryable_error(&e) && !policy.exhausted(retries) => {
                let delay = policy.delay_for(&e);
                warn!(
                    "{}: {} , retrying after {:?} (attempt {})",
                    operation_name,
                    e,
                    delay,
                    retries + 1
                );
                sleep_or_cancel(delay, cancel).await?;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
