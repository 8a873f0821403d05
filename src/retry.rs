//! Retry logic with exponential backoff
//!
//! Used for idempotent requests only (job status polls). Submissions are never
//! retried because a repeated POST would create a second job.
//!
//! # Example
//!
//! ```no_run
//! use mediahook_dl::retry::{IsRetryable, with_retry};
//! use mediahook_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, "example request", || async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, 5xx responses) return `true`.
/// Permanent failures (4xx, malformed responses, disk errors) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Service { transient, .. } => *transient,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            // Everything else is either permanent or a job-level outcome
            _ => false,
        }
    }
}

/// Run `operation`, retrying transient failures with exponential backoff
///
/// `request` names what is being retried (e.g. the job whose status is polled) and
/// is attached to every retry log line. At most `config.max_attempts` retries follow
/// the first attempt; non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    request: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries: u32 = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(request, retries, "request recovered after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if retries >= config.max_attempts {
            tracing::error!(request, error = %err, retries, "giving up on transient failures");
            return Err(err);
        }

        let delay = backoff_delay(config, retries);
        let wait = if config.jitter { add_jitter(delay) } else { delay };
        retries += 1;
        tracing::warn!(
            request,
            error = %err,
            retry = retries,
            max_retries = config.max_attempts,
            wait_ms = wait.as_millis(),
            "transient failure, retrying"
        );
        tokio::time::sleep(wait).await;
    }
}

/// Delay before retry number `retries + 1`: `initial_delay * multiplier^retries`,
/// capped at `max_delay`
fn backoff_delay(config: &RetryConfig, retries: u32) -> Duration {
    let exponent = i32::try_from(retries).unwrap_or(i32::MAX);
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    Duration::try_from_secs_f64(secs)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Add random jitter between 0% and 100% of `delay`
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
