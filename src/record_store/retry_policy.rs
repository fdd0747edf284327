//! Retry policy for remote record store calls.
//!
//! Implements exponential backoff with a per-attempt timeout.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::{RemoteError, RemoteErrorKind};
use crate::config::SyncSettings;
use crate::metrics;
use crate::tracking::TrackingError;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
    /// Time allowed for a single attempt before it counts as a timeout.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Create a new RetryPolicy from configuration settings.
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            backoff_multiplier: settings.backoff_multiplier,
            attempt_timeout: Duration::from_millis(settings.attempt_timeout_ms),
        }
    }

    /// Backoff to wait before retry number `retry_count` (0-based).
    ///
    /// `initial_backoff * multiplier^retry_count`, capped at `max_backoff`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let backoff_ms = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(retry_count as i32);
        let capped_ms = backoff_ms.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Returns true if the error type is retryable and the budget is not exhausted.
    pub fn should_retry(&self, error: &RemoteError, retry_count: u32) -> bool {
        error.is_retryable() && retry_count < self.max_retries
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is exhausted. Returns the number of attempts on success.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<(T, u32), TrackingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut retry_count = 0;
        loop {
            let result = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::new(
                    RemoteErrorKind::Timeout,
                    format!(
                        "{} did not complete within {}ms",
                        operation,
                        self.attempt_timeout.as_millis()
                    ),
                )),
            };

            let err = match result {
                Ok(value) => {
                    if retry_count > 0 {
                        debug!("{} succeeded after {} retries", operation, retry_count);
                    }
                    return Ok((value, retry_count + 1));
                }
                Err(err) => err,
            };

            match TrackingError::from_remote(err) {
                TrackingError::TransientRemote(err) if self.should_retry(&err, retry_count) => {
                    let delay = self.backoff(retry_count);
                    warn!(
                        "{} failed ({}), retry {}/{} in {}ms",
                        operation,
                        err,
                        retry_count + 1,
                        self.max_retries,
                        delay.as_millis()
                    );
                    metrics::REMOTE_RETRIES_TOTAL
                        .with_label_values(&[operation])
                        .inc();
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                TrackingError::TransientRemote(source)
                | TrackingError::TerminalRemote { source, .. } => {
                    warn!(
                        "{} failed permanently after {} attempt(s): {}",
                        operation,
                        retry_count + 1,
                        source
                    );
                    return Err(TrackingError::TerminalRemote {
                        attempts: retry_count + 1,
                        source,
                    });
                }
                other => return Err(other),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&SyncSettings::default())
    }
}
