//! Exponential backoff around network calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::TransferError;

/// Classifies an error as worth repeating.
pub trait Retryable {
    /// Returns `true` if repeating the same request may succeed.
    fn is_retryable(&self) -> bool;
}

impl Retryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::Transport(_) => true,
            TransferError::Store { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry `attempt` (1-based): `min(initial * 2^(attempt-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Runs `f` until it succeeds, fails with a non-retryable error, or
    /// the retry budget is spent.
    pub async fn run<T, E, F, Fut>(&self, op: &str, f: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(op, f, E::is_retryable).await
    }

    /// Like [`run`](Self::run), but a cancelled `cancel` cuts any pending
    /// backoff short and returns the last error.
    pub async fn run_cancellable<T, E, F, Fut>(
        &self,
        op: &str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.retry_loop(op, f, E::is_retryable, Some(cancel)).await
    }

    /// Like [`run`](Self::run) with a caller-supplied classification.
    pub async fn run_if<T, E, F, Fut, P>(&self, op: &str, f: F, should_retry: P) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        self.retry_loop(op, f, should_retry, None).await
    }

    async fn retry_loop<T, E, F, Fut, P>(
        &self,
        op: &str,
        mut f: F,
        should_retry: P,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut retries: u32 = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(op, retries, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if retries < self.max_retries && should_retry(&e) => {
                    retries += 1;
                    let delay = self.delay_for_attempt(retries);
                    warn!(
                        op,
                        attempt = retries,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying"
                    );
                    match cancel {
                        Some(cancel) => tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => {
                                debug!(op, "cancelled during backoff");
                                return Err(e);
                            }
                        },
                        None => tokio::time::sleep(delay).await,
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
