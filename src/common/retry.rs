//! Retry policies for transient I/O
//!
//! A policy stops either after a number of attempts or once a deadline has
//! elapsed since the first attempt, and waits a fixed or exponentially
//! growing delay between attempts. Only errors classified as transient are
//! retried by [`RetryPolicy::retry`]; everything else is returned at once.

use crate::common::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// When to give up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    Attempts(usize),
    Deadline(Duration),
}

/// How long to wait between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub stop: Stop,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed wait, give up once `deadline` has elapsed.
    pub fn fixed(wait: Duration, deadline: Duration) -> Self {
        Self {
            stop: Stop::Deadline(deadline),
            backoff: Backoff::Fixed(wait),
        }
    }

    /// Exponential backoff capped at `max`, give up after `attempts` tries.
    pub fn exponential(attempts: usize, initial: Duration, max: Duration) -> Self {
        Self {
            stop: Stop::Attempts(attempts.max(1)),
            backoff: Backoff::Exponential { initial, max },
        }
    }

    /// Delay before attempt number `attempt + 1` (zero-based `attempt`)
    pub fn delay_for(&self, attempt: usize) -> Duration {
        match self.backoff {
            Backoff::Fixed(wait) => wait,
            Backoff::Exponential { initial, max } => {
                let factor = 1u32.checked_shl(attempt.min(31) as u32).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }

    fn exhausted(&self, attempts_made: usize, started: Instant, next_delay: Duration) -> bool {
        match self.stop {
            Stop::Attempts(max) => attempts_made >= max,
            Stop::Deadline(deadline) => started.elapsed() + next_delay > deadline,
        }
    }

    /// Run `f` until it succeeds, a non-retryable error occurs, or the
    /// policy is exhausted.
    pub async fn retry<F, Fut, T>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry_if(operation, f, Error::is_retryable).await
    }

    /// Like [`retry`](Self::retry) with a caller-supplied transient check.
    pub async fn retry_if<F, Fut, T, P>(&self, operation: &str, mut f: F, transient: P) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Error) -> bool,
    {
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    attempt += 1;
                    if !transient(&e) || self.exhausted(attempt, started, delay) {
                        return Err(e);
                    }
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %e,
                        "retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
