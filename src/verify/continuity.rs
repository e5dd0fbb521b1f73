//! Write continuity assertions
//!
//! Used around a failover: writes must keep flowing while the primary is
//! replaced, and once the workload stops every acknowledged write must be
//! readable on the primary and on each replica.

use crate::common::{Error, Result, RetryPolicy};
use crate::verify::oracle::WriteCounter;
use std::sync::Arc;
use std::time::Duration;

/// Poll interval for count convergence
pub const CONVERGENCE_POLL: Duration = Duration::from_secs(3);
/// Budget for count convergence
pub const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct WriteContinuityMonitor {
    counter: Arc<dyn WriteCounter>,
    poll: Duration,
    no_loss_timeout: Duration,
}

impl WriteContinuityMonitor {
    pub fn new(counter: Arc<dyn WriteCounter>) -> Self {
        Self {
            counter,
            poll: CONVERGENCE_POLL,
            no_loss_timeout: CONVERGENCE_TIMEOUT,
        }
    }

    pub fn with_timing(mut self, poll: Duration, no_loss_timeout: Duration) -> Self {
        self.poll = poll;
        self.no_loss_timeout = no_loss_timeout;
        self
    }

    /// Two samples `window` apart; the second must be strictly larger.
    pub async fn assert_continuity(&self, window: Duration) -> Result<u64> {
        let before = self.counter.count(None).await?;
        tokio::time::sleep(window).await;
        let after = self.counter.count(None).await?;
        if after <= before {
            return Err(Error::WritesStalled { before, after });
        }
        tracing::info!(before, after, "writes continuing");
        Ok(after)
    }

    /// Wait for the primary to hold exactly `expected_total` writes.
    pub async fn assert_no_loss(&self, expected_total: u64) -> Result<()> {
        self.converge(None, expected_total, self.no_loss_timeout)
            .await
            .map_err(|actual| Error::WritesLost {
                expected: expected_total,
                actual,
            })
    }

    /// Wait for `member` to hold exactly `expected_total` writes.
    pub async fn assert_replica_caught_up(
        &self,
        member: &str,
        expected_total: u64,
        timeout: Duration,
    ) -> Result<()> {
        self.converge(Some(member), expected_total, timeout)
            .await
            .map_err(|actual| Error::ReplicaStale {
                member: member.to_string(),
                expected: expected_total,
                actual,
            })
    }

    /// Poll until the count matches. On failure returns the last count
    /// read, `None` if no read succeeded.
    async fn converge(
        &self,
        member: Option<&str>,
        expected: u64,
        timeout: Duration,
    ) -> std::result::Result<(), Option<u64>> {
        let last = std::sync::Mutex::new(None);
        let last_seen = &last;
        let policy = RetryPolicy::fixed(self.poll, timeout);
        let outcome = policy
            .retry_if(
                "write count",
                move || async move {
                    let actual = self.counter.count(member).await?;
                    *last_seen.lock().unwrap_or_else(|e| e.into_inner()) = Some(actual);
                    if actual == expected {
                        Ok(())
                    } else {
                        Err(Error::WritesLost {
                            expected,
                            actual: Some(actual),
                        })
                    }
                },
                // Keep polling through mismatches and connection trouble alike.
                |_| true,
            )
            .await;
        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(member = ?member, expected, error = %e, "write count did not converge");
                Err(*last.lock().unwrap_or_else(|e| e.into_inner()))
            }
        }
    }
}
