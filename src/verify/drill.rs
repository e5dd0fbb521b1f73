//! Failover drill
//!
//! Kills a database process on the primary while writes are flowing and
//! checks the cluster heals without losing a write:
//!
//! 1. lower `master_start_timeout` so the outage is acted on quickly
//! 2. locate the primary, start continuous writes, kill the process
//! 3. writes keep flowing across the failover
//! 4. the old primary comes back and a different unit is primary
//! 5. stop writes; the primary holds every acknowledged write
//! 6. the old primary catches up as a replica
//!
//! The original `master_start_timeout` is restored whatever the outcome.

use crate::common::{Error, Result};
use crate::verify::continuity::{WriteContinuityMonitor, CONVERGENCE_TIMEOUT};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Cluster operations the drill needs
#[async_trait]
pub trait ClusterControl: Send + Sync {
    async fn primary(&self) -> Result<String>;

    /// Send SIGKILL to `process` on `unit`
    async fn kill_process(&self, unit: &str, process: &str) -> Result<()>;

    /// Whether the database on `unit` answers health checks
    async fn member_ready(&self, unit: &str) -> Result<bool>;

    async fn master_start_timeout(&self) -> Result<Option<u64>>;

    async fn set_master_start_timeout(&self, seconds: Option<u64>) -> Result<()>;
}

/// The external write workload
#[async_trait]
pub trait ContinuousWrites: Send + Sync {
    async fn start(&self) -> Result<()>;

    /// Stop writing and return the number of acknowledged writes
    async fn stop(&self) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct DrillSettings {
    /// Process to kill on the primary
    pub process: String,
    /// `master_start_timeout` used for the duration of the drill
    pub master_start_timeout: Option<u64>,
    /// Gap between the two continuity samples
    pub continuity_window: Duration,
    pub ready_timeout: Duration,
    pub promotion_timeout: Duration,
    pub catch_up_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DrillSettings {
    fn default() -> Self {
        Self {
            process: "postgres".to_string(),
            master_start_timeout: Some(0),
            continuity_window: Duration::from_secs(15),
            ready_timeout: Duration::from_secs(300),
            promotion_timeout: Duration::from_secs(60),
            catch_up_timeout: CONVERGENCE_TIMEOUT,
            poll_interval: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrillReport {
    pub old_primary: String,
    pub new_primary: String,
    pub total_writes: u64,
}

pub struct FailoverDrill {
    control: Arc<dyn ClusterControl>,
    writes: Arc<dyn ContinuousWrites>,
    monitor: WriteContinuityMonitor,
    settings: DrillSettings,
}

impl FailoverDrill {
    pub fn new(
        control: Arc<dyn ClusterControl>,
        writes: Arc<dyn ContinuousWrites>,
        monitor: WriteContinuityMonitor,
        settings: DrillSettings,
    ) -> Self {
        Self {
            control,
            writes,
            monitor,
            settings,
        }
    }

    pub async fn run(&self) -> Result<DrillReport> {
        let original = self.control.master_start_timeout().await?;
        self.control
            .set_master_start_timeout(self.settings.master_start_timeout)
            .await?;

        let outcome = self.exercise().await;

        if let Err(e) = self.control.set_master_start_timeout(original).await {
            tracing::error!(error = %e, "could not restore master_start_timeout");
            if outcome.is_ok() {
                return Err(e);
            }
        }
        outcome
    }

    async fn exercise(&self) -> Result<DrillReport> {
        let old_primary = self.control.primary().await?;
        tracing::info!(primary = %old_primary, process = %self.settings.process, "starting drill");

        self.writes.start().await?;
        self.control
            .kill_process(&old_primary, &self.settings.process)
            .await?;

        self.monitor
            .assert_continuity(self.settings.continuity_window)
            .await?;

        self.wait_ready(&old_primary).await?;
        let new_primary = self.wait_new_primary(&old_primary).await?;
        tracing::info!(old = %old_primary, new = %new_primary, "primary moved");

        let total_writes = self.writes.stop().await?;
        self.monitor.assert_no_loss(total_writes).await?;
        self.monitor
            .assert_replica_caught_up(&old_primary, total_writes, self.settings.catch_up_timeout)
            .await?;

        Ok(DrillReport {
            old_primary,
            new_primary,
            total_writes,
        })
    }

    async fn wait_ready(&self, unit: &str) -> Result<()> {
        let deadline = Instant::now() + self.settings.ready_timeout;
        loop {
            match self.control.member_ready(unit).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => tracing::debug!(unit, error = %e, "readiness probe failed"),
            }
            if Instant::now() + self.settings.poll_interval > deadline {
                return Err(Error::DrillFailed(format!(
                    "{} not ready after {:?}",
                    unit, self.settings.ready_timeout
                )));
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn wait_new_primary(&self, old_primary: &str) -> Result<String> {
        let deadline = Instant::now() + self.settings.promotion_timeout;
        loop {
            match self.control.primary().await {
                Ok(primary) if primary != old_primary => return Ok(primary),
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "primary lookup failed"),
            }
            if Instant::now() + self.settings.poll_interval > deadline {
                return Err(Error::DrillFailed(format!(
                    "{} is still primary after {:?}",
                    old_primary, self.settings.promotion_timeout
                )));
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}
