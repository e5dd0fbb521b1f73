//! Primary loss detection and promotion tracking
//!
//! The coordinator owns the [`ClusterTopology`]. A health loop probes every
//! member through the replication engine; once the primary has been
//! unresponsive for longer than `master_start_timeout`, the coordinator
//! checks quorum and then waits for the engine's own election to settle:
//! every reachable member must report the same new leader before the
//! deadline. Only then is the topology updated and a [`RoleChange`]
//! broadcast.
//!
//! Failures are fail-safe. Without quorum nothing is touched
//! (`QuorumUnavailable`); without convergence the outage is reported as
//! `PromotionTimedOut` and not retried for the same outage.

use crate::cluster::engine::ReplicationEngine;
use crate::cluster::topology::{ClusterTopology, Health, RoleChange};
use crate::common::{AuditEventType, Error, FailoverConfig, Result, AUDIT_LOGGER};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverSettings {
    pub master_start_timeout: Duration,
    pub promotion_timeout: Duration,
    pub poll_interval: Duration,
    pub health_interval: Duration,
}

impl From<&FailoverConfig> for FailoverSettings {
    fn from(cfg: &FailoverConfig) -> Self {
        Self {
            master_start_timeout: cfg.master_start_timeout(),
            promotion_timeout: cfg.promotion_timeout(),
            poll_interval: cfg.poll_interval(),
            health_interval: cfg.health_interval(),
        }
    }
}

/// An ongoing primary outage. The threshold is captured when the outage is
/// first seen, so a new `master_start_timeout` applies from the next outage.
#[derive(Debug, Clone)]
struct Outage {
    primary: String,
    since: Instant,
    threshold: Duration,
    handled: bool,
}

pub struct FailoverCoordinator {
    local_unit: String,
    engine: Arc<dyn ReplicationEngine>,
    topology: RwLock<ClusterTopology>,
    settings: Mutex<FailoverSettings>,
    default_master_start_timeout: Duration,
    outage: Mutex<Option<Outage>>,
    last_failure: Mutex<Option<String>>,
    decision: tokio::sync::Mutex<()>,
    events: broadcast::Sender<RoleChange>,
}

impl FailoverCoordinator {
    pub fn new(
        local_unit: impl Into<String>,
        engine: Arc<dyn ReplicationEngine>,
        settings: FailoverSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            local_unit: local_unit.into(),
            engine,
            topology: RwLock::new(ClusterTopology::new()),
            default_master_start_timeout: settings.master_start_timeout,
            settings: Mutex::new(settings),
            outage: Mutex::new(None),
            last_failure: Mutex::new(None),
            decision: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoleChange> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> FailoverSettings {
        *self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn topology(&self) -> ClusterTopology {
        self.topology.read().await.clone()
    }

    pub async fn join(&self, unit: &str, tls_enabled: bool) {
        self.topology.write().await.join(unit, tls_enabled);
    }

    pub async fn leave(&self, unit: &str) {
        if let Some(member) = self.topology.write().await.remove(unit) {
            tracing::info!(unit, role = %member.role, "member removed from topology");
        }
    }

    pub async fn set_tls(&self, unit: &str, enabled: bool) -> Result<()> {
        self.topology.write().await.set_tls(unit, enabled)
    }

    pub async fn primary(&self) -> Option<String> {
        self.topology.read().await.primary().map(|m| m.unit.clone())
    }

    /// Last failover failure that is still unresolved
    pub fn last_failure(&self) -> Option<String> {
        self.last_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Value currently configured on the engine, `None` for its default
    pub async fn master_start_timeout(&self) -> Result<Option<u64>> {
        self.engine.master_start_timeout().await
    }

    /// Change `master_start_timeout` on the engine. Takes effect for the
    /// next outage; an outage already being timed keeps its threshold.
    pub async fn set_master_start_timeout(&self, seconds: Option<u64>) -> Result<()> {
        self.engine.set_master_start_timeout(seconds).await?;
        let timeout = seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_master_start_timeout);
        self.settings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .master_start_timeout = timeout;
        AUDIT_LOGGER.log_event(
            AuditEventType::ConfigChanged,
            self.local_unit.clone(),
            None,
            format!("master_start_timeout set to {:?}", seconds),
        );
        Ok(())
    }

    /// Align the topology with the leader the local member reports.
    pub async fn refresh(&self) -> Result<Option<String>> {
        let _decision = self.decision.lock().await;
        let status = self.engine.cluster_status(&self.local_unit).await?;
        let Some(leader) = status.leader() else {
            return Ok(self.primary().await);
        };
        let change = {
            let mut topo = self.topology.write().await;
            if topo.member(&leader).is_none() {
                return Err(Error::UnknownMember(leader));
            }
            topo.set_health(&leader, Health::Running)?;
            topo.promote(&leader)?
        };
        if let Some(change) = change {
            self.publish(change);
        }
        Ok(Some(leader))
    }

    /// Probe every member once and feed the outage tracker.
    ///
    /// Returns `true` when the primary has just crossed its
    /// `master_start_timeout` and a failover decision is due.
    pub async fn probe(&self) -> bool {
        let units: Vec<String> = {
            let topo = self.topology.read().await;
            topo.members().iter().map(|m| m.unit.clone()).collect()
        };

        let mut observed = Vec::with_capacity(units.len());
        for unit in units {
            let healthy = match self.engine.member_healthy(&unit).await {
                Ok(healthy) => healthy,
                Err(e) => {
                    tracing::debug!(unit = %unit, error = %e, "health probe error");
                    false
                }
            };
            observed.push((unit, healthy));
        }

        let primary = {
            let mut topo = self.topology.write().await;
            for (unit, healthy) in &observed {
                let health = if *healthy {
                    Health::Running
                } else {
                    Health::Unresponsive
                };
                // The member may have left while we were probing.
                let _ = topo.set_health(unit, health);
            }
            topo.primary().map(|m| (m.unit.clone(), m.health.is_reachable()))
        };

        match primary {
            Some((unit, reachable)) => self.track_outage(&unit, reachable, Instant::now()),
            None => false,
        }
    }

    fn track_outage(&self, primary: &str, reachable: bool, now: Instant) -> bool {
        let mut outage = self.outage.lock().unwrap_or_else(|e| e.into_inner());
        if reachable {
            if outage.take().is_some() {
                tracing::info!(primary, "primary responsive again");
            }
            return false;
        }

        if !matches!(outage.as_ref(), Some(o) if o.primary == primary) {
            let threshold = self.settings().master_start_timeout;
            tracing::warn!(primary, ?threshold, "primary unresponsive");
            *outage = Some(Outage {
                primary: primary.to_string(),
                since: now,
                threshold,
                handled: false,
            });
        }
        let Some(current) = outage.as_mut() else {
            return false;
        };

        if !current.handled && now.duration_since(current.since) > current.threshold {
            current.handled = true;
            return true;
        }
        false
    }

    /// Decide on a failover after the primary went unresponsive.
    ///
    /// Waits until `deadline` for every reachable member to agree on one new
    /// leader elected by the replication engine.
    pub async fn on_primary_unresponsive(&self, deadline: Instant) -> Result<RoleChange> {
        let _decision = self.decision.lock().await;
        let settings = self.settings();
        let started = Instant::now();

        let (old_primary, voters) = {
            let topo = self.topology.read().await;
            let reachable = topo.reachable().count();
            let required = topo.quorum();
            if reachable < required {
                let err = Error::QuorumUnavailable {
                    reachable,
                    required,
                };
                tracing::warn!(error = %err, "not promoting");
                self.record_failure(&err);
                return Err(err);
            }
            let old = topo.primary().map(|m| m.unit.clone());
            let voters: Vec<String> = topo
                .reachable()
                .filter(|m| Some(&m.unit) != old.as_ref())
                .map(|m| m.unit.clone())
                .collect();
            (old, voters)
        };

        tracing::info!(
            old_primary = ?old_primary,
            voters = ?voters,
            "waiting for replication engine to elect a new primary"
        );

        loop {
            if let Some(leader) = self.converged_leader(&voters, old_primary.as_deref()).await {
                let change = self.topology.write().await.promote(&leader)?;
                let change = change.ok_or_else(|| {
                    Error::Internal(format!("{} was already primary after failover", leader))
                })?;
                tracing::info!(
                    new_primary = %change.promoted,
                    elapsed = ?started.elapsed(),
                    "failover complete"
                );
                self.last_failure
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take();
                self.publish(change.clone());
                return Ok(change);
            }

            if Instant::now() + settings.poll_interval > deadline {
                let err = Error::PromotionTimedOut(started.elapsed());
                tracing::error!(error = %err, "members did not converge on a new primary");
                self.record_failure(&err);
                return Err(err);
            }
            tokio::time::sleep(settings.poll_interval).await;
        }
    }

    /// The leader all `voters` agree on, if any, excluding `old_primary`.
    async fn converged_leader(&self, voters: &[String], old_primary: Option<&str>) -> Option<String> {
        let mut agreed: Option<String> = None;
        for voter in voters {
            let leader = match self.engine.cluster_status(voter).await {
                Ok(status) => status.leader()?,
                Err(e) => {
                    tracing::debug!(voter = %voter, error = %e, "cluster view unavailable");
                    return None;
                }
            };
            match &agreed {
                Some(existing) if *existing != leader => return None,
                _ => agreed = Some(leader),
            }
        }
        agreed.filter(|leader| Some(leader.as_str()) != old_primary && voters.contains(leader))
    }

    fn record_failure(&self, err: &Error) {
        *self.last_failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(err.to_string());
    }

    fn publish(&self, change: RoleChange) {
        AUDIT_LOGGER.log_event(
            AuditEventType::RoleChanged,
            self.local_unit.clone(),
            Some(change.promoted.clone()),
            format!(
                "primary changed from {:?} to {} (term {})",
                change.previous, change.promoted, change.term
            ),
        );
        // No subscribers is fine.
        let _ = self.events.send(change);
    }

    /// Health loop: probe, and run a failover decision when one is due.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let interval = self.settings().health_interval;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    tracing::info!("failover loop stopped");
                    return;
                }
            }

            if self.probe().await {
                let deadline = Instant::now() + self.settings().promotion_timeout;
                if let Err(e) = self.on_primary_unresponsive(deadline).await {
                    tracing::error!(error = %e, "failover decision failed");
                }
            }
        }
    }
}
