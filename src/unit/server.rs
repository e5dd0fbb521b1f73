//! Unit agent
//!
//! Wires the local unit together: peer state, the failover coordinator and
//! its health loop, the backup orchestrator and its role-change consumer,
//! and the action API.

use crate::backup::{
    BackupOrchestrator, BackupState, ClusterIdentity, Collaborators, LocalWorkload, PgBackRest,
    S3Settings,
};
use crate::cluster::{FailoverCoordinator, FailoverSettings, ReplicationEngine, RestEngine};
use crate::common::peer::{FileStore, OPERATOR_PASSWORD_KEY, TLS_KEY};
use crate::common::{
    generate_password, AuditEventType, Config, Error, Leadership, PeerData, Result, AUDIT_LOGGER,
};
use crate::unit::http::{create_router, AgentState};
use crate::unit::state::{BlockSource, UnitState, UnitStatus};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot served by `/status`
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub unit: String,
    pub status: UnitStatus,
    pub leader: bool,
    pub primary: Option<String>,
    pub stanza: Option<String>,
    pub backup_agent_running: bool,
    pub last_failover_failure: Option<String>,
}

pub struct Agent {
    pub unit: Arc<UnitState>,
    pub peer: Arc<PeerData>,
    pub coordinator: Arc<FailoverCoordinator>,
    pub orchestrator: Arc<BackupOrchestrator>,
}

impl Agent {
    /// Build an agent around already constructed collaborators.
    pub fn assemble(config: &Config, peer: Arc<PeerData>, collaborators: Collaborators) -> Self {
        let unit = Arc::new(UnitState::new(&config.unit.name, config.unit.planned_units));
        let coordinator = Arc::new(FailoverCoordinator::new(
            &config.unit.name,
            collaborators.engine.clone(),
            FailoverSettings::from(&config.failover),
        ));
        let identity = ClusterIdentity::new(&config.unit.namespace, config.unit.cluster_name());
        let orchestrator = Arc::new(BackupOrchestrator::new(
            &identity,
            unit.clone(),
            coordinator.clone(),
            peer.clone(),
            collaborators,
            &config.backup,
        ));
        Self {
            unit,
            peer,
            coordinator,
            orchestrator,
        }
    }

    /// Build an agent talking to the real engine, tool and services.
    pub fn from_config(config: &Config) -> Result<Self> {
        let peer = Arc::new(PeerData::open(Arc::new(FileStore::new(
            &config.unit.peer_state_path,
        )))?);
        let engine: Arc<dyn ReplicationEngine> =
            Arc::new(RestEngine::new(config.engine.clone(), &config.unit.name)?);
        let workload = Arc::new(LocalWorkload::new(
            config.workload.clone(),
            &config.backup,
            BackupState::new(peer.clone()),
        ));
        let collaborators = Collaborators {
            engine,
            tool: Arc::new(PgBackRest::new(&config.backup)),
            workload,
            s3: Arc::new(S3Settings::new()),
        };
        Ok(Self::assemble(config, peer, collaborators))
    }

    /// Register the local unit and its peers with the topology.
    pub async fn join_cluster(&self, peers: &[String]) {
        let local = self.unit.unit().to_string();
        for unit in std::iter::once(&local).chain(peers.iter()) {
            let tls = self.peer.tls_enabled(unit);
            self.coordinator.join(unit, tls).await;
        }
    }

    /// Record TLS state of the local unit in its peer bag and the topology.
    pub async fn set_local_tls(&self, enabled: bool) -> Result<()> {
        let value = if enabled { "True" } else { "False" };
        self.peer.unit_set(self.unit.unit(), TLS_KEY, value)?;
        self.coordinator.set_tls(self.unit.unit(), enabled).await
    }

    pub async fn get_primary(&self) -> Result<String> {
        if let Some(primary) = self.coordinator.primary().await {
            return Ok(primary);
        }
        self.coordinator.refresh().await?.ok_or(Error::NoPrimary)
    }

    /// The operator password, generated once by the leader.
    pub fn get_password(&self) -> Result<String> {
        let password = match self.peer.app_get(OPERATOR_PASSWORD_KEY) {
            Some(password) => password,
            None => {
                let writer = self.peer.app_writer(&*self.unit)?;
                let password = generate_password();
                writer.set(OPERATOR_PASSWORD_KEY, &password)?;
                password
            }
        };
        AUDIT_LOGGER.log_event(
            AuditEventType::PasswordRead,
            self.unit.unit(),
            Some(OPERATOR_PASSWORD_KEY.to_string()),
            "operator password read",
        );
        Ok(password)
    }

    /// Surface the most recent failover failure as a block.
    pub fn sync_failover_status(&self) {
        match self.coordinator.last_failure() {
            Some(failure) => self.unit.block(BlockSource::Failover, failure),
            None => self.unit.unblock(BlockSource::Failover),
        }
    }

    pub async fn status(&self) -> AgentStatus {
        self.sync_failover_status();
        AgentStatus {
            unit: self.unit.unit().to_string(),
            status: self.unit.status(),
            leader: self.unit.is_leader(),
            primary: self.coordinator.primary().await,
            stanza: BackupState::new(self.peer.clone()).claimed(),
            backup_agent_running: self.orchestrator.agent_running(),
            last_failover_failure: self.coordinator.last_failure(),
        }
    }

    /// Run the health loop, the backup event loop and the action API until
    /// ctrl-c.
    pub async fn serve(self: Arc<Self>, config: &Config) -> Result<()> {
        tracing::info!("Starting pgwarden agent: {}", self.unit.unit());
        tracing::info!("  Action API: {}", config.unit.bind_addr);
        tracing::info!("  Engine port: {}", config.engine.api_port);
        tracing::info!("  Stanza: {}", self.orchestrator.stanza());

        self.join_cluster(&config.unit.peers).await;
        if let Err(e) = self.coordinator.refresh().await {
            tracing::warn!(error = %e, "initial cluster view unavailable");
        }
        self.unit.set_status(UnitStatus::Active(String::new()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let failover = tokio::spawn(self.coordinator.clone().run(shutdown_rx.clone()));
        let events = tokio::spawn(
            self.orchestrator
                .clone()
                .run_events(self.coordinator.subscribe(), shutdown_rx.clone()),
        );
        let status = tokio::spawn(
            self.clone()
                .status_loop(config.failover.health_interval(), shutdown_rx),
        );

        let listener = tokio::net::TcpListener::bind(config.unit.bind_addr).await?;
        let router = create_router(AgentState { agent: self.clone() });
        tracing::info!("Agent ready");

        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        });
        let served = server.await;

        let _ = shutdown_tx.send(true);
        for task in [failover, events, status] {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "background task panicked");
            }
        }
        served.map_err(Error::from)
    }

    async fn status_loop(
        self: Arc<Self>,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => return,
            }
            self.sync_failover_status();
        }
    }
}
