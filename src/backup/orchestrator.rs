//! Backup orchestration
//!
//! Drives stanza initialisation, backup creation, listing and restore for
//! the local unit. Every operator request passes the eligibility gate and
//! the repository identity check first; refusals surface verbatim.
//!
//! The orchestrator also holds the primary-only backup agent lease: the
//! agent service runs on the primary while a stanza is claimed and stops
//! when the unit is demoted.

use crate::backup::eligibility::{self, Refusal, UnitFacts};
use crate::backup::repository::RepositoryIdentityChecker;
use crate::backup::s3::S3Settings;
use crate::backup::stanza::{BackupState, ClusterIdentity, StanzaName};
use crate::backup::tool::{
    format_backup_list, is_transient, label_for_backup_id, render_conf, write_atomically,
    BackupTool, StanzaInfo,
};
use crate::backup::workload::Workload;
use crate::cluster::{FailoverCoordinator, ReplicationEngine, Role, RoleChange};
use crate::common::peer::RESTORING_BACKUP_KEY;
use crate::common::{
    AuditEventType, BackupConfig, Leadership, PeerData, Result, RetryPolicy, AUDIT_LOGGER,
};
use crate::unit::state::{BlockSource, UnitState};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

/// External collaborators of the orchestrator
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn ReplicationEngine>,
    pub tool: Arc<dyn BackupTool>,
    pub workload: Arc<dyn Workload>,
    pub s3: Arc<S3Settings>,
}

pub struct BackupOrchestrator {
    stanza: StanzaName,
    unit: Arc<UnitState>,
    coordinator: Arc<FailoverCoordinator>,
    peer: Arc<PeerData>,
    backups: BackupState,
    engine: Arc<dyn ReplicationEngine>,
    tool: Arc<dyn BackupTool>,
    workload: Arc<dyn Workload>,
    s3: Arc<S3Settings>,
    checker: RepositoryIdentityChecker,
    retry: RetryPolicy,
    conf_path: PathBuf,
    data_dir: PathBuf,
    agent_running: AtomicBool,
    operation: Mutex<()>,
}

impl BackupOrchestrator {
    pub fn new(
        identity: &ClusterIdentity,
        unit: Arc<UnitState>,
        coordinator: Arc<FailoverCoordinator>,
        peer: Arc<PeerData>,
        collaborators: Collaborators,
        config: &BackupConfig,
    ) -> Self {
        let stanza = identity.stanza_name();
        let retry = RetryPolicy::exponential(
            config.retry_attempts,
            config.retry_backoff(),
            config.retry_backoff().saturating_mul(4),
        );
        let checker = RepositoryIdentityChecker::new(
            unit.unit(),
            stanza.clone(),
            collaborators.tool.clone(),
            collaborators.workload.clone(),
            collaborators.engine.clone(),
            peer.clone(),
            retry,
        );
        Self {
            backups: BackupState::new(peer.clone()),
            stanza,
            unit,
            coordinator,
            peer,
            engine: collaborators.engine,
            tool: collaborators.tool,
            workload: collaborators.workload,
            s3: collaborators.s3,
            checker,
            retry,
            conf_path: config.conf_path.clone(),
            data_dir: config.data_dir.clone(),
            agent_running: AtomicBool::new(false),
            operation: Mutex::new(()),
        }
    }

    pub fn stanza(&self) -> &StanzaName {
        &self.stanza
    }

    pub fn s3(&self) -> &S3Settings {
        &self.s3
    }

    pub fn agent_running(&self) -> bool {
        self.agent_running.load(Ordering::SeqCst)
    }

    async fn role(&self) -> Role {
        self.coordinator
            .topology()
            .await
            .role_of(self.unit.unit())
            .unwrap_or(Role::Replica)
    }

    async fn member_started(&self) -> bool {
        match self.engine.member_started().await {
            Ok(started) => started,
            Err(e) => {
                tracing::debug!(error = %e, "member state unknown, treating as not started");
                false
            }
        }
    }

    /// Gather the inputs of the eligibility table.
    pub async fn facts(&self) -> UnitFacts {
        UnitFacts {
            blocked: self.unit.is_blocked(),
            role: self.role().await,
            planned_units: self.unit.planned_units(),
            tls_enabled: self.peer.tls_enabled(self.unit.unit()),
            member_started: self.member_started().await,
            stanza_claimed: self.backups.claimed().is_some(),
        }
    }

    pub async fn can_unit_perform_backup(&self) -> std::result::Result<(), Refusal> {
        let facts = self.facts().await;
        eligibility::can_unit_perform_backup(&facts, &self.s3).await
    }

    /// Create the stanza and claim it. A no-op on non-leaders and once the
    /// claim is in place.
    pub async fn initialise_stanza(&self) -> Result<()> {
        if !self.unit.is_leader() {
            tracing::debug!("not the leader, stanza initialisation left to the leader");
            return Ok(());
        }
        if self.backups.is_claimed_by(&self.stanza) {
            tracing::debug!(stanza = %self.stanza, "stanza already initialised");
            return Ok(());
        }

        let created = self
            .retry
            .retry_if(
                "stanza-create",
                || self.tool.stanza_create(&self.stanza),
                is_transient,
            )
            .await;
        if let Err(e) = created {
            tracing::error!(stanza = %self.stanza, error = %e, "stanza creation failed");
            self.unit
                .block(BlockSource::Stanza, Refusal::StanzaCreateFailed.to_string());
            return Err(Refusal::StanzaCreateFailed.into());
        }

        {
            let writer = self.peer.app_writer(&*self.unit)?;
            self.backups.claim(&writer, &self.stanza)?;
        }
        AUDIT_LOGGER.log_event(
            AuditEventType::StanzaClaimed,
            self.unit.unit(),
            Some(self.stanza.to_string()),
            "stanza created and claimed",
        );

        // Archiving needs the claim in place before the check can pass.
        let checked = async {
            self.workload.update_config(false).await?;
            self.retry
                .retry_if("check", || self.tool.check(&self.stanza), is_transient)
                .await
        }
        .await;
        if let Err(e) = checked {
            tracing::warn!(stanza = %self.stanza, error = %e, "stanza check failed");
            {
                let writer = self.peer.app_writer(&*self.unit)?;
                self.backups.clear(&writer)?;
            }
            AUDIT_LOGGER.log_event(
                AuditEventType::StanzaCleared,
                self.unit.unit(),
                Some(self.stanza.to_string()),
                "stanza check failed",
            );
            self.unit
                .block(BlockSource::Stanza, Refusal::StanzaCreateFailed.to_string());
            return Err(Refusal::StanzaCreateFailed.into());
        }

        tracing::info!(stanza = %self.stanza, "stanza initialised");
        Ok(())
    }

    /// React to new or changed S3 credentials.
    ///
    /// Settings, then repository identity, then stanza initialisation. Any
    /// refusal becomes the unit's blocked status.
    pub async fn on_s3_credential_changed(&self) -> Result<()> {
        let params = match self.s3.parameters().await {
            Ok(params) => params,
            Err(refusal) => {
                self.unit.block(BlockSource::S3Settings, refusal.to_string());
                return Err(refusal.into());
            }
        };
        self.unit.unblock(BlockSource::S3Settings);

        if !self.member_started().await {
            tracing::info!("member not started yet, deferring repository setup");
            return Ok(());
        }

        let conf = render_conf(&params, &self.stanza, &self.data_dir);
        write_atomically(&self.conf_path, &conf).await?;

        if let Err(e) = self.checker.can_use_repository(&*self.unit).await {
            self.unit.block(BlockSource::Stanza, e.to_string());
            return Err(e);
        }
        self.initialise_stanza().await?;
        self.unit.unblock(BlockSource::Stanza);

        if self.role().await == Role::Primary {
            self.acquire_agent_lease().await?;
        }
        Ok(())
    }

    /// The S3 integration went away.
    pub async fn on_s3_relation_broken(&self) -> Result<()> {
        self.s3.detach();
        self.unit.unblock(BlockSource::S3Settings);
        self.release_agent_lease().await
    }

    async fn ensure_usable(&self) -> Result<()> {
        self.can_unit_perform_backup().await?;
        self.checker.can_use_repository(&*self.unit).await
    }

    /// Take a full backup of the cluster.
    pub async fn create_backup(&self) -> Result<String> {
        let _operation = self.operation.lock().await;
        self.ensure_usable().await?;

        tracing::info!(stanza = %self.stanza, "starting backup");
        // Not retried: a second attempt would take a second backup.
        let output = self.tool.backup(&self.stanza).await.map_err(|e| {
            tracing::error!(stanza = %self.stanza, error = %e, "backup failed");
            e
        })?;
        tracing::debug!(%output, "backup tool output");
        AUDIT_LOGGER.log_event(
            AuditEventType::BackupCreated,
            self.unit.unit(),
            Some(self.stanza.to_string()),
            "backup created",
        );
        Ok("backup created".to_string())
    }

    async fn stanza_info(&self) -> Result<Vec<StanzaInfo>> {
        self.retry
            .retry_if("info", || self.tool.info(Some(&self.stanza)), is_transient)
            .await?
            .ok_or_else(|| Refusal::RepositoryUnreadable.into())
    }

    /// Table of backups stored for this cluster.
    pub async fn list_backups(&self) -> Result<String> {
        self.s3.are_backup_settings_ok().await?;
        let info = self.stanza_info().await?;
        Ok(format_backup_list(&info, &self.stanza))
    }

    /// Checks run before touching any data, in order.
    pub async fn pre_restore_checks(&self, backup_id: Option<&str>) -> Result<String> {
        let backup_id = backup_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(Refusal::MissingBackupId)?;
        self.s3.are_backup_settings_ok().await?;
        if self.unit.planned_units() > 1 {
            return Err(Refusal::MultipleUnits.into());
        }
        if !self.unit.is_leader() {
            return Err(Refusal::NotLeader.into());
        }
        Ok(backup_id.to_string())
    }

    /// Restore the cluster from `backup_id`.
    pub async fn restore(&self, backup_id: Option<&str>) -> Result<String> {
        let _operation = self.operation.lock().await;
        let backup_id = self.pre_restore_checks(backup_id).await?;

        let info = self.stanza_info().await?;
        let label = label_for_backup_id(&info, &backup_id)
            .ok_or_else(|| Refusal::UnknownBackupId(backup_id.clone()))?
            .to_string();

        tracing::info!(backup_id = %backup_id, label = %label, "restoring backup");
        AUDIT_LOGGER.log_event(
            AuditEventType::RestoreStarted,
            self.unit.unit(),
            Some(self.stanza.to_string()),
            format!("restoring {}", backup_id),
        );

        self.workload.stop_database().await?;
        // The database is down from here on, so every failure blocks the unit.
        if let Err(e) = self.replace_data(&label).await {
            tracing::error!(backup_id = %backup_id, error = %e, "restore failed");
            self.unit.block(BlockSource::Restore, "Failed to restore backup");
            return Err(e);
        }
        self.unit.unblock(BlockSource::Restore);
        Ok("restore started".to_string())
    }

    async fn replace_data(&self, label: &str) -> Result<()> {
        self.workload.empty_data_files().await?;
        {
            let writer = self.peer.app_writer(&*self.unit)?;
            writer.set(RESTORING_BACKUP_KEY, label)?;
        }
        self.tool.restore(&self.stanza, label).await?;
        self.workload.start_database().await?;

        let writer = self.peer.app_writer(&*self.unit)?;
        writer.remove(RESTORING_BACKUP_KEY)
    }

    /// Backup agent lease follows the primary role.
    pub async fn handle_role_change(&self, change: &RoleChange) -> Result<()> {
        let me = self.unit.unit();
        if change.promoted == me {
            self.acquire_agent_lease().await
        } else if change.demoted(me) {
            self.release_agent_lease().await
        } else {
            Ok(())
        }
    }

    async fn acquire_agent_lease(&self) -> Result<()> {
        if !self.s3.is_attached() || !self.backups.is_claimed_by(&self.stanza) {
            tracing::debug!("no repository in use, backup agent stays stopped");
            return Ok(());
        }
        if self.agent_running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.workload.start_backup_agent().await {
            self.agent_running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        tracing::info!(unit = %self.unit.unit(), "backup agent started");
        Ok(())
    }

    async fn release_agent_lease(&self) -> Result<()> {
        if !self.agent_running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.workload.stop_backup_agent().await?;
        tracing::info!(unit = %self.unit.unit(), "backup agent stopped");
        Ok(())
    }

    /// Consume role changes until shutdown.
    pub async fn run_events(
        self: Arc<Self>,
        mut events: broadcast::Receiver<RoleChange>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let received = tokio::select! {
                received = events.recv() => received,
                _ = shutdown.changed() => {
                    tracing::info!("backup event loop stopped");
                    return;
                }
            };
            let outcome = match received {
                Ok(change) => self.handle_role_change(&change).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "missed role changes, resyncing backup agent");
                    match self.role().await {
                        Role::Primary => self.acquire_agent_lease().await,
                        Role::Replica => self.release_agent_lease().await,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };
            if let Err(e) = outcome {
                tracing::error!(error = %e, "backup agent lease update failed");
            }
        }
    }
}
