//! Repository identity
//!
//! Several clusters may point at the same bucket and path. Before a unit
//! relies on the repository it lists the stanzas stored there and compares
//! them with its own [`StanzaName`]. A foreign stanza is tolerated on
//! non-leaders; the application leader treats it as a conflict, drops the
//! local claim and reloads the database configuration so archiving stops.

use crate::backup::eligibility::Refusal;
use crate::backup::stanza::{BackupState, StanzaName};
use crate::backup::tool::{is_transient, BackupTool, StanzaInfo};
use crate::backup::workload::Workload;
use crate::cluster::ReplicationEngine;
use crate::common::{AuditEventType, Leadership, PeerData, Result, RetryPolicy, AUDIT_LOGGER};
use std::sync::Arc;

/// Who is asking: only the application leader may reconcile peer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Leader,
    NonLeader,
}

impl Authority {
    pub fn of(leadership: &dyn Leadership) -> Self {
        if leadership.is_leader() {
            Authority::Leader
        } else {
            Authority::NonLeader
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Only the local stanza (or nothing) is stored
    Usable,
    /// A foreign stanza is present but this unit may not reconcile
    ForeignTolerated { foreign: String },
    /// A foreign stanza is present and the leader must give up its claim
    Conflict { foreign: String },
}

/// Decide from a readable listing.
pub fn verdict(entries: &[StanzaInfo], local: &StanzaName, authority: Authority) -> Verdict {
    match entries.iter().find(|e| e.name != local.as_str()) {
        None => Verdict::Usable,
        Some(entry) => match authority {
            Authority::Leader => Verdict::Conflict {
                foreign: entry.name.clone(),
            },
            Authority::NonLeader => Verdict::ForeignTolerated {
                foreign: entry.name.clone(),
            },
        },
    }
}

pub struct RepositoryIdentityChecker {
    unit: String,
    stanza: StanzaName,
    tool: Arc<dyn BackupTool>,
    workload: Arc<dyn Workload>,
    engine: Arc<dyn ReplicationEngine>,
    peer: Arc<PeerData>,
    retry: RetryPolicy,
}

impl RepositoryIdentityChecker {
    pub fn new(
        unit: impl Into<String>,
        stanza: StanzaName,
        tool: Arc<dyn BackupTool>,
        workload: Arc<dyn Workload>,
        engine: Arc<dyn ReplicationEngine>,
        peer: Arc<PeerData>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            unit: unit.into(),
            stanza,
            tool,
            workload,
            engine,
            peer,
            retry,
        }
    }

    /// Read the repository listing, retrying transient failures.
    ///
    /// Exhausted retries and unparseable output both map to
    /// [`Refusal::RepositoryUnreadable`]; they are logged differently.
    pub async fn read_identity(&self) -> Result<Vec<StanzaInfo>> {
        let listing = self
            .retry
            .retry_if("repository info", || self.tool.info(None), is_transient)
            .await;
        match listing {
            Ok(Some(entries)) => Ok(entries),
            Ok(None) => {
                tracing::warn!(stanza = %self.stanza, "repository info returned no data");
                Err(Refusal::RepositoryUnreadable.into())
            }
            Err(e) => {
                tracing::warn!(stanza = %self.stanza, error = %e, "repository info failed");
                Err(Refusal::RepositoryUnreadable.into())
            }
        }
    }

    /// Whether this unit may use the configured repository.
    pub async fn can_use_repository(&self, leadership: &dyn Leadership) -> Result<()> {
        let entries = self.read_identity().await?;
        match verdict(&entries, &self.stanza, Authority::of(leadership)) {
            Verdict::Usable => Ok(()),
            Verdict::ForeignTolerated { foreign } => {
                tracing::info!(
                    stanza = %self.stanza,
                    foreign = %foreign,
                    "repository holds another cluster's stanza, leaving reconciliation to the leader"
                );
                Ok(())
            }
            Verdict::Conflict { foreign } => {
                self.release_claim(leadership, &foreign).await?;
                Err(Refusal::ForeignRepository.into())
            }
        }
    }

    async fn release_claim(&self, leadership: &dyn Leadership, foreign: &str) -> Result<()> {
        tracing::warn!(
            stanza = %self.stanza,
            foreign,
            "repository belongs to another cluster, clearing stanza claim"
        );
        {
            let writer = self.peer.app_writer(leadership)?;
            BackupState::new(self.peer.clone()).clear(&writer)?;
        }
        self.workload.update_config(true).await?;
        match self.engine.member_started().await {
            Ok(true) => self.engine.reload_configuration().await?,
            Ok(false) => tracing::info!("member not started, skipping configuration reload"),
            Err(e) => {
                tracing::warn!(error = %e, "could not tell whether the member is started");
            }
        }
        AUDIT_LOGGER.log_event(
            AuditEventType::StanzaCleared,
            self.unit.clone(),
            Some(self.stanza.to_string()),
            format!("repository holds stanza {}", foreign),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::stanza::ClusterIdentity;

    fn entry(name: &str) -> StanzaInfo {
        StanzaInfo {
            name: name.to_string(),
            backup: Vec::new(),
        }
    }

    #[test]
    fn test_verdicts() {
        let local = ClusterIdentity::new("prod", "patroni-pg").stanza_name();
        assert_eq!(verdict(&[], &local, Authority::Leader), Verdict::Usable);
        assert_eq!(
            verdict(&[entry("prod.patroni-pg")], &local, Authority::Leader),
            Verdict::Usable
        );
        assert_eq!(
            verdict(&[entry("staging.patroni-pg")], &local, Authority::NonLeader),
            Verdict::ForeignTolerated {
                foreign: "staging.patroni-pg".into()
            }
        );
        assert_eq!(
            verdict(
                &[entry("prod.patroni-pg"), entry("staging.patroni-pg")],
                &local,
                Authority::Leader
            ),
            Verdict::Conflict {
                foreign: "staging.patroni-pg".into()
            }
        );
    }
}
