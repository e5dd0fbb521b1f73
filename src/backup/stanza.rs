//! Stanza identity and the peer-shared stanza claim

use crate::common::peer::{AppWriter, PeerData, STANZA_KEY};
use crate::common::Result;
use std::sync::Arc;

/// Where a cluster lives: namespace plus replication cluster name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIdentity {
    namespace: String,
    cluster_name: String,
}

impl ClusterIdentity {
    pub fn new(namespace: impl Into<String>, cluster_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            cluster_name: cluster_name.into(),
        }
    }

    /// `{namespace}.{cluster_name}`
    pub fn stanza_name(&self) -> StanzaName {
        StanzaName(format!("{}.{}", self.namespace, self.cluster_name))
    }
}

/// Name scoping this cluster's backups in the shared repository.
///
/// Only obtainable from [`ClusterIdentity::stanza_name`]; names read back
/// from the repository or peer state stay plain strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StanzaName(String);

impl StanzaName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StanzaName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for StanzaName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// The application's stanza claim in peer state
#[derive(Clone)]
pub struct BackupState {
    peer: Arc<PeerData>,
}

impl BackupState {
    pub fn new(peer: Arc<PeerData>) -> Self {
        Self { peer }
    }

    pub fn claimed(&self) -> Option<String> {
        self.peer.app_get(STANZA_KEY).filter(|s| !s.is_empty())
    }

    pub fn is_claimed_by(&self, stanza: &StanzaName) -> bool {
        self.claimed().as_deref() == Some(stanza.as_str())
    }

    pub fn claim(&self, writer: &AppWriter<'_>, stanza: &StanzaName) -> Result<()> {
        writer.set(STANZA_KEY, stanza.as_str())
    }

    pub fn clear(&self, writer: &AppWriter<'_>) -> Result<()> {
        writer.remove(STANZA_KEY)
    }
}
