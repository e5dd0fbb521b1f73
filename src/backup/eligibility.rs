//! Backup eligibility
//!
//! Whether a unit may create or restore a backup is a fixed decision table
//! evaluated top to bottom; the first failing row wins and its message is
//! what the operator sees.
//!
//! | # | condition                                       | refusal                       |
//! |---|-------------------------------------------------|-------------------------------|
//! | 1 | unit status is blocked                          | [`Refusal::Blocked`]          |
//! | 2 | primary, more than one planned unit, TLS on     | [`Refusal::PrimaryWithReplicas`] |
//! | 3 | replica, TLS off                                | [`Refusal::ReplicaWithoutTls`] |
//! | 4 | replication engine member not started           | [`Refusal::NotRunning`]       |
//! | 5 | no stanza claimed in peer state                 | [`Refusal::StanzaNotInitialised`] |
//! | 6 | S3 settings not usable                          | settings refusal, verbatim    |

use crate::backup::s3::S3Settings;
use crate::cluster::Role;
use thiserror::Error;

/// Why a backup-related request was refused. `Display` is the exact
/// operator-facing message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    #[error("Unit is in a blocking state")]
    Blocked,

    #[error("Unit cannot perform backups as it is the cluster primary")]
    PrimaryWithReplicas,

    #[error("Unit cannot perform backups as TLS is not enabled")]
    ReplicaWithoutTls,

    #[error("Unit cannot perform backups as it's not in running state")]
    NotRunning,

    #[error("Stanza was not initialised")]
    StanzaNotInitialised,

    #[error("Relation with s3-integrator charm missing, cannot create/restore backup.")]
    RelationMissing,

    #[error("Missing S3 parameters: {}", python_list(.0))]
    MissingParameters(Vec<&'static str>),

    #[error("{0}")]
    S3Unavailable(String),

    #[error("failed to initialize stanza, check your S3 settings")]
    RepositoryUnreadable,

    #[error("failed to initialize stanza, check your S3 settings")]
    StanzaCreateFailed,

    #[error("the S3 repository has backups from another cluster")]
    ForeignRepository,

    #[error("Missing backup-id to restore")]
    MissingBackupId,

    #[error("Invalid backup-id: {0}")]
    UnknownBackupId(String),

    #[error("Unit cannot restore backup as there are more than one unit")]
    MultipleUnits,

    #[error("Unit cannot restore backup as it was not elected the leader unit yet")]
    NotLeader,
}

fn python_list(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| format!("'{}'", i)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Everything the decision table looks at, gathered up front
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFacts {
    pub blocked: bool,
    pub role: Role,
    pub planned_units: usize,
    pub tls_enabled: bool,
    pub member_started: bool,
    pub stanza_claimed: bool,
}

/// Rows 1 to 5 of the decision table.
pub fn check_unit(facts: &UnitFacts) -> Result<(), Refusal> {
    if facts.blocked {
        return Err(Refusal::Blocked);
    }
    match facts.role {
        Role::Primary if facts.planned_units > 1 && facts.tls_enabled => {
            return Err(Refusal::PrimaryWithReplicas)
        }
        Role::Replica if !facts.tls_enabled => return Err(Refusal::ReplicaWithoutTls),
        _ => {}
    }
    if !facts.member_started {
        return Err(Refusal::NotRunning);
    }
    if !facts.stanza_claimed {
        return Err(Refusal::StanzaNotInitialised);
    }
    Ok(())
}

/// The full decision table; S3 settings are only consulted once every
/// local check has passed.
pub async fn can_unit_perform_backup(facts: &UnitFacts, s3: &S3Settings) -> Result<(), Refusal> {
    check_unit(facts)?;
    s3.are_backup_settings_ok().await
}
