//! Backup and restore against the shared object-store repository
//!
//! - `stanza`: cluster identity and the peer-shared stanza claim
//! - `s3`: S3 integration parameters
//! - `eligibility`: may this unit back up or restore right now
//! - `tool`: the backup tool executable and its output formats
//! - `workload`: database and backup agent services
//! - `repository`: repository identity check and conflict teardown
//! - `orchestrator`: operator actions and the backup agent lease

pub mod eligibility;
pub mod orchestrator;
pub mod repository;
pub mod s3;
pub mod stanza;
pub mod tool;
pub mod workload;

pub use eligibility::{can_unit_perform_backup, check_unit, Refusal, UnitFacts};
pub use orchestrator::{BackupOrchestrator, Collaborators};
pub use repository::{Authority, RepositoryIdentityChecker, Verdict};
pub use s3::{S3Integration, S3Parameters, S3Settings, StaticS3};
pub use stanza::{BackupState, ClusterIdentity, StanzaName};
pub use tool::{BackupInfo, BackupTimestamp, BackupTool, PgBackRest, StanzaInfo};
pub use workload::{LocalWorkload, Workload};
