//! # pgwarden
//!
//! High-availability and backup coordination for a replicated PostgreSQL
//! cluster running under an orchestrator:
//! - Primary loss detection with quorum-checked, deadline-bounded promotion
//! - Write continuity verification across a failover
//! - Backup eligibility gating and repository identity checks
//! - Stanza lifecycle, backup creation, listing and restore
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Unit agent                   │
//! │  action API ── BackupOrchestrator            │
//! │       │          │  eligibility gate         │
//! │       │          │  repository identity      │
//! │       │          └─ backup tool / workload   │
//! │  FailoverCoordinator ── ClusterTopology      │
//! └───────┬─────────────────────┬────────────────┘
//!         │ REST :8008          │ peer state
//!  ┌──────▼───────┐      ┌──────▼───────┐
//!  │ replication  │      │ shared k/v   │
//!  │ engine       │      │ (app + unit) │
//!  └──────────────┘      └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start an agent
//! ```bash
//! pgwarden-agent serve \
//!   --unit postgresql-k8s/0 \
//!   --namespace prod \
//!   --peers postgresql-k8s/1,postgresql-k8s/2
//! ```
//!
//! ### Operator actions
//! ```bash
//! pgwarden --agent http://localhost:8080 create-backup
//! pgwarden list-backups
//! pgwarden restore 2023-01-01T09:00:00Z
//! pgwarden get-primary
//! pgwarden set-master-start-timeout 30
//! ```

#![allow(clippy::result_large_err)]

pub mod backup;
pub mod cluster;
pub mod common;
pub mod unit;
pub mod verify;

// Re-export commonly used types
pub use backup::{BackupOrchestrator, Refusal};
pub use cluster::{ClusterTopology, FailoverCoordinator, Role};
pub use common::{Config, Error, Result};
pub use unit::Agent;
pub use verify::{FailoverDrill, WriteContinuityMonitor};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
