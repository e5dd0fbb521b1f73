//! Write continuity verification
//!
//! The oracle counts rows written by an external workload; the monitor and
//! the drill use it to prove a failover lost nothing.

pub mod continuity;
pub mod drill;
pub mod oracle;

pub use continuity::WriteContinuityMonitor;
pub use drill::{ClusterControl, ContinuousWrites, DrillReport, DrillSettings, FailoverDrill};
pub use oracle::{PgWriteCounter, PrimaryLookup, WriteCounter};
