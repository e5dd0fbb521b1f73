//! Cluster membership, replication engine access and failover
//!
//! - `topology`: who is primary, who is replica, who is reachable
//! - `engine`: the replication engine's REST management port
//! - `failover`: primary loss detection and promotion tracking

pub mod engine;
pub mod failover;
pub mod topology;

pub use engine::{ClusterStatus, MemberStatus, ReplicationEngine, RestEngine};
pub use failover::{FailoverCoordinator, FailoverSettings};
pub use topology::{ClusterMember, ClusterTopology, Health, Role, RoleChange};
