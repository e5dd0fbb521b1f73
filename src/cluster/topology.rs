//! Cluster membership and role assignment
//!
//! The topology is an ordered list of members (join order). Roles only
//! change through [`ClusterTopology::promote`], which demotes the previous
//! primary and marks the new one in a single step, so no reader ever sees
//! two primaries.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Replica,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Replica => write!(f, "replica"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Starting,
    Running,
    Unresponsive,
}

impl Health {
    pub fn is_reachable(&self) -> bool {
        !matches!(self, Health::Unresponsive)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub unit: String,
    pub role: Role,
    pub health: Health,
    pub tls_enabled: bool,
}

/// Emitted whenever the primary changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChange {
    /// Monotonic counter of promotions seen by this topology
    pub term: u64,
    pub previous: Option<String>,
    /// Whether the previous primary was reachable when it was demoted
    pub previous_reachable: bool,
    pub promoted: String,
}

impl RoleChange {
    /// Did this change take the primary role away from `unit`?
    pub fn demoted(&self, unit: &str) -> bool {
        self.previous.as_deref() == Some(unit) && self.promoted != unit
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterTopology {
    members: Vec<ClusterMember>,
    term: u64,
}

impl ClusterTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit as a starting replica. Joining twice is a no-op.
    pub fn join(&mut self, unit: &str, tls_enabled: bool) {
        if self.member(unit).is_some() {
            return;
        }
        self.members.push(ClusterMember {
            unit: unit.to_string(),
            role: Role::Replica,
            health: Health::Starting,
            tls_enabled,
        });
    }

    pub fn remove(&mut self, unit: &str) -> Option<ClusterMember> {
        let idx = self.members.iter().position(|m| m.unit == unit)?;
        Some(self.members.remove(idx))
    }

    pub fn set_health(&mut self, unit: &str, health: Health) -> Result<()> {
        self.member_mut(unit)?.health = health;
        Ok(())
    }

    pub fn set_tls(&mut self, unit: &str, enabled: bool) -> Result<()> {
        self.member_mut(unit)?.tls_enabled = enabled;
        Ok(())
    }

    /// Make `unit` the primary, demoting the current one.
    ///
    /// Returns `None` when `unit` already is the primary. Unresponsive
    /// members cannot be promoted.
    pub fn promote(&mut self, unit: &str) -> Result<Option<RoleChange>> {
        let target = self
            .member(unit)
            .ok_or_else(|| Error::UnknownMember(unit.to_string()))?;
        if target.role == Role::Primary {
            return Ok(None);
        }
        if !target.health.is_reachable() {
            return Err(Error::Other(format!(
                "cannot promote unresponsive member {}",
                unit
            )));
        }

        let mut previous = None;
        let mut previous_reachable = false;
        for member in self.members.iter_mut() {
            if member.role == Role::Primary {
                previous = Some(member.unit.clone());
                previous_reachable = member.health.is_reachable();
                member.role = Role::Replica;
            }
            if member.unit == unit {
                member.role = Role::Primary;
            }
        }
        self.term += 1;

        Ok(Some(RoleChange {
            term: self.term,
            previous,
            previous_reachable,
            promoted: unit.to_string(),
        }))
    }

    pub fn member(&self, unit: &str) -> Option<&ClusterMember> {
        self.members.iter().find(|m| m.unit == unit)
    }

    fn member_mut(&mut self, unit: &str) -> Result<&mut ClusterMember> {
        self.members
            .iter_mut()
            .find(|m| m.unit == unit)
            .ok_or_else(|| Error::UnknownMember(unit.to_string()))
    }

    pub fn members(&self) -> &[ClusterMember] {
        &self.members
    }

    pub fn primary(&self) -> Option<&ClusterMember> {
        self.members.iter().find(|m| m.role == Role::Primary)
    }

    pub fn role_of(&self, unit: &str) -> Option<Role> {
        self.member(unit).map(|m| m.role)
    }

    pub fn replicas(&self) -> impl Iterator<Item = &ClusterMember> {
        self.members.iter().filter(|m| m.role == Role::Replica)
    }

    pub fn reachable(&self) -> impl Iterator<Item = &ClusterMember> {
        self.members.iter().filter(|m| m.health.is_reachable())
    }

    /// Majority of voting members
    pub fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }

    pub fn has_quorum(&self) -> bool {
        self.reachable().count() >= self.quorum()
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
