//! Local unit status and leadership
//!
//! Several subsystems may block the unit at the same time. Each one owns a
//! [`BlockSource`]; the status shown to the operator is the message of the
//! highest-priority source still blocking.

use crate::common::Leadership;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum UnitStatus {
    Active(String),
    Maintenance(String),
    Waiting(String),
    Blocked(String),
}

impl UnitStatus {
    pub fn is_blocked(&self) -> bool {
        matches!(self, UnitStatus::Blocked(_))
    }

    pub fn message(&self) -> &str {
        match self {
            UnitStatus::Active(m)
            | UnitStatus::Maintenance(m)
            | UnitStatus::Waiting(m)
            | UnitStatus::Blocked(m) => m,
        }
    }
}

/// Owner of a blocking condition, most specific first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockSource {
    Failover,
    Stanza,
    S3Settings,
    Restore,
}

pub struct UnitState {
    unit: String,
    leader: AtomicBool,
    planned_units: AtomicUsize,
    blocks: RwLock<BTreeMap<BlockSource, String>>,
    status: RwLock<UnitStatus>,
}

impl UnitState {
    pub fn new(unit: impl Into<String>, planned_units: usize) -> Self {
        Self {
            unit: unit.into(),
            leader: AtomicBool::new(false),
            planned_units: AtomicUsize::new(planned_units),
            blocks: RwLock::new(BTreeMap::new()),
            status: RwLock::new(UnitStatus::Waiting("waiting to start".into())),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn set_leader(&self, leader: bool) {
        let was = self.leader.swap(leader, Ordering::SeqCst);
        if was != leader {
            tracing::info!(unit = %self.unit, leader, "application leadership changed");
        }
    }

    pub fn planned_units(&self) -> usize {
        self.planned_units.load(Ordering::SeqCst)
    }

    pub fn set_planned_units(&self, planned: usize) {
        self.planned_units.store(planned, Ordering::SeqCst);
    }

    /// Current status; an unresolved block always wins
    pub fn status(&self) -> UnitStatus {
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        match blocks.values().next() {
            Some(message) => UnitStatus::Blocked(message.clone()),
            None => self.status.read().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self
            .blocks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Status used while nothing blocks
    pub fn set_status(&self, status: UnitStatus) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = status;
    }

    pub fn block(&self, source: BlockSource, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(unit = %self.unit, ?source, %message, "unit blocked");
        self.blocks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(source, message);
    }

    pub fn unblock(&self, source: BlockSource) {
        if self
            .blocks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&source)
            .is_some()
        {
            tracing::info!(unit = %self.unit, ?source, "block resolved");
        }
    }
}

impl Leadership for UnitState {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_specific_block_is_shown() {
        let state = UnitState::new("pg/0", 3);
        state.set_status(UnitStatus::Active(String::new()));
        assert!(!state.status().is_blocked());

        state.block(BlockSource::S3Settings, "Missing S3 parameters: ['bucket']");
        state.block(BlockSource::Stanza, "the S3 repository has backups from another cluster");
        assert_eq!(
            state.status(),
            UnitStatus::Blocked("the S3 repository has backups from another cluster".into())
        );

        state.unblock(BlockSource::Stanza);
        assert_eq!(state.status().message(), "Missing S3 parameters: ['bucket']");

        state.unblock(BlockSource::S3Settings);
        assert_eq!(state.status(), UnitStatus::Active(String::new()));
    }

    #[test]
    fn test_leadership_flag() {
        let state = UnitState::new("pg/0", 1);
        assert!(!state.is_leader());
        state.set_leader(true);
        assert!(state.is_leader());
    }
}
