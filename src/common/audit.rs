//! Audit log for operator-visible state changes
//!
//! Role changes, stanza claims, restores and credential reads are written as
//! JSON lines to the file named by `PGWARDEN_AUDIT_LOG` (default
//! `audit.log`) and mirrored to the `audit` tracing target.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

/// Audit log event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    RoleChanged,
    StanzaClaimed,
    StanzaCleared,
    BackupCreated,
    RestoreStarted,
    PasswordRead,
    ConfigChanged,
    System,
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub event: AuditEventType,
    pub actor: String,
    pub target: Option<String>,
    pub message: String,
}

pub struct AuditLogger {
    file: Option<Mutex<File>>,
}

pub static AUDIT_LOGGER: Lazy<AuditLogger> = Lazy::new(|| {
    let path = std::env::var("PGWARDEN_AUDIT_LOG").unwrap_or_else(|_| "audit.log".to_string());
    AuditLogger::new(&path)
});

impl AuditLogger {
    pub fn new(path: &str) -> Self {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
            .map(Mutex::new);
        Self { file }
    }

    pub fn log(&self, entry: AuditEntry) {
        let line = serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string());
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "{}", line);
            }
        }
        tracing::info!(target: "audit", event = ?entry.event, actor = %entry.actor, "{}", entry.message);
    }

    pub fn log_event(
        &self,
        event: AuditEventType,
        actor: impl Into<String>,
        target: Option<String>,
        message: impl Into<String>,
    ) {
        self.log(AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target,
            message: message.into(),
        });
    }
}
