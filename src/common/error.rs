//! Error types for pgwarden

use crate::backup::Refusal;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Transport Errors ===
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from {endpoint}: HTTP {status}")]
    UnexpectedStatus { endpoint: String, status: u16 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Failover Errors ===
    #[error("Quorum unavailable: {reachable} of {required} required members reachable")]
    QuorumUnavailable { reachable: usize, required: usize },

    #[error("Promotion timed out after {0:?}")]
    PromotionTimedOut(Duration),

    #[error("No primary known for the cluster")]
    NoPrimary,

    #[error("Unknown member: {0}")]
    UnknownMember(String),

    // === Peer State Errors ===
    #[error("Not leader: {0}")]
    NotLeader(String),

    #[error("Peer state corrupted: {0}")]
    PeerStateCorrupted(String),

    // === Backup Errors ===
    #[error("{0}")]
    Refused(#[from] Refusal),

    #[error("Backup tool `{command}` failed with exit code {code}: {stderr}")]
    ToolFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    // === Write Continuity Errors ===
    #[error("Writes not continuing: {before} before, {after} after")]
    WritesStalled { before: u64, after: u64 },

    #[error("Writes lost: expected {expected}, found {actual:?}")]
    WritesLost { expected: u64, actual: Option<u64> },

    #[error("Replica {member} stale: expected {expected}, found {actual:?}")]
    ReplicaStale {
        member: String,
        expected: u64,
        actual: Option<u64>,
    },

    #[error("Drill failed: {0}")]
    DrillFailed(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a transient failure worth retrying?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::UnexpectedStatus { status, .. } => *status >= 500,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Convert to HTTP status code for the action API
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::Refused(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::NotLeader(_) => StatusCode::CONFLICT,
            Error::UnknownMember(_) => StatusCode::NOT_FOUND,
            Error::Timeout(_) | Error::PromotionTimedOut(_) => StatusCode::REQUEST_TIMEOUT,
            Error::QuorumUnavailable { .. } | Error::NoPrimary => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
