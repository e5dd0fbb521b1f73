//! Common utilities and types shared across pgwarden

pub mod audit;
pub mod config;
pub mod error;
pub mod peer;
pub mod retry;
pub mod tracing_middleware;
pub mod utils;

pub use audit::{AuditEventType, AUDIT_LOGGER};
pub use config::{
    BackupConfig, Config, EngineConfig, FailoverConfig, OracleConfig, UnitConfig, WorkloadConfig,
};
pub use error::{Error, Result};
pub use peer::{Leadership, PeerData, PeerStore};
pub use retry::{Backoff, RetryPolicy, Stop};
pub use utils::{generate_password, parse_duration, with_timeout};
