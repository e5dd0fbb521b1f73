//! Configuration for pgwarden components
//!
//! Values come from a TOML file (path in `PGWARDEN_CONFIG`, default
//! `pgwarden.toml`) layered under `PGWARDEN_*` environment variables, e.g.
//! `PGWARDEN_FAILOVER__MASTER_START_TIMEOUT_SECS=45`.

use crate::common::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the configuration file path
pub const CONFIG_ENV: &str = "PGWARDEN_CONFIG";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub unit: UnitConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub failover: FailoverConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub workload: WorkloadConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "pgwarden.toml".to_string());
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::with_prefix("PGWARDEN").separator("__"))
            .build()?;
        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let Some((app, ordinal)) = self.unit.name.rsplit_once('/') else {
            return Err(crate::Error::InvalidConfig(format!(
                "unit name `{}` must look like <app>/<ordinal>",
                self.unit.name
            )));
        };
        if app != self.unit.app || ordinal.parse::<u32>().is_err() {
            return Err(crate::Error::InvalidConfig(format!(
                "unit `{}` does not belong to application `{}`",
                self.unit.name, self.unit.app
            )));
        }
        if self.unit.planned_units == 0 {
            return Err(crate::Error::InvalidConfig(
                "planned_units must be at least 1".into(),
            ));
        }
        if self.workload.service_manager.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "workload.service_manager must name a command".into(),
            ));
        }
        if self.failover.poll_interval_ms == 0 || self.failover.health_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "failover intervals must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Identity of the local unit inside its application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Unit name, `<app>/<ordinal>`
    #[serde(default = "default_unit_name")]
    pub name: String,

    /// Application name
    #[serde(default = "default_app")]
    pub app: String,

    /// Namespace (model) the application is deployed in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Replication cluster name, defaults to `patroni-<app>`
    #[serde(default)]
    pub cluster_name: Option<String>,

    /// Number of units the platform plans to run
    #[serde(default = "default_planned_units")]
    pub planned_units: usize,

    /// Initial peer units (besides this one)
    #[serde(default)]
    pub peers: Vec<String>,

    /// File backing the peer-shared state
    #[serde(default = "default_peer_state_path")]
    pub peer_state_path: PathBuf,

    /// Bind address for the action API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

fn default_unit_name() -> String {
    "postgresql-k8s/0".to_string()
}
fn default_app() -> String {
    "postgresql-k8s".to_string()
}
fn default_namespace() -> String {
    "default".to_string()
}
fn default_planned_units() -> usize {
    1
}
fn default_peer_state_path() -> PathBuf {
    PathBuf::from("./peer-state.json")
}
fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            name: default_unit_name(),
            app: default_app(),
            namespace: default_namespace(),
            cluster_name: None,
            planned_units: default_planned_units(),
            peers: Vec::new(),
            peer_state_path: default_peer_state_path(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl UnitConfig {
    pub fn cluster_name(&self) -> String {
        self.cluster_name
            .clone()
            .unwrap_or_else(|| format!("patroni-{}", self.app))
    }
}

/// Replication engine REST port settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Appended to member host names, e.g. `.postgresql-k8s-endpoints`
    #[serde(default)]
    pub host_suffix: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_api_port() -> u16 {
    8008
}
fn default_scheme() -> String {
    "http".to_string()
}
fn default_request_timeout() -> u64 {
    5_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            scheme: default_scheme(),
            host_suffix: String::new(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Failover detection and promotion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Seconds the primary may stay unresponsive before failover
    #[serde(default = "default_master_start_timeout")]
    pub master_start_timeout_secs: u64,

    /// Budget for every member to converge on the new primary
    #[serde(default = "default_promotion_timeout")]
    pub promotion_timeout_secs: u64,

    /// Health probe interval
    #[serde(default = "default_health_interval")]
    pub health_interval_ms: u64,

    /// Convergence poll interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_master_start_timeout() -> u64 {
    300
}
fn default_promotion_timeout() -> u64 {
    60
}
fn default_health_interval() -> u64 {
    3_000
}
fn default_poll_interval() -> u64 {
    1_000
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            master_start_timeout_secs: default_master_start_timeout(),
            promotion_timeout_secs: default_promotion_timeout(),
            health_interval_ms: default_health_interval(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl FailoverConfig {
    pub fn master_start_timeout(&self) -> Duration {
        Duration::from_secs(self.master_start_timeout_secs)
    }

    pub fn promotion_timeout(&self) -> Duration {
        Duration::from_secs(self.promotion_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Backup tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Backup tool executable
    #[serde(default = "default_tool_path")]
    pub tool_path: PathBuf,

    /// Rendered backup tool configuration
    #[serde(default = "default_conf_path")]
    pub conf_path: PathBuf,

    /// PostgreSQL data directory (emptied before a restore)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Attempts for transient tool failures
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_tool_path() -> PathBuf {
    PathBuf::from("pgbackrest")
}
fn default_conf_path() -> PathBuf {
    PathBuf::from("/etc/pgbackrest.conf")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/postgresql/data/pgdata")
}
fn default_command_timeout() -> u64 {
    60
}
fn default_retry_attempts() -> usize {
    3
}
fn default_retry_backoff() -> u64 {
    3_000
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
            conf_path: default_conf_path(),
            data_dir: default_data_dir(),
            command_timeout_secs: default_command_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl BackupConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Write oracle connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_database() -> String {
    "application".to_string()
}
fn default_user() -> String {
    "operator".to_string()
}
fn default_pg_port() -> u16 {
    5432
}
fn default_connect_timeout() -> u64 {
    10
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            user: default_user(),
            port: default_pg_port(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// How the agent drives the database and backup agent services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Service manager command, invoked as `<cmd...> <verb> <service>`
    #[serde(default = "default_service_manager")]
    pub service_manager: Vec<String>,

    #[serde(default = "default_database_service")]
    pub database_service: String,

    #[serde(default = "default_backup_agent_service")]
    pub backup_agent_service: String,

    /// Archive settings included by the database configuration
    #[serde(default = "default_archive_conf_path")]
    pub archive_conf_path: PathBuf,
}

fn default_service_manager() -> Vec<String> {
    vec!["pebble".to_string()]
}
fn default_database_service() -> String {
    "postgresql".to_string()
}
fn default_backup_agent_service() -> String {
    "pgbackrest server".to_string()
}
fn default_archive_conf_path() -> PathBuf {
    PathBuf::from("/var/lib/postgresql/data/archive.conf")
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            service_manager: default_service_manager(),
            database_service: default_database_service(),
            backup_agent_service: default_backup_agent_service(),
            archive_conf_path: default_archive_conf_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.unit.cluster_name(), "patroni-postgresql-k8s");
        assert_eq!(cfg.engine.api_port, 8008);
        assert_eq!(cfg.failover.promotion_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_unit_must_belong_to_app() {
        let mut cfg = Config::default();
        cfg.unit.name = "other-app/0".into();
        assert!(cfg.validate().is_err());

        cfg.unit.name = "postgresql-k8s".into();
        assert!(cfg.validate().is_err());

        cfg.unit.name = "postgresql-k8s/two".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [unit]
            name = "pg/2"
            app = "pg"
            planned_units = 3

            [failover]
            master_start_timeout_secs = 15
        "#;
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap();
        let cfg: Config = settings.try_deserialize().unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.unit.planned_units, 3);
        assert_eq!(cfg.failover.master_start_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.failover.poll_interval_ms, 1_000);
        assert_eq!(cfg.oracle.database, "application");
    }
}
