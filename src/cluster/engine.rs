//! Replication engine client
//!
//! The replication engine runs leader election and streaming replication
//! on every member and exposes a REST management port. pgwarden never
//! elects anything itself; it reads the engine's view of the cluster,
//! tunes `master_start_timeout` and asks for configuration reloads.

use crate::common::{EngineConfig, Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Engine member name for a unit: `pg/0` → `pg-0`
pub fn unit_to_member(unit: &str) -> String {
    unit.replace('/', "-")
}

/// Unit name for an engine member: `pg-0` → `pg/0`
pub fn member_to_unit(member: &str) -> String {
    match member.rsplit_once('-') {
        Some((app, ordinal)) if ordinal.chars().all(|c| c.is_ascii_digit()) => {
            format!("{}/{}", app, ordinal)
        }
        _ => member.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStatus {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub host: Option<String>,
}

impl MemberStatus {
    pub fn is_leader(&self) -> bool {
        matches!(self.role.as_str(), "leader" | "master" | "standby_leader")
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state.as_str(), "running" | "streaming")
    }
}

/// Cluster view as reported by one member
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    #[serde(default)]
    pub members: Vec<MemberStatus>,
}

impl ClusterStatus {
    /// Unit name of the leader in this view
    pub fn leader(&self) -> Option<String> {
        self.members
            .iter()
            .find(|m| m.is_leader())
            .map(|m| member_to_unit(&m.name))
    }
}

#[async_trait]
pub trait ReplicationEngine: Send + Sync {
    /// Whether the local member is fully started
    async fn member_started(&self) -> Result<bool>;

    /// Health probe against any member
    async fn member_healthy(&self, unit: &str) -> Result<bool>;

    /// The cluster as seen by `unit`
    async fn cluster_status(&self, unit: &str) -> Result<ClusterStatus>;

    /// `None` when the engine uses its built-in default
    async fn master_start_timeout(&self) -> Result<Option<u64>>;

    async fn set_master_start_timeout(&self, seconds: Option<u64>) -> Result<()>;

    /// Re-read configuration on the local member
    async fn reload_configuration(&self) -> Result<()>;
}

/// REST client for the engine's management port
pub struct RestEngine {
    client: reqwest::Client,
    config: EngineConfig,
    local_unit: String,
}

impl RestEngine {
    pub fn new(config: EngineConfig, local_unit: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            config,
            local_unit: local_unit.into(),
        })
    }

    fn url(&self, unit: &str, path: &str) -> String {
        format!(
            "{}://{}{}:{}{}",
            self.config.scheme,
            unit_to_member(unit),
            self.config.host_suffix,
            self.config.api_port,
            path
        )
    }

    fn check(endpoint: String, response: &reqwest::Response) -> Result<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::UnexpectedStatus {
                endpoint,
                status: response.status().as_u16(),
            })
        }
    }
}

#[async_trait]
impl ReplicationEngine for RestEngine {
    async fn member_started(&self) -> Result<bool> {
        self.member_healthy(&self.local_unit).await
    }

    async fn member_healthy(&self, unit: &str) -> Result<bool> {
        match self.client.get(self.url(unit, "/health")).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) if e.is_connect() || e.is_timeout() => {
                tracing::debug!(unit, error = %e, "health probe failed");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn cluster_status(&self, unit: &str) -> Result<ClusterStatus> {
        let url = self.url(unit, "/cluster");
        let response = self.client.get(&url).send().await?;
        Self::check(url, &response)?;
        Ok(response.json().await?)
    }

    async fn master_start_timeout(&self) -> Result<Option<u64>> {
        let url = self.url(&self.local_unit, "/config");
        let response = self.client.get(&url).send().await?;
        Self::check(url, &response)?;
        let body: serde_json::Value = response.json().await?;
        Ok(body.get("master_start_timeout").and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }))
    }

    async fn set_master_start_timeout(&self, seconds: Option<u64>) -> Result<()> {
        let url = self.url(&self.local_unit, "/config");
        let response = self
            .client
            .patch(&url)
            .json(&json!({ "master_start_timeout": seconds }))
            .send()
            .await?;
        Self::check(url, &response)
    }

    async fn reload_configuration(&self) -> Result<()> {
        let url = self.url(&self.local_unit, "/reload");
        let response = self.client.post(&url).send().await?;
        Self::check(url, &response)
    }
}
