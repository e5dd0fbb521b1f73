//! Client for a unit agent's action API

use crate::common::{Error, Result};
use crate::verify::PrimaryLookup;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

pub struct ActionClient {
    client: reqwest::Client,
    base_url: String,
}

impl ActionClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder, path: &str) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(body);
        }
        match body.get("error").and_then(Value::as_str) {
            // Refusals are shown to the operator as-is.
            Some(message) => Err(Error::Other(message.to_string())),
            None => Err(Error::UnexpectedStatus {
                endpoint: path.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        self.send(self.client.get(url), path).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        self.send(self.client.post(url).json(&body), path).await
    }

    fn field(value: &Value, key: &str) -> Result<String> {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Internal(format!("response has no `{}`", key)))
    }

    pub async fn create_backup(&self) -> Result<String> {
        let body = self.post("/actions/create-backup", json!({})).await?;
        Self::field(&body, "result")
    }

    pub async fn list_backups(&self) -> Result<String> {
        let body = self.get("/actions/list-backups").await?;
        Self::field(&body, "backups")
    }

    pub async fn restore(&self, backup_id: Option<&str>) -> Result<String> {
        let body = self
            .post("/actions/restore", json!({ "backup-id": backup_id }))
            .await?;
        Self::field(&body, "result")
    }

    pub async fn get_primary(&self) -> Result<String> {
        let body = self.get("/actions/get-primary").await?;
        Self::field(&body, "primary")
    }

    pub async fn get_password(&self) -> Result<String> {
        let body = self.get("/actions/get-password").await?;
        Self::field(&body, "operator-password")
    }

    pub async fn master_start_timeout(&self) -> Result<Option<u64>> {
        let body = self.get("/config/master-start-timeout").await?;
        Ok(body.get("master_start_timeout").and_then(Value::as_u64))
    }

    pub async fn set_master_start_timeout(&self, seconds: Option<u64>) -> Result<()> {
        let path = "/config/master-start-timeout";
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .client
            .patch(url)
            .json(&json!({ "master_start_timeout": seconds }));
        self.send(request, path).await.map(|_| ())
    }

    pub async fn status(&self) -> Result<Value> {
        self.get("/status").await
    }
}

#[async_trait]
impl PrimaryLookup for ActionClient {
    async fn primary(&self) -> Result<String> {
        self.get_primary().await
    }
}
