//! S3 integration settings
//!
//! The S3 integration hands over a flat map of connection parameters. Three
//! of them are required; the rest fall back to AWS defaults.

use crate::backup::eligibility::Refusal;
use crate::common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Required keys, in the order they are reported when missing
pub const REQUIRED_PARAMETERS: [&str; 3] = ["bucket", "access-key", "secret-key"];

const DEFAULT_ENDPOINT: &str = "https://s3.amazonaws.com";
const AWS_DOMAIN: &str = "amazonaws.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Parameters {
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
    pub region: Option<String>,
    pub path: String,
    pub uri_style: String,
}

impl S3Parameters {
    /// Build parameters from integration data, or list the missing keys.
    pub fn from_map(data: &BTreeMap<String, String>) -> std::result::Result<Self, Vec<&'static str>> {
        let get = |key: &str| {
            data.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let missing: Vec<&'static str> = REQUIRED_PARAMETERS
            .iter()
            .copied()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }

        let path = get("path").unwrap_or_default();
        Ok(Self {
            bucket: get("bucket").unwrap_or_default(),
            access_key: get("access-key").unwrap_or_default(),
            secret_key: get("secret-key").unwrap_or_default(),
            endpoint: get("endpoint").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            region: get("region"),
            path: format!("/{}", path.trim_matches('/')),
            uri_style: get("s3-uri-style").unwrap_or_else(|| "host".to_string()),
        })
    }

    /// Endpoint to hand to the backup tool.
    ///
    /// AWS endpoints are pinned to the configured region; anything else is
    /// used as given.
    pub fn construct_endpoint(&self) -> String {
        let (scheme, host) = self
            .endpoint
            .split_once("://")
            .unwrap_or(("https", self.endpoint.as_str()));
        let host = host.trim_end_matches('/');
        match &self.region {
            Some(region) if host.ends_with(AWS_DOMAIN) => {
                format!("{}://s3.{}.{}", scheme, region, AWS_DOMAIN)
            }
            _ => format!("{}://{}", scheme, host),
        }
    }
}

/// Live source of S3 connection data
#[async_trait]
pub trait S3Integration: Send + Sync {
    async fn connection_info(&self) -> Result<BTreeMap<String, String>>;
}

/// Connection data captured once from the integration
pub struct StaticS3(pub BTreeMap<String, String>);

#[async_trait]
impl S3Integration for StaticS3 {
    async fn connection_info(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.0.clone())
    }
}

/// The currently attached S3 integration, if any
#[derive(Default)]
pub struct S3Settings {
    integration: RwLock<Option<Arc<dyn S3Integration>>>,
}

impl S3Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, integration: Arc<dyn S3Integration>) {
        *self.integration.write().unwrap_or_else(|e| e.into_inner()) = Some(integration);
    }

    pub fn detach(&self) {
        self.integration
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn is_attached(&self) -> bool {
        self.integration
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Fetch and validate the parameters.
    pub async fn parameters(&self) -> std::result::Result<S3Parameters, Refusal> {
        let integration = self
            .integration
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(Refusal::RelationMissing)?;
        let data = integration
            .connection_info()
            .await
            .map_err(|e| Refusal::S3Unavailable(e.to_string()))?;
        S3Parameters::from_map(&data).map_err(Refusal::MissingParameters)
    }

    pub async fn are_backup_settings_ok(&self) -> std::result::Result<(), Refusal> {
        self.parameters().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;

    fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    struct Unreachable;

    #[async_trait]
    impl S3Integration for Unreachable {
        async fn connection_info(&self) -> Result<BTreeMap<String, String>> {
            Err(Error::ConnectionFailed("secret backend unreachable".into()))
        }
    }

    #[test]
    fn test_defaults_and_normalization() {
        let params = S3Parameters::from_map(&data(&[
            ("bucket", " backups "),
            ("access-key", "AK"),
            ("secret-key", "SK"),
            ("path", "pg/cluster/"),
        ]))
        .unwrap();
        assert_eq!(params.bucket, "backups");
        assert_eq!(params.path, "/pg/cluster");
        assert_eq!(params.endpoint, "https://s3.amazonaws.com");
        assert_eq!(params.uri_style, "host");
        assert!(params.region.is_none());
    }

    #[test]
    fn test_missing_keys_in_stable_order() {
        let missing = S3Parameters::from_map(&data(&[("access-key", "AK")])).unwrap_err();
        assert_eq!(missing, vec!["bucket", "secret-key"]);
    }

    #[test]
    fn test_construct_endpoint() {
        let mut params = S3Parameters::from_map(&data(&[
            ("bucket", "b"),
            ("access-key", "a"),
            ("secret-key", "s"),
            ("region", "eu-west-1"),
        ]))
        .unwrap();
        assert_eq!(params.construct_endpoint(), "https://s3.eu-west-1.amazonaws.com");

        params.endpoint = "http://minio.local:9000/".into();
        assert_eq!(params.construct_endpoint(), "http://minio.local:9000");
    }

    #[tokio::test]
    async fn test_settings_check_order() {
        let settings = S3Settings::new();
        assert_eq!(
            settings.are_backup_settings_ok().await,
            Err(Refusal::RelationMissing)
        );

        settings.attach(Arc::new(StaticS3(BTreeMap::new())));
        assert_eq!(
            settings.are_backup_settings_ok().await.unwrap_err().to_string(),
            "Missing S3 parameters: ['bucket', 'access-key', 'secret-key']"
        );

        settings.attach(Arc::new(Unreachable));
        assert_eq!(
            settings.are_backup_settings_ok().await.unwrap_err().to_string(),
            "Connection failed: secret backend unreachable"
        );

        settings.attach(Arc::new(StaticS3(data(&[
            ("bucket", "b"),
            ("access-key", "a"),
            ("secret-key", "s"),
        ]))));
        assert_eq!(settings.are_backup_settings_ok().await, Ok(()));

        settings.detach();
        assert!(!settings.is_attached());
    }
}
