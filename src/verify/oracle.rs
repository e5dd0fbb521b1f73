//! Write oracle
//!
//! The external write workload inserts one row per write into
//! `continuous_writes`. Counting those rows on a given member tells how
//! many acknowledged writes that member holds.

use crate::cluster::engine::unit_to_member;
use crate::common::{with_timeout, Error, OracleConfig, Result};
use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::sync::Arc;
use std::time::Duration;

pub const COUNT_WRITES: &str = "SELECT COUNT(number) FROM continuous_writes";

#[async_trait]
pub trait WriteCounter: Send + Sync {
    /// Rows written as seen by `member`, or by the current primary
    async fn count(&self, member: Option<&str>) -> Result<u64>;
}

/// Where unqualified counts go
#[async_trait]
pub trait PrimaryLookup: Send + Sync {
    async fn primary(&self) -> Result<String>;
}

/// Counts writes over a direct PostgreSQL connection
pub struct PgWriteCounter {
    config: OracleConfig,
    host_suffix: String,
    password: String,
    primary: Arc<dyn PrimaryLookup>,
}

impl PgWriteCounter {
    pub fn new(
        config: OracleConfig,
        host_suffix: impl Into<String>,
        password: impl Into<String>,
        primary: Arc<dyn PrimaryLookup>,
    ) -> Self {
        Self {
            config,
            host_suffix: host_suffix.into(),
            password: password.into(),
            primary,
        }
    }

    fn options(&self, unit: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&format!("{}{}", unit_to_member(unit), self.host_suffix))
            .port(self.config.port)
            .database(&self.config.database)
            .username(&self.config.user)
            .password(&self.password)
    }
}

#[async_trait]
impl WriteCounter for PgWriteCounter {
    async fn count(&self, member: Option<&str>) -> Result<u64> {
        let unit = match member {
            Some(unit) => unit.to_string(),
            None => self.primary.primary().await?,
        };
        let options = self.options(&unit);
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let mut conn = with_timeout("oracle connect", connect_timeout, async {
            Ok(options.connect().await?)
        })
        .await?;

        let count: i64 = sqlx::query_scalar(COUNT_WRITES).fetch_one(&mut conn).await?;
        conn.close().await?;
        tracing::debug!(unit = %unit, count, "counted writes");
        u64::try_from(count).map_err(|_| Error::Internal(format!("negative row count {}", count)))
    }
}
