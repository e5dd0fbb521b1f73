//! The database workload as seen by the backup orchestrator

use crate::backup::stanza::BackupState;
use crate::backup::tool::write_atomically;
use crate::common::{with_timeout, BackupConfig, Error, Result, WorkloadConfig};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[async_trait]
pub trait Workload: Send + Sync {
    /// Re-render the database configuration. Without `force` an unchanged
    /// rendering is not written again.
    async fn update_config(&self, force: bool) -> Result<()>;

    async fn stop_database(&self) -> Result<()>;

    async fn start_database(&self) -> Result<()>;

    /// Remove everything under the data directory, keeping the directory
    async fn empty_data_files(&self) -> Result<()>;

    async fn start_backup_agent(&self) -> Result<()>;

    async fn stop_backup_agent(&self) -> Result<()>;
}

/// Workload managed through a local service manager
pub struct LocalWorkload {
    config: WorkloadConfig,
    tool_path: PathBuf,
    tool_conf_path: PathBuf,
    data_dir: PathBuf,
    timeout: Duration,
    backups: BackupState,
}

impl LocalWorkload {
    pub fn new(config: WorkloadConfig, backup: &BackupConfig, backups: BackupState) -> Self {
        Self {
            config,
            tool_path: backup.tool_path.clone(),
            tool_conf_path: backup.conf_path.clone(),
            data_dir: backup.data_dir.clone(),
            timeout: backup.command_timeout(),
            backups,
        }
    }

    /// Archive settings for the current stanza claim. Without a claim WAL
    /// segments are acknowledged and dropped.
    pub fn archive_settings(&self) -> String {
        let command = match self.backups.claimed() {
            Some(stanza) => format!(
                "{} --config={} --stanza={} archive-push %p",
                self.tool_path.display(),
                self.tool_conf_path.display(),
                stanza
            ),
            None => "/bin/true".to_string(),
        };
        format!("archive_mode = on\narchive_command = '{}'\n", command)
    }

    async fn service(&self, verb: &str, service: &str) -> Result<()> {
        let Some((program, prefix)) = self.config.service_manager.split_first() else {
            return Err(Error::InvalidConfig("no service manager configured".into()));
        };
        let rendered = format!("{} {} {}", self.config.service_manager.join(" "), verb, service);
        let mut command = Command::new(program);
        command
            .args(prefix)
            .arg(verb)
            .args(service.split_whitespace())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = with_timeout(&rendered, self.timeout, async {
            Ok(command.output().await?)
        })
        .await?;
        if !output.status.success() {
            return Err(Error::ToolFailed {
                command: rendered,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tracing::info!(service, verb, "service command completed");
        Ok(())
    }
}

#[async_trait]
impl Workload for LocalWorkload {
    async fn update_config(&self, force: bool) -> Result<()> {
        let rendered = self.archive_settings();
        if !force {
            if let Ok(current) = tokio::fs::read_to_string(&self.config.archive_conf_path).await {
                if current == rendered {
                    return Ok(());
                }
            }
        }
        write_atomically(&self.config.archive_conf_path, &rendered).await?;
        tracing::debug!(path = %self.config.archive_conf_path.display(), "archive settings written");
        Ok(())
    }

    async fn stop_database(&self) -> Result<()> {
        self.service("stop", &self.config.database_service).await
    }

    async fn start_database(&self) -> Result<()> {
        self.service("start", &self.config.database_service).await
    }

    async fn empty_data_files(&self) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        tracing::info!(data_dir = %self.data_dir.display(), "data directory emptied");
        Ok(())
    }

    async fn start_backup_agent(&self) -> Result<()> {
        self.service("start", &self.config.backup_agent_service).await
    }

    async fn stop_backup_agent(&self) -> Result<()> {
        self.service("stop", &self.config.backup_agent_service).await
    }
}
