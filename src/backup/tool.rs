//! Backup tool access
//!
//! [`BackupTool`] is the narrow surface the orchestrator needs from the
//! object-store backup tool. [`PgBackRest`] drives the real executable
//! through `tokio::process`, every invocation bounded by the configured
//! command timeout.

use crate::backup::s3::S3Parameters;
use crate::backup::stanza::StanzaName;
use crate::common::{with_timeout, BackupConfig, Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// One stanza as reported by the info query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StanzaInfo {
    pub name: String,
    #[serde(default)]
    pub backup: Vec<BackupInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub timestamp: Option<BackupTimestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupTimestamp {
    pub start: i64,
    pub stop: i64,
}

/// Parse the info query's JSON output.
///
/// `None` means the tool gave no usable answer. `Some(vec![])` is a
/// readable repository that holds no stanza yet.
pub fn parse_info(output: &str) -> Option<Vec<StanzaInfo>> {
    let output = output.trim();
    if output.is_empty() {
        return None;
    }
    serde_json::from_str(output).ok()
}

/// Operator-facing backup id for a tool label, e.g.
/// `20230101-090000F` becomes `2023-01-01T09:00:00Z`.
pub fn backup_id(label: &str) -> Option<String> {
    let stamp = label.get(..15)?;
    chrono::NaiveDateTime::parse_from_str(stamp, "%Y%m%d-%H%M%S")
        .ok()
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

/// Inverse of [`backup_id`] over the labels the repository knows about
pub fn label_for_backup_id<'a>(stanzas: &'a [StanzaInfo], id: &str) -> Option<&'a str> {
    stanzas
        .iter()
        .flat_map(|s| s.backup.iter())
        .find(|b| backup_id(&b.label).as_deref() == Some(id))
        .map(|b| b.label.as_str())
}

/// Fixed-width table of every backup in `stanza`
pub fn format_backup_list(stanzas: &[StanzaInfo], stanza: &StanzaName) -> String {
    let row = |id: &str, kind: &str, status: &str| format!("{:<21} | {:<12} | {}", id, kind, status);
    let header = row("backup-id", "backup-type", "backup-status");
    let mut lines = vec![header.clone(), "-".repeat(header.len())];
    for backup in stanzas
        .iter()
        .filter(|s| s.name == stanza.as_str())
        .flat_map(|s| s.backup.iter())
    {
        let id = backup_id(&backup.label).unwrap_or_else(|| backup.label.clone());
        let status = if backup.error { "failed" } else { "finished" };
        lines.push(row(&id, &backup.kind, status));
    }
    lines.join("\n")
}

/// Backup tool configuration for `stanza` stored in the bucket described
/// by `params`
pub fn render_conf(params: &S3Parameters, stanza: &StanzaName, data_dir: &Path) -> String {
    let mut conf = String::new();
    conf.push_str("[global]\n");
    conf.push_str("repo1-type=s3\n");
    conf.push_str(&format!("repo1-path={}\n", params.path));
    conf.push_str(&format!("repo1-s3-bucket={}\n", params.bucket));
    conf.push_str(&format!("repo1-s3-endpoint={}\n", params.construct_endpoint()));
    if let Some(region) = &params.region {
        conf.push_str(&format!("repo1-s3-region={}\n", region));
    }
    conf.push_str(&format!("repo1-s3-key={}\n", params.access_key));
    conf.push_str(&format!("repo1-s3-key-secret={}\n", params.secret_key));
    conf.push_str(&format!("repo1-s3-uri-style={}\n", params.uri_style));
    conf.push_str("repo1-retention-full=9999999\n");
    conf.push_str("compress-type=zst\n");
    conf.push_str("log-level-console=info\n");
    conf.push('\n');
    conf.push_str(&format!("[{}]\n", stanza));
    conf.push_str(&format!("pg1-path={}\n", data_dir.display()));
    conf.push_str("pg1-user=backup\n");
    conf
}

/// Write `contents` to `path` through a temporary file and a rename
pub async fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Failures worth another attempt: anything the crate already treats as
/// transient, plus tool exits that point at the network.
pub fn is_transient(err: &Error) -> bool {
    const MARKERS: [&str; 5] = [
        "timeout",
        "timed out",
        "connection refused",
        "unable to connect",
        "503",
    ];
    match err {
        Error::ToolFailed { stderr, .. } => {
            let stderr = stderr.to_ascii_lowercase();
            MARKERS.iter().any(|m| stderr.contains(m))
        }
        other => other.is_retryable(),
    }
}

#[async_trait]
pub trait BackupTool: Send + Sync {
    /// Repository contents. `stanza` narrows the query, `None` lists
    /// every stanza stored under the configured path.
    async fn info(&self, stanza: Option<&StanzaName>) -> Result<Option<Vec<StanzaInfo>>>;

    async fn stanza_create(&self, stanza: &StanzaName) -> Result<()>;

    /// Verify archiving works for `stanza`
    async fn check(&self, stanza: &StanzaName) -> Result<()>;

    /// Take a full backup, returning the tool's console output
    async fn backup(&self, stanza: &StanzaName) -> Result<String>;

    async fn restore(&self, stanza: &StanzaName, label: &str) -> Result<()>;
}

/// The pgBackRest executable
pub struct PgBackRest {
    program: PathBuf,
    conf_path: PathBuf,
    timeout: Duration,
}

impl PgBackRest {
    pub fn new(config: &BackupConfig) -> Self {
        Self {
            program: config.tool_path.clone(),
            conf_path: config.conf_path.clone(),
            timeout: config.command_timeout(),
        }
    }

    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }

    async fn execute(&self, args: &[String]) -> Result<String> {
        let mut command = Command::new(&self.program);
        command
            .arg(format!("--config={}", self.conf_path.display()))
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let rendered = args.join(" ");
        tracing::debug!(command = %rendered, "running backup tool");
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
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn stanza_args(stanza: &StanzaName, rest: &[&str]) -> Vec<String> {
        std::iter::once(format!("--stanza={}", stanza))
            .chain(rest.iter().map(|s| s.to_string()))
            .collect()
    }
}

#[async_trait]
impl BackupTool for PgBackRest {
    async fn info(&self, stanza: Option<&StanzaName>) -> Result<Option<Vec<StanzaInfo>>> {
        let mut args = vec!["info".to_string(), "--output=json".to_string()];
        if let Some(stanza) = stanza {
            args.insert(0, format!("--stanza={}", stanza));
        }
        let output = self.execute(&args).await?;
        Ok(parse_info(&output))
    }

    async fn stanza_create(&self, stanza: &StanzaName) -> Result<()> {
        self.execute(&Self::stanza_args(stanza, &["stanza-create"]))
            .await
            .map(|_| ())
    }

    async fn check(&self, stanza: &StanzaName) -> Result<()> {
        self.execute(&Self::stanza_args(stanza, &["check"]))
            .await
            .map(|_| ())
    }

    async fn backup(&self, stanza: &StanzaName) -> Result<String> {
        self.execute(&Self::stanza_args(stanza, &["--type=full", "backup"]))
            .await
    }

    async fn restore(&self, stanza: &StanzaName, label: &str) -> Result<()> {
        let set = format!("--set={}", label);
        self.execute(&Self::stanza_args(
            stanza,
            &[&set, "--type=immediate", "--target-action=promote", "restore"],
        ))
        .await
        .map(|_| ())
    }
}
