//! Fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use pgwarden::backup::{
    BackupInfo, BackupTimestamp, BackupTool, S3Settings, StanzaInfo, StanzaName, StaticS3,
    Workload,
};
use pgwarden::cluster::engine::unit_to_member;
use pgwarden::cluster::{ClusterStatus, MemberStatus, ReplicationEngine};
use pgwarden::common::{BackupConfig, Config, Leadership};
use pgwarden::verify::WriteCounter;
use pgwarden::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct Fixed(pub bool);

impl Leadership for Fixed {
    fn is_leader(&self) -> bool {
        self.0
    }
}

/// Replication engine driven by the test
pub struct FakeEngine {
    pub down: Mutex<HashSet<String>>,
    /// Leader as seen by each unit
    pub views: Mutex<HashMap<String, String>>,
    pub started: Mutex<Option<bool>>,
    pub started_calls: AtomicUsize,
    pub reloads: AtomicUsize,
    pub master_start_timeout: Mutex<Option<u64>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            down: Mutex::new(HashSet::new()),
            views: Mutex::new(HashMap::new()),
            started: Mutex::new(Some(true)),
            started_calls: AtomicUsize::new(0),
            reloads: AtomicUsize::new(0),
            master_start_timeout: Mutex::new(None),
        }
    }

    /// Every unit in `units` reports `leader`
    pub fn elect(&self, units: &[&str], leader: &str) {
        let mut views = self.views.lock().unwrap();
        for unit in units {
            views.insert(unit.to_string(), leader.to_string());
        }
    }

    pub fn kill(&self, unit: &str) {
        self.down.lock().unwrap().insert(unit.to_string());
    }

    pub fn revive(&self, unit: &str) {
        self.down.lock().unwrap().remove(unit);
    }

    /// `None` makes `member_started` fail
    pub fn set_started(&self, started: Option<bool>) {
        *self.started.lock().unwrap() = started;
    }

    pub fn started_calls(&self) -> usize {
        self.started_calls.load(Ordering::SeqCst)
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplicationEngine for FakeEngine {
    async fn member_started(&self) -> Result<bool> {
        self.started_calls.fetch_add(1, Ordering::SeqCst);
        (*self.started.lock().unwrap())
            .ok_or_else(|| Error::ConnectionFailed("engine unreachable".into()))
    }

    async fn member_healthy(&self, unit: &str) -> Result<bool> {
        Ok(!self.down.lock().unwrap().contains(unit))
    }

    async fn cluster_status(&self, unit: &str) -> Result<ClusterStatus> {
        if self.down.lock().unwrap().contains(unit) {
            return Err(Error::ConnectionFailed(unit.to_string()));
        }
        let leader = self.views.lock().unwrap().get(unit).cloned();
        Ok(ClusterStatus {
            members: leader
                .map(|l| MemberStatus {
                    name: unit_to_member(&l),
                    role: "leader".into(),
                    state: "running".into(),
                    host: None,
                })
                .into_iter()
                .collect(),
        })
    }

    async fn master_start_timeout(&self) -> Result<Option<u64>> {
        Ok(*self.master_start_timeout.lock().unwrap())
    }

    async fn set_master_start_timeout(&self, seconds: Option<u64>) -> Result<()> {
        *self.master_start_timeout.lock().unwrap() = seconds;
        Ok(())
    }

    async fn reload_configuration(&self) -> Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// How the fake tool answers the info query
#[derive(Debug, Clone)]
pub enum InfoAnswer {
    Listing(Vec<StanzaInfo>),
    NoData,
    Fails,
}

pub struct FakeTool {
    pub info: Mutex<InfoAnswer>,
    pub fail_stanza_create: Mutex<bool>,
    pub fail_restore: Mutex<bool>,
    pub fail_check: Mutex<bool>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeTool {
    pub fn new(info: InfoAnswer) -> Self {
        Self {
            info: Mutex::new(info),
            fail_stanza_create: Mutex::new(false),
            fail_restore: Mutex::new(false),
            fail_check: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_info(&self, info: InfoAnswer) {
        *self.info.lock().unwrap() = info;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(call)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BackupTool for FakeTool {
    async fn info(&self, stanza: Option<&StanzaName>) -> Result<Option<Vec<StanzaInfo>>> {
        self.record(format!("info {}", stanza.map(|s| s.as_str()).unwrap_or("*")));
        match self.info.lock().unwrap().clone() {
            InfoAnswer::Listing(entries) => Ok(Some(match stanza {
                Some(stanza) => entries.into_iter().filter(|e| e.name == stanza.as_str()).collect(),
                None => entries,
            })),
            InfoAnswer::NoData => Ok(None),
            InfoAnswer::Fails => Err(Error::ToolFailed {
                command: "info".into(),
                code: 29,
                stderr: "ERROR: [029]: access denied".into(),
            }),
        }
    }

    async fn stanza_create(&self, stanza: &StanzaName) -> Result<()> {
        self.record(format!("stanza-create {}", stanza));
        if *self.fail_stanza_create.lock().unwrap() {
            return Err(Error::ToolFailed {
                command: "stanza-create".into(),
                code: 55,
                stderr: "ERROR: [055]: unable to load info file".into(),
            });
        }
        Ok(())
    }

    async fn check(&self, stanza: &StanzaName) -> Result<()> {
        self.record(format!("check {}", stanza));
        if *self.fail_check.lock().unwrap() {
            return Err(Error::ToolFailed {
                command: "check".into(),
                code: 82,
                stderr: "ERROR: [082]: WAL segment was not archived".into(),
            });
        }
        Ok(())
    }

    async fn backup(&self, stanza: &StanzaName) -> Result<String> {
        self.record(format!("backup {}", stanza));
        Ok("backup complete".into())
    }

    async fn restore(&self, stanza: &StanzaName, label: &str) -> Result<()> {
        self.record(format!("restore {} {}", stanza, label));
        if *self.fail_restore.lock().unwrap() {
            return Err(Error::ToolFailed {
                command: "restore".into(),
                code: 1,
                stderr: "ERROR: restore failed".into(),
            });
        }
        Ok(())
    }
}

/// Records every call in order
#[derive(Default)]
pub struct FakeWorkload {
    pub calls: Mutex<Vec<String>>,
    /// Call that answers with an error, after being recorded
    pub fail_on: Mutex<Option<&'static str>>,
}

impl FakeWorkload {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn record(&self, call: &str) -> Result<()> {
        self.calls.lock().unwrap().push(call.to_string());
        if self.fail_on.lock().unwrap().is_some_and(|f| f == call) {
            return Err(Error::Io(std::io::Error::other(format!("{call} failed"))));
        }
        Ok(())
    }
}

#[async_trait]
impl Workload for FakeWorkload {
    async fn update_config(&self, force: bool) -> Result<()> {
        self.record(if force {
            "update_config(force)"
        } else {
            "update_config"
        })
    }

    async fn stop_database(&self) -> Result<()> {
        self.record("stop_database")
    }

    async fn start_database(&self) -> Result<()> {
        self.record("start_database")
    }

    async fn empty_data_files(&self) -> Result<()> {
        self.record("empty_data_files")
    }

    async fn start_backup_agent(&self) -> Result<()> {
        self.record("start_backup_agent")
    }

    async fn stop_backup_agent(&self) -> Result<()> {
        self.record("stop_backup_agent")
    }
}

/// Write counter whose per-member answers the test scripts
#[derive(Default)]
pub struct FakeCounter {
    pub primary: Mutex<u64>,
    pub members: Mutex<HashMap<String, u64>>,
}

impl FakeCounter {
    pub fn set_primary(&self, count: u64) {
        *self.primary.lock().unwrap() = count;
    }

    pub fn set_member(&self, member: &str, count: u64) {
        self.members
            .lock()
            .unwrap()
            .insert(member.to_string(), count);
    }
}

#[async_trait]
impl WriteCounter for FakeCounter {
    async fn count(&self, member: Option<&str>) -> Result<u64> {
        match member {
            None => Ok(*self.primary.lock().unwrap()),
            Some(member) => self
                .members
                .lock()
                .unwrap()
                .get(member)
                .copied()
                .ok_or_else(|| Error::ConnectionFailed(member.to_string())),
        }
    }
}

pub fn s3_data() -> BTreeMap<String, String> {
    [
        ("bucket", "backups"),
        ("access-key", "AKIA"),
        ("secret-key", "secret"),
        ("path", "/pg"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn attached_s3() -> Arc<S3Settings> {
    let s3 = Arc::new(S3Settings::new());
    s3.attach(Arc::new(StaticS3(s3_data())));
    s3
}

pub fn stanza(name: &str, labels: &[&str]) -> StanzaInfo {
    StanzaInfo {
        name: name.to_string(),
        backup: labels
            .iter()
            .map(|label| BackupInfo {
                label: label.to_string(),
                kind: "full".into(),
                error: false,
                timestamp: Some(BackupTimestamp {
                    start: 1_672_563_600,
                    stop: 1_672_563_700,
                }),
            })
            .collect(),
    }
}

/// Fast retries and files under `dir`
pub fn backup_config(dir: &Path) -> BackupConfig {
    BackupConfig {
        conf_path: dir.join("pgbackrest.conf"),
        data_dir: dir.join("data"),
        retry_attempts: 2,
        retry_backoff_ms: 1,
        ..BackupConfig::default()
    }
}

/// Agent configuration for `unit` in namespace `prod`
pub fn agent_config(unit: &str, planned_units: usize, dir: &Path) -> Config {
    let mut config = Config::default();
    config.unit.name = unit.to_string();
    if let Some((app, _)) = unit.rsplit_once('/') {
        config.unit.app = app.to_string();
    }
    config.unit.namespace = "prod".into();
    config.unit.planned_units = planned_units;
    config.unit.peer_state_path = dir.join("peers.json");
    config.backup = backup_config(dir);
    config
}
