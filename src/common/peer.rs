//! Peer-shared key/value state
//!
//! Every unit of the application sees the same flat mapping at two scopes:
//! one application bag and one bag per unit. Application-scope writes go
//! through an [`AppWriter`], which can only be obtained while the caller
//! holds application leadership. Unit bags are written by their owner.
//!
//! Backends are pluggable: [`MemStore`] for tests and single-process use,
//! [`FileStore`] for state persisted as JSON next to the agent.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

/// Application-scope key holding the claimed stanza name
pub const STANZA_KEY: &str = "stanza";
/// Unit-scope key, "True" when TLS is enabled on the unit
pub const TLS_KEY: &str = "tls";
/// Application-scope key holding the operator password
pub const OPERATOR_PASSWORD_KEY: &str = "operator-password";
/// Application-scope key set while a restore is in progress
pub const RESTORING_BACKUP_KEY: &str = "restoring-backup";

/// Full contents of the peer state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    #[serde(default)]
    pub app: BTreeMap<String, String>,
    #[serde(default)]
    pub units: BTreeMap<String, BTreeMap<String, String>>,
}

/// Trait for peer state backends
pub trait PeerStore: Send + Sync {
    fn load(&self) -> Result<PeerSnapshot>;
    fn save(&self, snapshot: &PeerSnapshot) -> Result<()>;
}

/// In-memory store
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<PeerSnapshot>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerStore for MemStore {
    fn load(&self) -> Result<PeerSnapshot> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, snapshot: &PeerSnapshot) -> Result<()> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();
        Ok(())
    }
}

/// JSON file store, replaced atomically on every save
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PeerStore for FileStore {
    fn load(&self) -> Result<PeerSnapshot> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::PeerStateCorrupted(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PeerSnapshot::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, snapshot: &PeerSnapshot) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Source of truth for "is this unit the application leader right now"
pub trait Leadership: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Cached, write-through view over a [`PeerStore`]
pub struct PeerData {
    store: Arc<dyn PeerStore>,
    cache: RwLock<PeerSnapshot>,
}

impl PeerData {
    pub fn open(store: Arc<dyn PeerStore>) -> Result<Self> {
        let cache = RwLock::new(store.load()?);
        Ok(Self { store, cache })
    }

    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemStore::new()),
            cache: RwLock::new(PeerSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn app_get(&self, key: &str) -> Option<String> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .app
            .get(key)
            .cloned()
    }

    pub fn unit_get(&self, unit: &str, key: &str) -> Option<String> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .units
            .get(unit)
            .and_then(|bag| bag.get(key))
            .cloned()
    }

    /// Write a key in `unit`'s own bag
    pub fn unit_set(&self, unit: &str, key: &str, value: &str) -> Result<()> {
        self.mutate(|snap| {
            snap.units
                .entry(unit.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
        })
    }

    /// Whether TLS is enabled on `unit`
    pub fn tls_enabled(&self, unit: &str) -> bool {
        self.unit_get(unit, TLS_KEY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Obtain write access to the application bag.
    pub fn app_writer<'a>(&'a self, leadership: &dyn Leadership) -> Result<AppWriter<'a>> {
        if !leadership.is_leader() {
            return Err(Error::NotLeader(
                "only the application leader may write application peer state".into(),
            ));
        }
        Ok(AppWriter { data: self })
    }

    fn mutate(&self, f: impl FnOnce(&mut PeerSnapshot)) -> Result<()> {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let mut next = cache.clone();
        f(&mut next);
        if next != *cache {
            self.store.save(&next)?;
            *cache = next;
        }
        Ok(())
    }
}

/// Leader-only handle on the application bag
pub struct AppWriter<'a> {
    data: &'a PeerData,
}

impl AppWriter<'_> {
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data.mutate(|snap| {
            snap.app.insert(key.to_string(), value.to_string());
        })
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.data.mutate(|snap| {
            snap.app.remove(key);
        })
    }
}
