//! Local snapshot of managed resources
//!
//! Manages the `.hcloud/state.json` file, which records every resource the
//! provider manages together with its schema version, so stored state can
//! be migrated when a resource's schema changes.

use crate::error::{ProviderError, Result};
use crate::state::{Attributes, ResourceData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const SNAPSHOT_VERSION: u32 = 1;
const STATE_DIR: &str = ".hcloud";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const STAGING_FILE: &str = "state.json.tmp";
const LOCK_FILE: &str = "lock.json";

/// Stored state of all managed resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// File format version
    pub version: u32,

    pub updated_at: DateTime<Utc>,

    /// Resources keyed by `type:name`
    pub resources: BTreeMap<String, StoredResource>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(resource_type: &str, name: &str) -> String {
        format!("{}:{}", resource_type, name)
    }

    pub fn set_resource(&mut self, key: String, resource: StoredResource) {
        self.resources.insert(key, resource);
        self.updated_at = Utc::now();
    }

    pub fn remove_resource(&mut self, key: &str) -> Option<StoredResource> {
        let removed = self.resources.remove(key);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }

    pub fn get_resource(&self, key: &str) -> Option<&StoredResource> {
        self.resources.get(key)
    }

    /// Resources of one type
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a StoredResource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }
}

/// One resource as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResource {
    pub resource_type: String,

    /// Provider-side identifier
    pub id: String,

    #[serde(default)]
    pub schema_version: u32,

    #[serde(default)]
    pub attributes: Attributes,

    pub updated_at: DateTime<Utc>,
}

impl StoredResource {
    pub fn new(resource_type: impl Into<String>, schema_version: u32, data: &ResourceData) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: data.id.clone(),
            schema_version,
            attributes: data.state.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Rebuild handler input from the stored state and a desired configuration
    pub fn to_data(&self, config: Attributes) -> ResourceData {
        ResourceData {
            id: self.id.clone(),
            config,
            state: self.attributes.clone(),
        }
    }
}

/// Files under `<root>/.hcloud`
#[derive(Debug, Clone)]
struct StorePaths {
    dir: PathBuf,
    snapshot: PathBuf,
    backup: PathBuf,
    staging: PathBuf,
    lock: PathBuf,
}

impl StorePaths {
    fn under(root: &Path) -> Self {
        let dir = root.join(STATE_DIR);
        Self {
            snapshot: dir.join(STATE_FILE),
            backup: dir.join(STATE_BACKUP),
            staging: dir.join(STAGING_FILE),
            lock: dir.join(LOCK_FILE),
            dir,
        }
    }
}

/// Persists a [`StateSnapshot`] under a project root
pub struct StateManager {
    paths: StorePaths,
}

impl StateManager {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            paths: StorePaths::under(root.as_ref()),
        }
    }

    /// Load the snapshot; a missing file yields an empty one
    pub async fn load(&self) -> Result<StateSnapshot> {
        let raw = match fs::read_to_string(&self.paths.snapshot).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.paths.snapshot.display(), "No snapshot yet");
                return Ok(StateSnapshot::new());
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: StateSnapshot = serde_json::from_str(&raw)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(ProviderError::InvalidState(format!(
                "snapshot format {} is not supported (expected at most {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        tracing::debug!(resources = snapshot.resources.len(), "Loaded snapshot");
        Ok(snapshot)
    }

    /// Write the snapshot through a staging file; the previous one becomes the backup
    pub async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        fs::create_dir_all(&self.paths.dir).await?;

        let body = serde_json::to_vec_pretty(snapshot)?;
        fs::write(&self.paths.staging, body).await?;

        match fs::copy(&self.paths.snapshot, &self.paths.backup).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::rename(&self.paths.staging, &self.paths.snapshot).await?;

        tracing::debug!(resources = snapshot.resources.len(), "Saved snapshot");
        Ok(())
    }

    /// Take the store lock, replacing a lock left behind for over an hour
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        fs::create_dir_all(&self.paths.dir).await?;
        let holder = LockHolder::current();

        for _ in 0..2 {
            match self.create_lock_file(&holder).await {
                Ok(()) => {
                    tracing::debug!(host = %holder.host, pid = holder.pid, "Acquired state lock");
                    return Ok(StateLock {
                        path: Some(self.paths.lock.clone()),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let existing: LockHolder =
                        serde_json::from_str(&fs::read_to_string(&self.paths.lock).await?)?;
                    if Utc::now() - existing.acquired_at < stale_after() {
                        return Err(ProviderError::LockError(format!(
                            "held by {} (pid {}) since {}",
                            existing.host, existing.pid, existing.acquired_at
                        )));
                    }
                    tracing::warn!(host = %existing.host, since = %existing.acquired_at, "Breaking stale state lock");
                    fs::remove_file(&self.paths.lock).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ProviderError::LockError(
            "lock was taken again while breaking a stale one".to_string(),
        ))
    }

    async fn create_lock_file(&self, holder: &LockHolder) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.paths.lock)
            .await?;
        file.write_all(&serde_json::to_vec(holder)?).await?;
        file.flush().await
    }
}

fn stale_after() -> chrono::Duration {
    chrono::Duration::hours(1)
}

#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    host: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        let host = ["HOSTNAME", "HOST"]
            .iter()
            .find_map(|var| std::env::var(var).ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            host,
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

/// Held store lock; dropping it removes the lock file
pub struct StateLock {
    path: Option<PathBuf>,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if let Some(path) = self.path.take() {
            match fs::remove_file(&path).await {
                Ok(()) => tracing::debug!("Released state lock"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
