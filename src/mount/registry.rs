//! Registry of active mounts
//!
//! A small key-value store keyed by mount target. The supervisor records each
//! mount here so a later run can find mounts whose owner died and clean them
//! up. No transactional guarantees: last write wins.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FuseBridgeError, Result};

/// One registered mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    pub backend_name: String,
    pub source: String,
    pub mount_target: PathBuf,
    /// Process serving the mount (the daemon child for daemonized mounts)
    pub process_id: u32,
    pub alive: bool,
}

/// get/set/delete store for [`MountRecord`]s keyed by mount target
pub trait MountRegistry: Send + Sync {
    fn get(&self, mount_target: &Path) -> Result<Option<MountRecord>>;

    fn set(&self, record: MountRecord) -> Result<()>;

    fn delete(&self, mount_target: &Path) -> Result<()>;

    fn list(&self) -> Result<Vec<MountRecord>>;
}

/// Registry living only as long as the process
#[derive(Default)]
pub struct MemoryRegistry {
    records: DashMap<PathBuf, MountRecord>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MountRegistry for MemoryRegistry {
    fn get(&self, mount_target: &Path) -> Result<Option<MountRecord>> {
        Ok(self.records.get(mount_target).map(|r| r.clone()))
    }

    fn set(&self, record: MountRecord) -> Result<()> {
        self.records.insert(record.mount_target.clone(), record);
        Ok(())
    }

    fn delete(&self, mount_target: &Path) -> Result<()> {
        self.records.remove(mount_target);
        Ok(())
    }

    fn list(&self) -> Result<Vec<MountRecord>> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }
}

/// Registry persisted as a YAML file, shared between daemon runs
pub struct FileRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

type RecordMap = BTreeMap<PathBuf, MountRecord>;

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<RecordMap> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RecordMap::new()),
            Err(e) => return Err(FuseBridgeError::Io(e)),
        };
        if content.trim().is_empty() {
            return Ok(RecordMap::new());
        }
        match serde_yaml::from_str::<Vec<MountRecord>>(&content) {
            Ok(records) => Ok(records
                .into_iter()
                .map(|r| (r.mount_target.clone(), r))
                .collect()),
            Err(e) => {
                warn!("Ignoring unreadable mount registry {:?}: {}", self.path, e);
                Ok(RecordMap::new())
            }
        }
    }

    fn store(&self, records: &RecordMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let list: Vec<&MountRecord> = records.values().collect();
        let content = serde_yaml::to_string(&list)
            .map_err(|e| FuseBridgeError::Config(format!("serialize mount registry: {}", e)))?;

        // Write-then-rename so readers never see a half-written file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        debug!("mount registry {:?} now has {} record(s)", self.path, list.len());
        Ok(())
    }

    fn update<F: FnOnce(&mut RecordMap)>(&self, f: F) -> Result<()> {
        let _guard = self.lock.lock();
        let mut records = self.load()?;
        f(&mut records);
        self.store(&records)
    }
}

impl MountRegistry for FileRegistry {
    fn get(&self, mount_target: &Path) -> Result<Option<MountRecord>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(mount_target))
    }

    fn set(&self, record: MountRecord) -> Result<()> {
        self.update(|records| {
            records.insert(record.mount_target.clone(), record);
        })
    }

    fn delete(&self, mount_target: &Path) -> Result<()> {
        self.update(|records| {
            records.remove(mount_target);
        })
    }

    fn list(&self) -> Result<Vec<MountRecord>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.into_values().collect())
    }
}
