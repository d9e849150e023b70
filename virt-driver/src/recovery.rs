//! Recovery blob: `{taskConfig, startedAt, teardownSpec}`,
//! persisted by the scheduler on the driver's behalf so `RecoverTask` can
//! rebuild a handle after the plugin itself restarts.
//!
//! The scheduler's own persistence mechanism is out of scope; `RecoveryRecord`
//! is a plain `serde`-serializable struct so any host process (a file, a
//! key-value store, an RPC payload) can carry it opaquely. The bundled
//! to-disk helper uses JSON, matching the rest of the corpus's use of
//! `serde_json` for tool output.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use virt_driver_hypervisor::network::TeardownSpec;

use crate::error::{DriverError, Result};
use crate::types::TaskConfig;

/// Schema stability is required across driver upgrades within a major
/// version: new optional fields are permitted, removals are not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub task_config: TaskConfig,
    pub started_at: DateTime<Utc>,
    pub teardown_spec: TeardownSpec,
}

/// File-backed store for recovery records, one JSON file per task id under
/// `dir`. Not the only valid transport — a real deployment may have the
/// scheduler carry this blob itself — but gives the plugin binary something
/// concrete to recover across its own restarts.
pub struct RecoveryStore {
    dir: PathBuf,
}

impl RecoveryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", task_id.replace('/', "_")))
    }

    pub fn persist(&self, task_id: &str, record: &RecoveryRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| DriverError::ConfigInvalid(format!("cannot create recovery dir: {e}")))?;
        let path = self.path_for(task_id);
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| DriverError::ConfigInvalid(format!("cannot serialize recovery record: {e}")))?;
        std::fs::write(&path, json)
            .map_err(|e| DriverError::ConfigInvalid(format!("cannot write recovery record {}: {e}", path.display())))?;
        Ok(())
    }

    pub fn load(&self, task_id: &str) -> Result<RecoveryRecord> {
        let path = self.path_for(task_id);
        self.load_path(&path)
    }

    fn load_path(&self, path: &Path) -> Result<RecoveryRecord> {
        let bytes = std::fs::read(path)
            .map_err(|_| DriverError::TaskNotFound(format!("no recovery record for {}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DriverError::ConfigInvalid(format!("malformed recovery record {}: {e}", path.display())))
    }

    pub fn remove(&self, task_id: &str) {
        let _ = std::fs::remove_file(self.path_for(task_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_config() -> TaskConfig {
        TaskConfig {
            image_path: "/var/lib/virt-driver/images/base.qcow2".to_string(),
            thin_copy: false,
            memory_mib: 512,
            cpuset: "0".to_string(),
            ports: vec![],
            bridge: "br0".to_string(),
            guest_ip: None,
            env: HashMap::new(),
            ssh_keys: vec![],
            user_data: None,
            alloc_dir: "/alloc".to_string(),
            local_dir: "/local".to_string(),
            secrets_dir: "/secrets".to_string(),
        }
    }

    #[test]
    fn round_trips_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::new(dir.path());
        let record = RecoveryRecord {
            task_config: sample_config(),
            started_at: Utc::now(),
            teardown_spec: TeardownSpec::default(),
        };
        store.persist("alloc02/db/0002", &record).unwrap();

        let loaded = store.load("alloc02/db/0002").unwrap();
        assert_eq!(loaded.task_config.memory_mib, 512);
    }

    #[test]
    fn missing_record_is_task_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::new(dir.path());
        let err = store.load("nope/nope/nope").unwrap_err();
        assert!(matches!(err, DriverError::TaskNotFound(_)));
    }

    #[test]
    fn remove_then_load_is_task_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::new(dir.path());
        let record = RecoveryRecord {
            task_config: sample_config(),
            started_at: Utc::now(),
            teardown_spec: TeardownSpec::default(),
        };
        store.persist("a/b/c", &record).unwrap();
        store.remove("a/b/c");
        assert!(store.load("a/b/c").is_err());
    }
}
