//! Process-local, concurrency-safe map from task id to handle.
//!
//! Grounded in the `Arc<RwLock<HashMap<...>>>` cache idiom used throughout
//! the daemon's own in-memory caches (`agent_cache`, `network_ports`).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::handle::TaskHandle;

#[derive(Default)]
pub struct TaskStore {
    inner: RwLock<HashMap<String, Arc<TaskHandle>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, task_id: &str) -> Option<Arc<TaskHandle>> {
        self.inner.read().await.get(task_id).cloned()
    }

    pub async fn contains(&self, task_id: &str) -> bool {
        self.inner.read().await.contains_key(task_id)
    }

    /// Overwrites any existing entry for `task_id`.
    pub async fn set(&self, task_id: String, handle: Arc<TaskHandle>) {
        self.inner.write().await.insert(task_id, handle);
    }

    /// A no-op if `task_id` is absent.
    pub async fn delete(&self, task_id: &str) {
        self.inner.write().await.remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TaskHandle;
    use crate::types::{ProcessState, TaskConfig};
    use std::collections::HashMap as StdHashMap;
    use virt_driver_hypervisor::mock::MockHypervisor;
    use virt_driver_hypervisor::network::TeardownSpec;

    fn sample_config() -> TaskConfig {
        TaskConfig {
            image_path: "/var/lib/virt-driver/images/base.qcow2".to_string(),
            thin_copy: false,
            memory_mib: 512,
            cpuset: "0".to_string(),
            ports: vec![],
            bridge: "br0".to_string(),
            guest_ip: None,
            env: StdHashMap::new(),
            ssh_keys: vec![],
            user_data: None,
            alloc_dir: "/alloc".to_string(),
            local_dir: "/local".to_string(),
            secrets_dir: "/secrets".to_string(),
        }
    }

    fn sample_handle() -> Arc<TaskHandle> {
        Arc::new(TaskHandle::new(
            "web-0001".to_string(),
            sample_config(),
            Arc::new(MockHypervisor::new()),
            TeardownSpec::default(),
        ))
    }

    #[tokio::test]
    async fn store_rejects_duplicate_task_ids() {
        let store = TaskStore::new();
        let handle = sample_handle();
        store.set("alloc01/web/0001".to_string(), handle.clone()).await;

        let got = store.get("alloc01/web/0001").await;
        assert!(got.is_some());
        assert_eq!(got.unwrap().domain_name(), "web-0001");

        store.delete("alloc01/web/0001").await;
        assert!(store.get("alloc01/web/0001").await.is_none());
    }

    #[tokio::test]
    async fn delete_on_absent_id_is_a_no_op() {
        let store = TaskStore::new();
        store.delete("does-not-exist").await;
    }

    #[tokio::test]
    async fn set_overwrites_existing_entry() {
        let store = TaskStore::new();
        store.set("t".to_string(), sample_handle()).await;
        let replacement = sample_handle();
        store.set("t".to_string(), replacement.clone()).await;
        assert!(Arc::ptr_eq(&store.get("t").await.unwrap(), &replacement));
    }
}
