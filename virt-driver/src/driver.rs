//! The coordinator: glue between the scheduler's task lifecycle verbs
//! and the hypervisor/network/image subsystems. Each verb is synchronous
//! except `wait_task` and `task_stats`, which hand back channels.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Duration;
use tracing::{error, info, warn};

use virt_driver_hypervisor::image::{create_overlay, detect_format, resolve_allowed, AllowedRoots};
use virt_driver_hypervisor::network::{derive_fallback_guest_ip, NetworkCapability, NetworkRequest};
use virt_driver_hypervisor::types::{DiskSpec, DomainConfig, DomainState, MountSpec, NicSpec};
use virt_driver_hypervisor::Hypervisor;

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::handle::TaskHandle;
use crate::recovery::{RecoveryRecord, RecoveryStore};
use crate::taskid::derive_domain_name;
use crate::taskstore::TaskStore;
use crate::types::{ExitResult, ProcessState, TaskConfig, TaskEvent, TaskEventKind, TaskInspection, TaskStats};

/// Capacity of the in-process task-event broadcast channel. Slow or absent
/// subscribers simply miss old events; this is a notification fan-out, not
/// a durable log.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Serves the scheduler's verbs: `StartTask`, `WaitTask`, `StopTask`,
/// `DestroyTask`, `RecoverTask`, `InspectTask`, `TaskEvents`,
/// `SignalTask`/`ExecTask` (unsupported).
pub struct Driver {
    config: DriverConfig,
    store: TaskStore,
    hypervisor: Arc<dyn Hypervisor>,
    network: Arc<dyn NetworkCapability>,
    recovery: RecoveryStore,
    events: broadcast::Sender<TaskEvent>,
}

impl Driver {
    pub fn new(config: DriverConfig, hypervisor: Arc<dyn Hypervisor>, network: Arc<dyn NetworkCapability>) -> Self {
        let recovery = RecoveryStore::new(config.recovery_dir());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { config, store: TaskStore::new(), hypervisor, network, recovery, events }
    }

    /// `Init`/`SetConfig`: makes the data dir, starts the hypervisor
    /// connection, and installs the network chains/jumps. Safe to call more
    /// than once — the hypervisor `start` call and the network controller's
    /// own install-once flag make repeated calls idempotent.
    pub async fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config.data_dir)
            .map_err(|e| DriverError::ConfigInvalid(format!("cannot create data dir: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o777);
            let _ = std::fs::set_permissions(&self.config.data_dir, perms);
        }

        self.hypervisor.start(&self.config.data_dir).await?;
        self.network.init().map_err(DriverError::from)?;
        info!(data_dir = %self.config.data_dir, "driver initialized");
        Ok(())
    }

    /// A receiver of task lifecycle events, forwarded from the in-process
    /// eventer.
    pub fn task_events(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn publish(&self, task_id: &str, kind: TaskEventKind) {
        let _ = self.events.send(TaskEvent { task_id: task_id.to_string(), kind });
    }

    /// `StartTask`: validates/prepares the image, invokes
    /// `Hypervisor::create`, programs networking, persists the recovery
    /// blob, and installs the handle in the store — in that order, so a
    /// concurrent `Inspect` before completion sees `TaskNotFound`.
    pub async fn start_task(&self, task_id: &str, task_config: TaskConfig) -> Result<Arc<TaskHandle>> {
        if self.store.contains(task_id).await {
            return Err(DriverError::ConfigInvalid(format!("task {task_id} already exists")));
        }
        let domain_name = derive_domain_name(task_id)?;

        let mut allowed = AllowedRoots::new()
            .with_data_dir(&self.config.data_dir)
            .with_alloc_dir(&task_config.alloc_dir);
        for root in &self.config.extra_allowed_image_roots {
            allowed = allowed.with_extra(root);
        }

        let base_path = PathBuf::from(&task_config.image_path);
        resolve_allowed(&base_path, &allowed)?;
        let detected = detect_format(&base_path)?;

        let (disk_path, disk_format) = if task_config.thin_copy {
            if task_config.memory_mib == 0 {
                return Err(DriverError::ConfigInvalid("thin copy requires memory_mib > 0".to_string()));
            }
            // Overlay size is coupled to the task's memory allocation.
            // Kept as observed rather than silently "fixed" — see DESIGN.md.
            warn!(
                domain = %domain_name,
                memory_mib = task_config.memory_mib,
                "sizing thin-copy overlay to the task's memory allocation (observed upstream policy, not a deliberate disk-size request)"
            );
            let overlay_dest = Path::new(&self.config.data_dir).join(format!("{domain_name}.qcow2"));
            create_overlay(&base_path, &overlay_dest, task_config.memory_mib)?;
            (overlay_dest.to_string_lossy().into_owned(), "qcow2".to_string())
        } else {
            (task_config.image_path.clone(), detected.format.clone())
        };

        let vcpus = parse_cpuset(&task_config.cpuset)?;

        let mounts = vec![
            MountSpec::new("allocDir", &task_config.alloc_dir, "/alloc"),
            MountSpec::new("localDir", &task_config.local_dir, "/local"),
            MountSpec::new("secretsDir", &task_config.secrets_dir, "/secrets"),
        ];
        let boot_commands: Vec<String> = mounts.iter().flat_map(|m| m.boot_commands()).collect();
        let extra_files = crate::cloudinit::build_guest_files(&task_config.env, &task_config.ssh_keys);

        let mut domain_config = DomainConfig::new(domain_name.clone())
            .with_memory_mib(task_config.memory_mib)
            .with_vcpus(vcpus)
            .with_cpuset(task_config.cpuset.clone())
            .with_disk(DiskSpec::new(disk_path, disk_format))
            .with_nic(NicSpec { bridge: task_config.bridge.clone(), hw_addr: None });
        for mount in mounts {
            domain_config = domain_config.with_mount(mount);
        }
        domain_config.extra_files = extra_files;
        domain_config.cloud_init_user_data = task_config.user_data.clone();
        domain_config.boot_commands = boot_commands;

        self.hypervisor.create(domain_config).await?;

        let guest_ip = task_config
            .guest_ip
            .unwrap_or_else(|| IpAddr::V4(derive_fallback_guest_ip(&domain_name, self.config.guest_subnet)));

        let net_req = NetworkRequest {
            domain_name: domain_name.clone(),
            ports: task_config.ports.clone(),
            bridge: task_config.bridge.clone(),
            guest_ip,
        };

        let teardown_spec = self.network.vm_started_build(&net_req).await.map_err(|e| {
            error!(
                domain = %domain_name,
                rules_installed = e.partial.rules.len(),
                "network install failed mid-sequence; already-installed rules are orphaned until a later destroy reaps them"
            );
            DriverError::NetworkInstallFailed(e.to_string())
        })?;

        let handle = Arc::new(TaskHandle::new(
            domain_name.clone(),
            task_config.clone(),
            self.hypervisor.clone(),
            teardown_spec.clone(),
        ));
        handle.spawn_monitor();

        self.recovery.persist(
            task_id,
            &RecoveryRecord { task_config, started_at: Utc::now(), teardown_spec },
        )?;

        self.store.set(task_id.to_string(), handle.clone()).await;
        self.publish(task_id, TaskEventKind::Started);

        Ok(handle)
    }

    /// `RecoverTask`: deserializes the recovery blob, queries the
    /// hypervisor for the live domain, and rebuilds a handle with
    /// `process_state` mapped from the live domain state.
    pub async fn recover_task(&self, task_id: &str) -> Result<Arc<TaskHandle>> {
        let record = self.recovery.load(task_id)?;
        let domain_name = derive_domain_name(task_id)?;
        let info = self
            .hypervisor
            .get_domain(&domain_name)
            .await?
            .ok_or_else(|| DriverError::TaskNotFound(domain_name.clone()))?;

        let process_state = match &info.state {
            DomainState::Running => ProcessState::Running,
            DomainState::Shutdown | DomainState::ShutOff | DomainState::Crashed => ProcessState::Exited,
            DomainState::Unknown(_) => ProcessState::Unknown,
        };

        let handle = Arc::new(TaskHandle::recovered(
            domain_name,
            record.task_config,
            self.hypervisor.clone(),
            record.teardown_spec,
            record.started_at,
            process_state,
        ));

        if process_state == ProcessState::Running {
            handle.spawn_monitor();
        } else {
            let exit = match info.state {
                DomainState::Crashed => ExitResult::task_crashed(),
                DomainState::Shutdown | DomainState::ShutOff => ExitResult::success(),
                DomainState::Unknown(ref s) => ExitResult::unexpected_state(s),
                DomainState::Running => unreachable!(),
            };
            handle.seed_terminal(exit).await;
        }

        self.store.set(task_id.to_string(), handle.clone()).await;
        Ok(handle)
    }

    /// `StopTask`: graceful hypervisor stop, bounded by `grace`; if it does
    /// not complete within the grace period, a force-destroy is performed.
    /// No-op if the task is not in the store.
    pub async fn stop_task(&self, task_id: &str, grace: Duration) -> Result<()> {
        let Some(handle) = self.store.get(task_id).await else {
            return Ok(());
        };

        match tokio::time::timeout(grace, self.hypervisor.stop(handle.domain_name())).await {
            Ok(Ok(())) => {
                self.publish(task_id, TaskEventKind::Stopped);
                Ok(())
            }
            Ok(Err(e)) => Err(DriverError::from(e)),
            Err(_) => {
                warn!(task_id, "graceful stop did not complete within grace period; forcing destroy");
                self.destroy_task(task_id, true).await
            }
        }
    }

    /// `DestroyTask`: refuses if the task is still running and `force` is
    /// false; otherwise destroys the hypervisor domain, tears down network
    /// rules using the handle's teardown spec, then removes it from the
    /// store. Both the hypervisor-destroy and network-teardown are always
    /// attempted; teardown errors are surfaced but do not block removal.
    pub async fn destroy_task(&self, task_id: &str, force: bool) -> Result<()> {
        let domain_name = derive_domain_name(task_id)?;
        let handle = self.store.get(task_id).await;

        if let Some(ref handle) = handle {
            if !force {
                let (state, ..) = handle.snapshot().await;
                if state == ProcessState::Running {
                    return Err(DriverError::TaskStillRunning(task_id.to_string()));
                }
            }
            handle.cancel_monitor().await;
        }

        if let Err(e) = self.hypervisor.destroy(&domain_name).await {
            warn!(domain = %domain_name, error = %e, "hypervisor destroy reported an error; network teardown still attempted");
        }

        let teardown_spec = match &handle {
            Some(handle) => handle.teardown_spec().await,
            None => self.recovery.load(task_id).map(|r| r.teardown_spec).unwrap_or_default(),
        };

        let teardown_result = self.network.vm_terminated_teardown(&teardown_spec);

        self.store.delete(task_id).await;
        self.recovery.remove(task_id);
        self.publish(task_id, TaskEventKind::Destroyed);

        teardown_result.map_err(DriverError::from)
    }

    /// `InspectTask`: the current projection of the handle.
    pub async fn inspect_task(&self, task_id: &str) -> Result<TaskInspection> {
        let handle = self.store.get(task_id).await.ok_or_else(|| DriverError::TaskNotFound(task_id.to_string()))?;
        let (process_state, started_at, completed_at, exit_result) = handle.snapshot().await;
        Ok(TaskInspection {
            domain_name: handle.domain_name().to_string(),
            process_state,
            started_at,
            completed_at,
            exit_result,
        })
    }

    /// `WaitTask`: a channel that receives exactly one exit result, or is
    /// closed on context cancellation by the caller dropping the receiver.
    pub async fn wait_task(&self, task_id: &str) -> Result<oneshot::Receiver<ExitResult>> {
        let handle = self.store.get(task_id).await.ok_or_else(|| DriverError::TaskNotFound(task_id.to_string()))?;
        Ok(handle.wait().await)
    }

    /// `GetStats`: a single `GetDomain` projected into the resource-usage
    /// shape.
    pub async fn task_stats(&self, task_id: &str) -> Result<TaskStats> {
        let handle = self.store.get(task_id).await.ok_or_else(|| DriverError::TaskNotFound(task_id.to_string()))?;
        handle.stats().await
    }

    /// The core does not implement guest signal delivery: the hypervisor
    /// backends in scope here don't offer a uniform way to deliver a Unix
    /// signal into a VM.
    pub fn signal_task(&self, _task_id: &str, _signal: &str) -> Result<()> {
        Err(DriverError::Unsupported("signal".to_string()))
    }

    /// The core does not implement guest exec.
    pub fn exec_task(&self, _task_id: &str, _cmd: &[String]) -> Result<()> {
        Err(DriverError::Unsupported("exec".to_string()))
    }

    /// Publishes per-configured-bridge fingerprint attributes. Errors
    /// from the underlying interface enumeration are logged inside
    /// `NetworkCapability::fingerprint`, never returned.
    pub async fn fingerprint_attrs(&self) -> std::collections::HashMap<String, String> {
        let mut attrs = std::collections::HashMap::new();

        match self.hypervisor.get_info().await {
            Ok(info) => {
                attrs.insert("driver.virt".to_string(), "true".to_string());
                attrs.insert("driver.virt.libvirt.version".to_string(), info.backend_version);
                attrs.insert("driver.virt.emulator.version".to_string(), info.emulator_version);
                attrs.insert("driver.virt.active".to_string(), info.running_count.to_string());
                attrs.insert("driver.virt.inactive".to_string(), info.inactive_count.to_string());
            }
            Err(e) => {
                warn!(error = %e, "fingerprint: hypervisor info query failed");
                attrs.insert("driver.virt".to_string(), "false".to_string());
            }
        }

        for fp in self.network.fingerprint(&self.config.bridges) {
            attrs.insert(format!("driver.virt.network.{}.state", fp.bridge), fp.state.to_string());
            attrs.insert(format!("driver.virt.network.{}.bridge_name", fp.bridge), fp.bridge.clone());
        }

        attrs
    }
}

/// Parses a CPU set string (e.g. `"0-1"`, `"0,2,4"`, `"3"`) into a vCPU
/// count.
fn parse_cpuset(cpuset: &str) -> Result<u32> {
    let mut count = 0u32;
    for part in cpuset.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.trim().parse().map_err(|_| DriverError::ConfigInvalid(format!("invalid cpuset: {cpuset}")))?;
            let end: u32 = end.trim().parse().map_err(|_| DriverError::ConfigInvalid(format!("invalid cpuset: {cpuset}")))?;
            if end < start {
                return Err(DriverError::ConfigInvalid(format!("invalid cpuset range: {cpuset}")));
            }
            count += end - start + 1;
        } else {
            part.parse::<u32>().map_err(|_| DriverError::ConfigInvalid(format!("invalid cpuset: {cpuset}")))?;
            count += 1;
        }
    }
    if count == 0 {
        return Err(DriverError::ConfigInvalid(format!("empty cpuset: {cpuset}")));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    use virt_driver_hypervisor::error::NetworkError;
    use virt_driver_hypervisor::mock::MockHypervisor;
    use virt_driver_hypervisor::network::{FakeRuleBackend, InterfaceResolver, NetworkController};

    struct NoopResolver;
    #[async_trait::async_trait]
    impl InterfaceResolver for NoopResolver {
        async fn resolve(&self, host_ip: IpAddr) -> std::result::Result<String, NetworkError> {
            Ok(format!("eth-{host_ip}"))
        }
    }

    fn driver(data_dir: &Path) -> Driver {
        let hv = Arc::new(MockHypervisor::new());
        let net = Arc::new(NetworkController::new(FakeRuleBackend::new(), NoopResolver));
        let config = DriverConfig {
            data_dir: data_dir.to_string_lossy().into_owned(),
            extra_allowed_image_roots: vec![],
            guest_subnet: Ipv4Addr::new(192, 168, 1, 0),
            bridges: vec!["br0".to_string()],
        };
        Driver::new(config, hv, net)
    }

    fn task_config(image_path: &str) -> TaskConfig {
        TaskConfig {
            image_path: image_path.to_string(),
            thin_copy: false,
            memory_mib: 512,
            cpuset: "0-1".to_string(),
            ports: vec![],
            bridge: "br0".to_string(),
            guest_ip: None,
            env: HashMap::new(),
            ssh_keys: vec![],
            user_data: None,
            alloc_dir: "/tmp/alloc".to_string(),
            local_dir: "/tmp/local".to_string(),
            secrets_dir: "/tmp/secrets".to_string(),
        }
    }

    #[test]
    fn parse_cpuset_range() {
        assert_eq!(parse_cpuset("0-1").unwrap(), 2);
    }

    #[test]
    fn parse_cpuset_list() {
        assert_eq!(parse_cpuset("0,2,4").unwrap(), 3);
    }

    #[test]
    fn parse_cpuset_single() {
        assert_eq!(parse_cpuset("3").unwrap(), 1);
    }

    #[test]
    fn parse_cpuset_empty_is_invalid() {
        assert!(parse_cpuset("").is_err());
    }

    #[tokio::test]
    async fn image_missing_leaves_store_empty() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(dir.path());
        let err = d.start_task("alloc01/web/0001", task_config("/etc/passwd")).await.unwrap_err();
        assert!(matches!(err, DriverError::ImageNotFound(_)));
        assert!(d.inspect_task("alloc01/web/0001").await.is_err());
    }

    #[tokio::test]
    async fn teardown_idempotency_second_destroy_is_a_clean_noop() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(dir.path());
        d.destroy_task("alloc01/web/0001", true).await.unwrap();
        d.destroy_task("alloc01/web/0001", true).await.unwrap();
    }

    #[tokio::test]
    async fn destroy_refuses_running_task_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(dir.path());
        let hv = Arc::new(MockHypervisor::new());
        hv.create(DomainConfig::new("web-0001")).await.unwrap();
        let handle = Arc::new(TaskHandle::new(
            "web-0001".to_string(),
            task_config("/tmp/base.qcow2"),
            hv.clone() as Arc<dyn Hypervisor>,
            Default::default(),
        ));
        d.store.set("alloc01/web/0001".to_string(), handle).await;

        let err = d.destroy_task("alloc01/web/0001", false).await.unwrap_err();
        assert!(matches!(err, DriverError::TaskStillRunning(_)));
    }
}
