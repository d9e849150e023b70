//! Per-task state machine and monitor loop.
//!
//! A `TaskHandle` is owned exclusively by the coordinator from creation by
//! `StartTask`/`RecoverTask` until `DestroyTask`. Its process-state fields are
//! guarded by one lock so the monitor (write) and `InspectTask`/`GetStats`
//! (read) never race.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, RwLock};
use tokio::time::{interval, Duration};
use tracing::{debug, info, instrument, warn};

use virt_driver_hypervisor::network::TeardownSpec;
use virt_driver_hypervisor::{DomainState, Hypervisor};

use crate::types::{ExitResult, ProcessState, TaskConfig, TaskStats};

const MONITOR_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Mutable fields guarded by `TaskHandle::state`, per the invariant that
/// `completed_at` is set iff `process_state == Exited`.
struct HandleState {
    process_state: ProcessState,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    exit_result: Option<ExitResult>,
}

/// The coordinator's in-process view of one running task.
///
/// Holds a reference to the hypervisor query capability only — never to the
/// underlying connection — so cloning a handle never risks reaching past the
/// narrow `Hypervisor` boundary (Design note: cyclic references avoided by a
/// narrow `DomainGetter`-shaped capability rather than a back-pointer to the
/// driver).
pub struct TaskHandle {
    domain_name: String,
    config: TaskConfig,
    hypervisor: Arc<dyn Hypervisor>,
    state: RwLock<HandleState>,
    teardown_spec: RwLock<TeardownSpec>,
    /// Guards the monitor loop against being spawned twice for one handle.
    monitor_started: AtomicBool,
    exit_tx: RwLock<Option<oneshot::Sender<ExitResult>>>,
    exit_rx: RwLock<Option<oneshot::Receiver<ExitResult>>>,
    cancel: RwLock<Option<oneshot::Sender<()>>>,
}

impl TaskHandle {
    pub fn new(
        domain_name: String,
        config: TaskConfig,
        hypervisor: Arc<dyn Hypervisor>,
        teardown_spec: TeardownSpec,
    ) -> Self {
        let (exit_tx, exit_rx) = oneshot::channel();
        Self {
            domain_name,
            config,
            hypervisor,
            state: RwLock::new(HandleState {
                process_state: ProcessState::Running,
                started_at: Utc::now(),
                completed_at: None,
                exit_result: None,
            }),
            teardown_spec: RwLock::new(teardown_spec),
            monitor_started: AtomicBool::new(false),
            exit_tx: RwLock::new(Some(exit_tx)),
            exit_rx: RwLock::new(Some(exit_rx)),
            cancel: RwLock::new(None),
        }
    }

    /// Rebuilds a handle for `RecoverTask`, seeding process state from the
    /// live domain rather than assuming `Running`.
    pub fn recovered(
        domain_name: String,
        config: TaskConfig,
        hypervisor: Arc<dyn Hypervisor>,
        teardown_spec: TeardownSpec,
        started_at: DateTime<Utc>,
        process_state: ProcessState,
    ) -> Self {
        let handle = Self::new(domain_name, config, hypervisor, teardown_spec);
        handle.state.try_write().unwrap().started_at = started_at;
        handle.state.try_write().unwrap().process_state = process_state;
        handle
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub async fn teardown_spec(&self) -> TeardownSpec {
        self.teardown_spec.read().await.clone()
    }

    /// Current projection for `InspectTask`: `(process_state, started_at,
    /// completed_at, exit_result)`.
    pub async fn snapshot(&self) -> (ProcessState, DateTime<Utc>, Option<DateTime<Utc>>, Option<ExitResult>) {
        let state = self.state.read().await;
        (state.process_state, state.started_at, state.completed_at, state.exit_result.clone())
    }

    /// `GetStats`: a single `GetDomain` projected into the
    /// scheduler's resource-usage shape.
    pub async fn stats(&self) -> Result<TaskStats, crate::error::DriverError> {
        let info = self
            .hypervisor
            .get_domain(&self.domain_name)
            .await?
            .ok_or_else(|| crate::error::DriverError::TaskNotFound(self.domain_name.clone()))?;
        Ok(TaskStats {
            memory_usage_bytes: info.memory_bytes,
            max_memory_bytes: info.max_memory_bytes,
            cpu_throttled_time_ns: info.cpu_time_ns,
        })
    }

    /// Returns a receiver that will either receive exactly one exit result
    /// or be closed when the monitor's context is cancelled. Calling this on
    /// an already-exited task still returns a channel that immediately
    /// yields the exit result: the monitor remains registered until
    /// `DestroyTask`, and the exit result is replayed rather than
    /// re-delivered from a dead sender.
    pub async fn wait(&self) -> oneshot::Receiver<ExitResult> {
        let existing = { self.state.read().await.exit_result.clone() };
        if let Some(result) = existing {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(result);
            return rx;
        }
        let mut rx_slot = self.exit_rx.write().await;
        if let Some(rx) = rx_slot.take() {
            return rx;
        }
        // A second live waiter arrived before the first exit result landed;
        // hand back a channel that closes immediately rather than panic —
        // the monitor already owns the one real sender.
        let (_tx, rx) = oneshot::channel();
        rx
    }

    /// Spawns the monitor loop exactly once per handle. Returns immediately
    /// if already spawned (e.g. a second `StartTask`-adjacent call raced
    /// in).
    pub fn spawn_monitor(self: &Arc<Self>) {
        if self.monitor_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            handle.run_monitor().await;
        });
    }

    /// Seeds an already-terminal state directly, without waiting for the
    /// monitor's next tick — used by `RecoverTask` when the domain is
    /// already in a terminal state at recovery time.
    pub async fn seed_terminal(&self, result: ExitResult) {
        self.finish(result).await;
    }

    /// Signals the monitor to stop polling without producing an exit
    /// result. Used by `DestroyTask` so the loop doesn't keep polling a
    /// domain the driver is about to remove.
    pub async fn cancel_monitor(&self) {
        if let Some(tx) = self.cancel.write().await.take() {
            let _ = tx.send(());
        }
    }

    #[instrument(skip(self), fields(domain = %self.domain_name))]
    async fn run_monitor(&self) {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        *self.cancel.write().await = Some(cancel_tx);

        let mut ticker = interval(MONITOR_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.poll_once().await {
                        return;
                    }
                }
                _ = &mut cancel_rx => {
                    debug!("monitor cancelled");
                    return;
                }
            }
        }
    }

    /// Returns `true` once a terminal state has been recorded and the
    /// monitor should stop.
    async fn poll_once(&self) -> bool {
        match self.hypervisor.get_domain(&self.domain_name).await {
            Err(e) => {
                warn!(error = %e, "monitor: domain query failed, marking state unknown");
                self.state.write().await.process_state = ProcessState::Unknown;
                false
            }
            Ok(None) => {
                self.finish(ExitResult::task_not_found()).await;
                true
            }
            Ok(Some(info)) => match info.state {
                DomainState::Crashed => {
                    self.finish(ExitResult::task_crashed()).await;
                    true
                }
                DomainState::Shutdown | DomainState::ShutOff => {
                    self.finish(ExitResult::success()).await;
                    true
                }
                DomainState::Running => {
                    self.state.write().await.process_state = ProcessState::Running;
                    false
                }
                DomainState::Unknown(ref s) => {
                    self.finish(ExitResult::unexpected_state(s)).await;
                    true
                }
            },
        }
    }

    async fn finish(&self, result: ExitResult) {
        {
            let mut state = self.state.write().await;
            state.process_state = ProcessState::Exited;
            state.completed_at = Some(Utc::now());
            state.exit_result = Some(result.clone());
        }
        info!(exit_code = result.exit_code, error = ?result.error, "task exited");
        if let Some(tx) = self.exit_tx.write().await.take() {
            let _ = tx.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use virt_driver_hypervisor::mock::MockHypervisor;

    fn config() -> TaskConfig {
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

    async fn handle_with_running_domain() -> (Arc<TaskHandle>, Arc<MockHypervisor>) {
        let hv = Arc::new(MockHypervisor::new());
        hv.create(virt_driver_hypervisor::DomainConfig::new("web-0001")).await.unwrap();
        let handle = Arc::new(TaskHandle::new(
            "web-0001".to_string(),
            config(),
            hv.clone() as Arc<dyn Hypervisor>,
            TeardownSpec::default(),
        ));
        (handle, hv)
    }

    #[tokio::test]
    async fn monitor_terminates_exactly_once_on_crash() {
        let (handle, hv) = handle_with_running_domain().await;
        handle.spawn_monitor();

        hv.set_state("web-0001", DomainState::Crashed).unwrap();

        let result = handle.wait().await.await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.error.as_deref(), Some("ErrTaskCrashed"));

        let (state, _, completed_at, exit) = handle.snapshot().await;
        assert_eq!(state, ProcessState::Exited);
        assert!(completed_at.is_some());
        assert!(exit.is_some());
    }

    #[tokio::test]
    async fn unknown_domain_state_maps_to_terminal_exit_with_detail() {
        let hv = Arc::new(MockHypervisor::new());
        let handle = Arc::new(TaskHandle::new(
            "ghost".to_string(),
            config(),
            hv.clone() as Arc<dyn Hypervisor>,
            TeardownSpec::default(),
        ));

        hv.create(virt_driver_hypervisor::DomainConfig::new("ghost")).await.unwrap();
        assert!(!handle.poll_once().await);
        let (state, _, _, _) = handle.snapshot().await;
        assert_eq!(state, ProcessState::Running);

        hv.set_state("ghost", DomainState::Unknown("paused".to_string())).unwrap();
        assert!(handle.poll_once().await);
        let (state, _, _, exit) = handle.snapshot().await;
        assert_eq!(state, ProcessState::Exited);
        assert!(exit.unwrap().error.unwrap().contains("unexpected state"));
    }

    #[tokio::test]
    async fn wait_on_already_exited_task_still_returns_result() {
        let (handle, hv) = handle_with_running_domain().await;
        handle.spawn_monitor();
        hv.set_state("web-0001", DomainState::ShutOff).unwrap();
        let first = handle.wait().await.await.unwrap();
        assert_eq!(first.exit_code, 0);

        let second = handle.wait().await.await.unwrap();
        assert_eq!(second.exit_code, 0);
    }

    #[tokio::test]
    async fn shutdown_maps_to_successful_exit() {
        let (handle, hv) = handle_with_running_domain().await;
        hv.set_state("web-0001", DomainState::Shutdown).unwrap();
        assert!(handle.poll_once().await);
        let (_, _, _, exit) = handle.snapshot().await;
        assert_eq!(exit.unwrap().exit_code, 0);
    }
}
