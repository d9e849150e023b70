//! Task-facing data model: the decoded task spec, process state, and exit
//! result shapes the coordinator passes across its public API.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use virt_driver_hypervisor::network::PortSpec;

/// Decoded task spec. Decoding the scheduler's own wire format into this
/// struct is out of scope; the driver accepts an already-decoded value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Path to the base image, checked against an allow-list before use.
    pub image_path: String,
    /// Whether to create a COW overlay instead of using the image directly.
    pub thin_copy: bool,
    pub memory_mib: u64,
    /// CPU set string, e.g. `"0-1"`.
    pub cpuset: String,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    pub bridge: String,
    /// Explicit guest IP, if the scheduler assigns one; otherwise the
    /// deterministic fallback hash derivation is used.
    pub guest_ip: Option<IpAddr>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    pub user_data: Option<String>,
    pub alloc_dir: String,
    pub local_dir: String,
    pub secrets_dir: String,
}

/// Coarse task process state tracked by `TaskHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Running,
    Exited,
    Unknown,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Running => write!(f, "running"),
            ProcessState::Exited => write!(f, "exited"),
            ProcessState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Produced by the monitor loop on a terminal domain state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitResult {
    pub exit_code: i32,
    pub error: Option<String>,
}

impl ExitResult {
    pub fn success() -> Self {
        Self { exit_code: 0, error: None }
    }

    pub fn task_not_found() -> Self {
        Self { exit_code: 1, error: Some("ErrTaskNotFound".to_string()) }
    }

    pub fn task_crashed() -> Self {
        Self { exit_code: 1, error: Some("ErrTaskCrashed".to_string()) }
    }

    pub fn unexpected_state(state: &str) -> Self {
        Self { exit_code: 1, error: Some(format!("unexpected state: {state}")) }
    }
}

/// `GetStats` projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStats {
    pub memory_usage_bytes: u64,
    pub max_memory_bytes: u64,
    pub cpu_throttled_time_ns: u64,
}

/// `InspectTask`'s projection of a live handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInspection {
    pub domain_name: String,
    pub process_state: ProcessState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_result: Option<ExitResult>,
}

/// Forwarded by `TaskEvents` from the in-process eventer. The
/// scheduler's own event-stream wire shape is out of scope; this is the
/// in-process notification the driver fans out to interested subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub kind: TaskEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEventKind {
    Started,
    Stopped,
    Exited(ExitResult),
    Destroyed,
}
