//! # virt-driver
//!
//! The task lifecycle coordinator: the state machine that owns each running
//! VM, serves the scheduler's lifecycle contract (start / wait / inspect /
//! stop / destroy / recover), and reconciles scheduler-visible state against
//! hypervisor-reported domain state via a background monitor loop.
//!
//! Built on top of [`virt_driver_hypervisor`]'s `Hypervisor` boundary and
//! network/image subsystems; this crate owns everything scheduler-facing:
//! the task store, the per-task handle and monitor, the recovery blob, and
//! the `Driver` coordinator that glues them together.

pub mod cli;
pub mod cloudinit;
pub mod config;
pub mod driver;
pub mod error;
pub mod handle;
pub mod recovery;
pub mod taskid;
pub mod taskstore;
pub mod types;

pub use config::{DriverConfig, PluginConfig};
pub use driver::Driver;
pub use error::DriverError;
pub use handle::TaskHandle;
pub use recovery::{RecoveryRecord, RecoveryStore};
pub use taskstore::TaskStore;
