//! The `Hypervisor` capability: the sole integration surface the core
//! depends on. Both a libvirt/QEMU backend and a Cloud Hypervisor backend
//! are expected to implement this trait; callers must not depend on
//! backend-specific types.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DomainConfig, DomainInfo, HostInfo};

/// Boundary the task driver depends on. Narrower than a general-purpose
/// hypervisor API on purpose: snapshotting, migration, hot-plug and console
/// access have no place here, because the core never performs them.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Make the connection ready. Called once at driver `Init`.
    async fn start(&self, data_dir: &str) -> Result<()>;

    /// Create a domain and start it running. Returns once the domain exists
    /// and is running.
    async fn create(&self, config: DomainConfig) -> Result<()>;

    /// Request a graceful shutdown of the named domain.
    async fn stop(&self, name: &str) -> Result<()>;

    /// Destroy the named domain. Idempotent: destroying an unknown domain
    /// is not an error.
    async fn destroy(&self, name: &str) -> Result<()>;

    /// Query the domain's current status, or `None` if it no longer exists.
    async fn get_domain(&self, name: &str) -> Result<Option<DomainInfo>>;

    /// Query aggregate backend/host information.
    async fn get_info(&self) -> Result<HostInfo>;
}
