//! In-memory hypervisor backend for testing and local development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::{HypervisorError, Result};
use crate::traits::Hypervisor;
use crate::types::{DomainConfig, DomainInfo, DomainState, HostInfo};

struct MockDomain {
    config: DomainConfig,
    state: DomainState,
}

/// Simulates domain lifecycle entirely in memory. Used by the driver's own
/// tests and by anything exercising the crate without a real libvirt/Cloud
/// Hypervisor connection available.
pub struct MockHypervisor {
    domains: RwLock<HashMap<String, MockDomain>>,
    started: RwLock<bool>,
}

impl MockHypervisor {
    pub fn new() -> Self {
        info!("creating mock hypervisor backend");
        Self {
            domains: RwLock::new(HashMap::new()),
            started: RwLock::new(false),
        }
    }

    /// Test/dev hook: force the named domain into a given state, as if the
    /// backend observed it externally (e.g. a crash).
    pub fn set_state(&self, name: &str, state: DomainState) -> Result<()> {
        let mut domains = self.domains.write().map_err(|_| HypervisorError::Internal("lock poisoned".into()))?;
        match domains.get_mut(name) {
            Some(domain) => {
                domain.state = state;
                Ok(())
            }
            None => Err(HypervisorError::DomainNotFound(name.to_string())),
        }
    }
}

impl Default for MockHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hypervisor for MockHypervisor {
    #[instrument(skip(self))]
    async fn start(&self, data_dir: &str) -> Result<()> {
        debug!(data_dir, "mock hypervisor start");
        let mut started = self.started.write().map_err(|_| HypervisorError::Internal("lock poisoned".into()))?;
        *started = true;
        Ok(())
    }

    #[instrument(skip(self, config), fields(domain = %config.name))]
    async fn create(&self, config: DomainConfig) -> Result<()> {
        let mut domains = self.domains.write().map_err(|_| HypervisorError::Internal("lock poisoned".into()))?;
        if domains.contains_key(&config.name) {
            return Err(HypervisorError::CreateFailed(format!("domain {} already exists", config.name)));
        }
        info!(domain = %config.name, memory_mib = config.memory_mib, vcpus = config.vcpus, "creating domain");
        domains.insert(
            config.name.clone(),
            MockDomain { config, state: DomainState::Running },
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self, name: &str) -> Result<()> {
        let mut domains = self.domains.write().map_err(|_| HypervisorError::Internal("lock poisoned".into()))?;
        match domains.get_mut(name) {
            Some(domain) => {
                debug!(domain = name, "graceful stop");
                domain.state = DomainState::ShutOff;
                Ok(())
            }
            None => Err(HypervisorError::DomainNotFound(name.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn destroy(&self, name: &str) -> Result<()> {
        let mut domains = self.domains.write().map_err(|_| HypervisorError::Internal("lock poisoned".into()))?;
        domains.remove(name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_domain(&self, name: &str) -> Result<Option<DomainInfo>> {
        let domains = self.domains.read().map_err(|_| HypervisorError::Internal("lock poisoned".into()))?;
        Ok(domains.get(name).map(|domain| DomainInfo {
            state: domain.state.clone(),
            memory_bytes: domain.config.memory_mib * 1024 * 1024,
            max_memory_bytes: domain.config.memory_mib * 1024 * 1024,
            cpu_time_ns: 0,
            vcpus: domain.config.vcpus,
        }))
    }

    #[instrument(skip(self))]
    async fn get_info(&self) -> Result<HostInfo> {
        let domains = self.domains.read().map_err(|_| HypervisorError::Internal("lock poisoned".into()))?;
        let running_count = domains.values().filter(|d| d.state == DomainState::Running).count() as u32;
        let inactive_count = domains.len() as u32 - running_count;
        Ok(HostInfo {
            backend_version: "mock-1.0".to_string(),
            emulator_version: "mock-1.0".to_string(),
            running_count,
            inactive_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_query() {
        let hv = MockHypervisor::new();
        hv.start("/tmp").await.unwrap();
        hv.create(DomainConfig::new("web-0001").with_memory_mib(6000).with_vcpus(2)).await.unwrap();

        let info = hv.get_domain("web-0001").await.unwrap().unwrap();
        assert_eq!(info.state, DomainState::Running);
        assert_eq!(info.vcpus, 2);
        assert_eq!(info.memory_bytes, 6000 * 1024 * 1024);
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let hv = MockHypervisor::new();
        hv.create(DomainConfig::new("dup")).await.unwrap();
        let err = hv.create(DomainConfig::new("dup")).await.unwrap_err();
        assert!(matches!(err, HypervisorError::CreateFailed(_)));
    }

    #[tokio::test]
    async fn destroy_unknown_is_ok() {
        let hv = MockHypervisor::new();
        hv.destroy("does-not-exist").await.unwrap();
    }

    #[tokio::test]
    async fn get_domain_absent_is_none() {
        let hv = MockHypervisor::new();
        assert!(hv.get_domain("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_then_destroy() {
        let hv = MockHypervisor::new();
        hv.create(DomainConfig::new("db-0002")).await.unwrap();
        hv.stop("db-0002").await.unwrap();
        let info = hv.get_domain("db-0002").await.unwrap().unwrap();
        assert_eq!(info.state, DomainState::ShutOff);
        hv.destroy("db-0002").await.unwrap();
        assert!(hv.get_domain("db-0002").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_state_simulates_crash() {
        let hv = MockHypervisor::new();
        hv.create(DomainConfig::new("crashy")).await.unwrap();
        hv.set_state("crashy", DomainState::Crashed).unwrap();
        let info = hv.get_domain("crashy").await.unwrap().unwrap();
        assert_eq!(info.state, DomainState::Crashed);
    }
}
