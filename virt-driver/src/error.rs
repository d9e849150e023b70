//! Error taxonomy for the driver coordinator. Each variant is one kind
//! the scheduler can observe; the message carried inside is already
//! human-readable since these surface directly at the RPC boundary.

use thiserror::Error;
use virt_driver_hypervisor::error::{HypervisorError, ImageError, NetworkError};

#[derive(Error, Debug)]
pub enum DriverError {
    /// Unknown or malformed task spec.
    #[error("invalid task config: {0}")]
    ConfigInvalid(String),

    /// Base image missing from all allowed roots.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Format detection or overlay creation failed.
    #[error("image tool failure: {0}")]
    ImageToolFailure(String),

    /// Backend connection failed, at Init or any verb.
    #[error("hypervisor unavailable: {0}")]
    HypervisorUnavailable(String),

    /// Backend rejected Create.
    #[error("domain create failed: {0}")]
    DomainCreateFailed(String),

    /// Rule install errored mid-sequence; the caller must call Destroy to
    /// reap whatever was already installed.
    #[error("network install failed: {0}")]
    NetworkInstallFailed(String),

    /// Network teardown left rules unconfirmed; the scheduler retries.
    #[error("network teardown incomplete: {0}")]
    NetworkTeardownPartial(String),

    /// Surfaced at Wait/Inspect/Stats for an id not in the store.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Surfaced at DestroyTask: the task is still running and `force` was
    /// not set.
    #[error("task still running: {0}")]
    TaskStillRunning(String),

    /// Carried inside an exit result, not returned as an RPC error — kept
    /// here only so code that matches on `DriverError` has one arm for it.
    #[error("task crashed: {0}")]
    TaskCrashed(String),

    /// Surfaced at Signal/Exec: the core does not implement these.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;

impl From<HypervisorError> for DriverError {
    fn from(e: HypervisorError) -> Self {
        match e {
            HypervisorError::ConnectionFailed(m) => DriverError::HypervisorUnavailable(m),
            HypervisorError::CreateFailed(m) => DriverError::DomainCreateFailed(m),
            HypervisorError::DomainNotFound(m) => DriverError::TaskNotFound(m),
            other => DriverError::HypervisorUnavailable(other.to_string()),
        }
    }
}

impl From<ImageError> for DriverError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::NotFound(m) | ImageError::PathNotAllowed(m) => DriverError::ImageNotFound(m),
            other => DriverError::ImageToolFailure(other.to_string()),
        }
    }
}

impl From<NetworkError> for DriverError {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::TeardownPartial(_, detail) => DriverError::NetworkTeardownPartial(detail),
            other => DriverError::NetworkInstallFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hypervisor_connection_failed_maps_to_unavailable() {
        let err: DriverError = HypervisorError::ConnectionFailed("down".into()).into();
        assert!(matches!(err, DriverError::HypervisorUnavailable(_)));
    }

    #[test]
    fn teardown_partial_maps_with_detail() {
        let err: DriverError = NetworkError::TeardownPartial(2, "nat/NOMAD_CH_PRT: x".into()).into();
        match err {
            DriverError::NetworkTeardownPartial(detail) => assert!(detail.contains("NOMAD_CH_PRT")),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
