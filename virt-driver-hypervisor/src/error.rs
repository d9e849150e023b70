//! Error types for the hypervisor boundary and its image/network subsystems.

use thiserror::Error;

/// Errors that can occur while talking to the hypervisor backend, per the
/// `Hypervisor` capability table.
#[derive(Error, Debug)]
pub enum HypervisorError {
    /// `Start` could not reach the backend.
    #[error("hypervisor unavailable: {0}")]
    ConnectionFailed(String),

    /// `GetDomain`/`Stop`/`Destroy` referenced a name the backend does not know.
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    /// `Create` rejected the domain config.
    #[error("domain create failed: {0}")]
    CreateFailed(String),

    /// `Stop` did not complete.
    #[error("domain stop failed: {0}")]
    StopFailed(String),

    /// `Destroy` did not complete.
    #[error("domain destroy failed: {0}")]
    DestroyFailed(String),

    /// `GetDomain`/`GetInfo` failed.
    #[error("hypervisor query failed: {0}")]
    QueryFailed(String),

    /// Lock poisoned or other invariant violation inside the backend.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for hypervisor operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;

/// Errors from the image preparation pipeline (`image` module).
#[derive(Error, Debug)]
pub enum ImageError {
    /// Base path did not resolve under any allowed root.
    #[error("image path not allowed: {0}")]
    PathNotAllowed(String),

    /// Base image is missing on disk.
    #[error("image not found: {0}")]
    NotFound(String),

    /// `qemu-img` (or equivalent) is not installed.
    #[error("image tool not available: {0}")]
    ToolMissing(String),

    /// `qemu-img` ran but failed, or its output could not be parsed.
    #[error("image tool failed: {0}")]
    ToolFailed(String),

    /// Requested overlay size was not a positive number of MiB.
    #[error("invalid size: {0}")]
    InvalidSize(String),
}

/// Result type alias for image pipeline operations.
pub type ImageResult<T> = std::result::Result<T, ImageError>;

/// Errors from the network programming subsystem (`network` module).
#[derive(Error, Debug)]
pub enum NetworkError {
    /// A rule failed to install; the caller must still capture whichever
    /// rules were appended before the failure into the teardown spec.
    #[error("network install failed: {0}")]
    InstallFailed(String),

    /// One or more rules could not be deleted during uninstall. Carries the
    /// list of rule descriptions that could not be confirmed gone.
    #[error("network teardown left {0} rule(s) unconfirmed: {1}")]
    TeardownPartial(usize, String),

    /// No host interface carries the requested address.
    #[error("no interface owns address {0}")]
    InterfaceNotFound(String),

    /// The underlying rule backend (iptables) could not be reached.
    #[error("rule backend error: {0}")]
    BackendUnavailable(String),
}

/// Result type alias for network subsystem operations.
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;
