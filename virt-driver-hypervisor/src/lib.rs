//! # virt-driver-hypervisor
//!
//! The boundary crate between the task driver and the concrete virtualization
//! backend. A real deployment runs against libvirt/QEMU or Cloud Hypervisor;
//! this crate defines the narrow [`Hypervisor`] capability both are expected
//! to satisfy, provides an in-memory [`mock::MockHypervisor`] for tests and
//! local development, and owns the two host-side subsystems that sit next to
//! (but outside) the hypervisor connection itself: the image preparation
//! pipeline (`image`) and the network programming subsystem (`network`).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Hypervisor Trait              │
//! │  (start, create, stop, destroy, ...)     │
//! └─────────────────────┬────────────────────┘
//!                       │
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────────┐     ┌───────────────────┐
//! │  libvirt/QEMU      │     │  Cloud Hypervisor │
//! │  (production)      │     │  (production)     │
//! └───────────────────┘     └───────────────────┘
//!         ▲
//!         │ test / dev only
//! ┌───────────────────┐
//! │  MockHypervisor    │
//! └───────────────────┘
//! ```
//!
//! ```rust,ignore
//! use virt_driver_hypervisor::{Hypervisor, MockHypervisor, DomainConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let hv = MockHypervisor::new();
//!     hv.start("/var/lib/virt-driver").await.unwrap();
//!
//!     let config = DomainConfig::new("web-0001").with_memory_mib(6000).with_vcpus(2);
//!     hv.create(config).await.unwrap();
//! }
//! ```

pub mod error;
pub mod image;
pub mod mock;
pub mod network;
pub mod traits;
pub mod types;

pub use error::HypervisorError;
pub use mock::MockHypervisor;
pub use traits::Hypervisor;
pub use types::{DomainConfig, DomainInfo, DomainState, HostInfo};
