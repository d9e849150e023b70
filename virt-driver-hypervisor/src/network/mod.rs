//! Network programming subsystem: idempotent installation and removal of
//! host packet-filter rules that DNAT scheduler-allocated host ports into
//! static per-VM guest IPs, tolerant of partial failure and concurrent
//! teardown retries.

pub mod controller;
mod iface;
mod rules;
mod types;

pub use controller::{
    derive_fallback_guest_ip, InstallError, NetworkCapability, NetworkController, FILTER_CHAIN, NAT_CHAIN,
};
pub use iface::{CachingResolver, InterfaceResolver, RtnetlinkResolver};
pub use rules::{FakeRuleBackend, IptablesBackend, RuleBackend};
pub use types::{BridgeState, FingerprintAttrs, NetworkRequest, PortSpec, Rule, TeardownSpec};
