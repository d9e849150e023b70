//! Network subsystem data model: `NetworkRequest` and `TeardownSpec`.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// One scheduler-allocated port to forward into the guest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSpec {
    pub label: String,
    pub host_ip: IpAddr,
    pub host_port: u16,
    pub guest_port: u16,
}

/// Inputs to `VMStartedBuild`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub domain_name: String,
    pub ports: Vec<PortSpec>,
    pub bridge: String,
    pub guest_ip: IpAddr,
}

/// A single installed packet-filter rule: `(table, chain, args...)`. Deleting
/// the same `(table, chain, args...)` reverses its installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub table: String,
    pub chain: String,
    pub args: String,
}

impl Rule {
    pub fn new(table: impl Into<String>, chain: impl Into<String>, args: impl Into<String>) -> Self {
        Self { table: table.into(), chain: chain.into(), args: args.into() }
    }
}

/// Serialized into the recovery blob, not a live object: the ordered rule
/// list produced by `VMStartedBuild`, plus bookkeeping used only for
/// logging/teardown correlation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeardownSpec {
    pub rules: Vec<Rule>,
    /// Empty when static addressing is used.
    pub dhcp_reservation: String,
    /// Used for logging/teardown correlation only.
    pub bridge: String,
}

/// Per-bridge attributes published on each fingerprint cycle.
#[derive(Debug, Clone)]
pub struct FingerprintAttrs {
    pub bridge: String,
    pub state: BridgeState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Active,
    Inactive,
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeState::Active => write!(f, "active"),
            BridgeState::Inactive => write!(f, "inactive"),
        }
    }
}
