//! Orchestrates rule install/uninstall across VM start/stop, fingerprints
//! configured bridges, and derives the deterministic fallback guest IP.

use std::net::{IpAddr, Ipv4Addr};
use std::num::Wrapping;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::NetworkError;
use crate::network::iface::InterfaceResolver;
use crate::network::rules::RuleBackend;
use crate::network::types::{BridgeState, FingerprintAttrs, NetworkRequest, Rule, TeardownSpec};

/// NAT table chain, jumped to from `PREROUTING` at position 1.
pub const NAT_TABLE: &str = "nat";
pub const NAT_CHAIN: &str = "NOMAD_CH_PRT";
/// Filter table chain, jumped to from `FORWARD` at position 1.
pub const FILTER_TABLE: &str = "filter";
pub const FILTER_CHAIN: &str = "NOMAD_CH_FW";

const PREROUTING: &str = "PREROUTING";
const FORWARD: &str = "FORWARD";
const JUMP_POSITION: i32 = 1;

/// Returned by `vm_started_build` on a mid-install failure. `partial` carries
/// whatever rules were already appended before the failure; they remain
/// installed and will be reaped by a later destroy. The driver surfaces
/// `source` to the scheduler but can still log or act on `partial`.
#[derive(Debug)]
pub struct InstallError {
    pub partial: TeardownSpec,
    pub source: NetworkError,
}

impl std::fmt::Display for InstallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} rule(s) already installed)", self.source, self.partial.rules.len())
    }
}

impl std::error::Error for InstallError {}

/// The network capability exposed to the driver: `Init`, `Fingerprint`,
/// `VMStartedBuild`, `VMTerminatedTeardown`.
pub struct NetworkController<B, R> {
    backend: B,
    resolver: R,
    initialized: AtomicBool,
}

impl<B: RuleBackend, R: InterfaceResolver> NetworkController<B, R> {
    pub fn new(backend: B, resolver: R) -> Self {
        Self { backend, resolver, initialized: AtomicBool::new(false) }
    }

    /// Installs the two named chains and their jumps. Idempotent: invoking
    /// `init` K times installs the chains and jumps exactly once.
    pub fn init(&self) -> Result<(), NetworkError> {
        if self.initialized.load(Ordering::SeqCst) {
            debug!("network controller already initialized, skipping");
            return Ok(());
        }
        self.backend.ensure_chain(NAT_TABLE, NAT_CHAIN)?;
        self.backend.ensure_chain(FILTER_TABLE, FILTER_CHAIN)?;
        self.backend.ensure_jump(NAT_TABLE, PREROUTING, NAT_CHAIN, JUMP_POSITION)?;
        self.backend.ensure_jump(FILTER_TABLE, FORWARD, FILTER_CHAIN, JUMP_POSITION)?;
        self.initialized.store(true, Ordering::SeqCst);
        info!("network controller initialized: {NAT_CHAIN}/{FILTER_CHAIN} chains and jumps installed");
        Ok(())
    }

    /// For each `(hostIP, hostPort, guestPort)` tuple: appends a NAT rule
    /// then a FILTER rule, in that order, recording each into the returned
    /// teardown spec as it is appended. The interface owning each unique
    /// `hostIP` is resolved through `self.resolver`, which is expected to be
    /// a `CachingResolver` so repeated lookups within this install (and
    /// across installs) cost one netlink round trip per host IP.
    pub async fn vm_started_build(&self, req: &NetworkRequest) -> Result<TeardownSpec, InstallError> {
        let mut rules: Vec<Rule> = Vec::new();

        for port in &req.ports {
            let iface = self.resolver.resolve(port.host_ip).await.map_err(|e| InstallError {
                partial: TeardownSpec { rules: rules.clone(), dhcp_reservation: String::new(), bridge: req.bridge.clone() },
                source: e,
            })?;

            let nat_rule = Rule::new(
                NAT_TABLE,
                NAT_CHAIN,
                format!(
                    "-d {host_ip} -i {iface} -p tcp -m tcp --dport {host_port} -j DNAT --to-destination {guest_ip}:{guest_port}",
                    host_ip = port.host_ip,
                    host_port = port.host_port,
                    guest_ip = req.guest_ip,
                    guest_port = port.guest_port,
                ),
            );
            self.backend.append(&nat_rule).map_err(|e| InstallError {
                partial: TeardownSpec { rules: rules.clone(), dhcp_reservation: String::new(), bridge: req.bridge.clone() },
                source: e,
            })?;
            rules.push(nat_rule);

            let filter_rule = Rule::new(
                FILTER_TABLE,
                FILTER_CHAIN,
                format!(
                    "-d {guest_ip} -p tcp -m state --state NEW -m tcp --dport {guest_port} -j ACCEPT",
                    guest_ip = req.guest_ip,
                    guest_port = port.guest_port,
                ),
            );
            self.backend.append(&filter_rule).map_err(|e| InstallError {
                partial: TeardownSpec { rules: rules.clone(), dhcp_reservation: String::new(), bridge: req.bridge.clone() },
                source: e,
            })?;
            rules.push(filter_rule);

            debug!(label = %port.label, host_port = port.host_port, guest_port = port.guest_port, "port forward installed");
        }

        Ok(TeardownSpec { rules, dhcp_reservation: String::new(), bridge: req.bridge.clone() })
    }

    /// Attempts a delete-if-exists for every rule in `spec`, accumulating
    /// errors rather than aborting on the first one. Absent rules are not
    /// errors; only genuine backend failures accumulate into the returned
    /// compound error. Calling this twice on the same spec is safe: the
    /// second call finds every rule already gone and returns `Ok(())`.
    pub fn vm_terminated_teardown(&self, spec: &TeardownSpec) -> Result<(), NetworkError> {
        let mut failures = Vec::new();
        for rule in &spec.rules {
            if let Err(e) = self.backend.delete_if_exists(rule) {
                warn!(table = %rule.table, chain = %rule.chain, error = %e, "rule delete failed");
                failures.push(format!("{}/{}: {}", rule.table, rule.chain, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(NetworkError::TeardownPartial(failures.len(), failures.join("; ")))
        }
    }

    /// Publishes, per configured bridge, its state (`active` if the
    /// interface exists and is up, else `inactive`) and its name. Errors
    /// are logged, not returned.
    pub fn fingerprint(&self, bridges: &[String]) -> Vec<FingerprintAttrs> {
        bridges
            .iter()
            .map(|bridge| {
                let state = match std::fs::read_to_string(format!("/sys/class/net/{bridge}/operstate")) {
                    Ok(s) if s.trim() == "up" => BridgeState::Active,
                    Ok(_) => BridgeState::Inactive,
                    Err(e) => {
                        warn!(bridge, error = %e, "fingerprint: could not read interface state");
                        BridgeState::Inactive
                    }
                };
                FingerprintAttrs { bridge: bridge.clone(), state }
            })
            .collect()
    }
}

/// The network capability exposed to the driver, as a trait object so
/// the coordinator doesn't need to carry `NetworkController`'s `B`/`R` type
/// parameters. Implemented generically for any `NetworkController<B, R>`.
#[async_trait]
pub trait NetworkCapability: Send + Sync {
    fn init(&self) -> Result<(), NetworkError>;
    fn fingerprint(&self, bridges: &[String]) -> Vec<FingerprintAttrs>;
    async fn vm_started_build(&self, req: &NetworkRequest) -> Result<TeardownSpec, InstallError>;
    fn vm_terminated_teardown(&self, spec: &TeardownSpec) -> Result<(), NetworkError>;
}

#[async_trait]
impl<B: RuleBackend + 'static, R: InterfaceResolver + 'static> NetworkCapability for NetworkController<B, R> {
    fn init(&self) -> Result<(), NetworkError> {
        NetworkController::init(self)
    }

    fn fingerprint(&self, bridges: &[String]) -> Vec<FingerprintAttrs> {
        NetworkController::fingerprint(self, bridges)
    }

    async fn vm_started_build(&self, req: &NetworkRequest) -> Result<TeardownSpec, InstallError> {
        NetworkController::vm_started_build(self, req).await
    }

    fn vm_terminated_teardown(&self, spec: &TeardownSpec) -> Result<(), NetworkError> {
        NetworkController::vm_terminated_teardown(self, spec)
    }
}

/// Deterministic fallback derivation of a guest IP from a domain name:
/// treat the domain name's UTF-8 code
/// points as a sequence of integers, accumulate `h = h*31 + c` starting
/// from `h = 0`, and map the result to the offset `100 + (h mod 100)` in
/// `subnet`. This is a fallback; a production deployment should supply the
/// guest IP explicitly. Collisions between domain names that hash to the
/// same offset are a known, accepted limitation of this fallback.
pub fn derive_fallback_guest_ip(domain_name: &str, subnet: Ipv4Addr) -> Ipv4Addr {
    let mut h = Wrapping(0u32);
    for c in domain_name.chars() {
        h = h * Wrapping(31u32) + Wrapping(c as u32);
    }
    let offset = 100 + (h.0 % 100);
    let octets = subnet.octets();
    Ipv4Addr::new(octets[0], octets[1], octets[2], offset as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::rules::FakeRuleBackend;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;

    struct FakeResolver(StdHashMap<IpAddr, String>);

    #[async_trait]
    impl InterfaceResolver for FakeResolver {
        async fn resolve(&self, host_ip: IpAddr) -> Result<String, NetworkError> {
            self.0.get(&host_ip).cloned().ok_or_else(|| NetworkError::InterfaceNotFound(host_ip.to_string()))
        }
    }

    fn resolver() -> FakeResolver {
        let mut map = StdHashMap::new();
        map.insert("10.0.0.5".parse().unwrap(), "eth0".to_string());
        FakeResolver(map)
    }

    #[test]
    fn init_is_idempotent() {
        let controller = NetworkController::new(FakeRuleBackend::new(), resolver());
        controller.init().unwrap();
        controller.init().unwrap();
        controller.init().unwrap();
        assert_eq!(controller.backend.installed_rules().len(), 0);
        assert!(controller.initialized.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn scenario_port_forward_rule_shape() {
        let controller = NetworkController::new(FakeRuleBackend::new(), resolver());
        let req = NetworkRequest {
            domain_name: "web-0001".to_string(),
            ports: vec![crate::network::types::PortSpec {
                label: "ssh".to_string(),
                host_ip: "10.0.0.5".parse().unwrap(),
                host_port: 20022,
                guest_port: 22,
            }],
            bridge: "br0".to_string(),
            guest_ip: "192.168.1.117".parse().unwrap(),
        };

        let spec = controller.vm_started_build(&req).await.unwrap();
        assert_eq!(spec.rules.len(), 2);
        assert_eq!(
            spec.rules[0].args,
            "-d 10.0.0.5 -i eth0 -p tcp -m tcp --dport 20022 -j DNAT --to-destination 192.168.1.117:22"
        );
        assert_eq!(
            spec.rules[1].args,
            "-d 192.168.1.117 -p tcp -m state --state NEW -m tcp --dport 22 -j ACCEPT"
        );
    }

    #[tokio::test]
    async fn round_trip_install_then_teardown_removes_exactly_those_rules() {
        let controller = NetworkController::new(FakeRuleBackend::new(), resolver());
        let req = NetworkRequest {
            domain_name: "web-0001".to_string(),
            ports: vec![
                crate::network::types::PortSpec { label: "ssh".to_string(), host_ip: "10.0.0.5".parse().unwrap(), host_port: 20022, guest_port: 22 },
                crate::network::types::PortSpec { label: "http".to_string(), host_ip: "10.0.0.5".parse().unwrap(), host_port: 20080, guest_port: 80 },
            ],
            bridge: "br0".to_string(),
            guest_ip: "192.168.1.117".parse().unwrap(),
        };

        let spec = controller.vm_started_build(&req).await.unwrap();
        assert_eq!(spec.rules.len(), 4);
        assert_eq!(controller.backend.installed_rules().len(), 4);

        controller.vm_terminated_teardown(&spec).unwrap();
        assert_eq!(controller.backend.installed_rules().len(), 0);
    }

    #[tokio::test]
    async fn teardown_twice_is_idempotent_and_errorless() {
        let controller = NetworkController::new(FakeRuleBackend::new(), resolver());
        let req = NetworkRequest {
            domain_name: "web-0001".to_string(),
            ports: vec![crate::network::types::PortSpec { label: "ssh".to_string(), host_ip: "10.0.0.5".parse().unwrap(), host_port: 20022, guest_port: 22 }],
            bridge: "br0".to_string(),
            guest_ip: "192.168.1.117".parse().unwrap(),
        };
        let spec = controller.vm_started_build(&req).await.unwrap();

        controller.vm_terminated_teardown(&spec).unwrap();
        controller.vm_terminated_teardown(&spec).unwrap();
    }

    #[test]
    fn fallback_guest_ip_is_deterministic() {
        let subnet: Ipv4Addr = "192.168.1.0".parse().unwrap();
        let a = derive_fallback_guest_ip("web-0001", subnet);
        let b = derive_fallback_guest_ip("web-0001", subnet);
        assert_eq!(a, b);
        assert!(a.octets()[3] >= 100 && a.octets()[3] < 200);
    }

    #[test]
    fn fallback_guest_ip_varies_by_name() {
        let subnet: Ipv4Addr = "192.168.1.0".parse().unwrap();
        let a = derive_fallback_guest_ip("web-0001", subnet);
        let b = derive_fallback_guest_ip("db-0002", subnet);
        assert_ne!(a, b);
    }
}
