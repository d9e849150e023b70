//! Packet-filter rule execution. `RuleBackend` is the seam between the
//! controller's idempotent install/uninstall protocol and the kernel's
//! netfilter tables, so tests can substitute an in-memory fake instead of
//! shelling to `iptables(8)`.

use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::NetworkError;
use crate::network::types::Rule;

/// Minimal rule-engine seam. A `Rule` here is always `(table, chain, args)`;
/// `args` is the exact string iptables-style tools expect after `-A chain`.
pub trait RuleBackend: Send + Sync {
    /// Ensures `chain` exists in `table`. Returns `Ok(())` whether the chain
    /// was created or already existed — "already exists" is success, since a
    /// concurrent initializer may have won the race.
    fn ensure_chain(&self, table: &str, chain: &str) -> Result<(), NetworkError>;

    /// Inserts a jump from `from_chain` to `chain` at `position`, skipping if
    /// an identical jump rule is already present.
    fn ensure_jump(&self, table: &str, from_chain: &str, chain: &str, position: i32) -> Result<(), NetworkError>;

    /// Appends `rule` to the end of `table`/`chain`.
    fn append(&self, rule: &Rule) -> Result<(), NetworkError>;

    /// Returns whether `rule` is currently present.
    fn exists(&self, rule: &Rule) -> Result<bool, NetworkError>;

    /// Deletes `rule` if present; absent rules are not an error.
    fn delete_if_exists(&self, rule: &Rule) -> Result<(), NetworkError>;
}

/// Real backend, shelling out via the `iptables` crate (which itself execs
/// `iptables(8)`/`ip6tables(8)`).
pub struct IptablesBackend {
    inner: iptables::IPTables,
}

impl IptablesBackend {
    pub fn new() -> Result<Self, NetworkError> {
        let inner = iptables::new(false)
            .map_err(|e| NetworkError::BackendUnavailable(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl RuleBackend for IptablesBackend {
    fn ensure_chain(&self, table: &str, chain: &str) -> Result<(), NetworkError> {
        let exists = self
            .inner
            .chain_exists(table, chain)
            .map_err(|e| NetworkError::BackendUnavailable(e.to_string()))?;
        if exists {
            debug!(table, chain, "chain already present");
            return Ok(());
        }
        self.inner
            .new_chain(table, chain)
            .map_err(|e| NetworkError::BackendUnavailable(e.to_string()))?;
        debug!(table, chain, "chain created");
        Ok(())
    }

    fn ensure_jump(&self, table: &str, from_chain: &str, chain: &str, position: i32) -> Result<(), NetworkError> {
        let jump_rule = format!("-j {chain}");
        let already = self
            .inner
            .exists(table, from_chain, &jump_rule)
            .map_err(|e| NetworkError::BackendUnavailable(e.to_string()))?;
        if already {
            debug!(table, from_chain, chain, "jump already present");
            return Ok(());
        }
        self.inner
            .insert(table, from_chain, &jump_rule, position)
            .map_err(|e| NetworkError::BackendUnavailable(e.to_string()))?;
        debug!(table, from_chain, chain, position, "jump installed");
        Ok(())
    }

    fn append(&self, rule: &Rule) -> Result<(), NetworkError> {
        self.inner
            .append(&rule.table, &rule.chain, &rule.args)
            .map_err(|e| NetworkError::InstallFailed(e.to_string()))?;
        Ok(())
    }

    fn exists(&self, rule: &Rule) -> Result<bool, NetworkError> {
        self.inner
            .exists(&rule.table, &rule.chain, &rule.args)
            .map_err(|e| NetworkError::BackendUnavailable(e.to_string()))
    }

    fn delete_if_exists(&self, rule: &Rule) -> Result<(), NetworkError> {
        let present = self.exists(rule)?;
        if !present {
            warn!(table = %rule.table, chain = %rule.chain, args = %rule.args, "rule already absent");
            return Ok(());
        }
        self.inner
            .delete(&rule.table, &rule.chain, &rule.args)
            .map_err(|e| NetworkError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// In-memory fake used by the controller's own tests and by anything
/// exercising the subsystem without root/netfilter access.
#[derive(Default)]
pub struct FakeRuleBackend {
    chains: Mutex<Vec<(String, String)>>,
    jumps: Mutex<Vec<(String, String, String)>>,
    rules: Mutex<Vec<Rule>>,
}

impl FakeRuleBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn installed_rules(&self) -> Vec<Rule> {
        self.rules.lock().unwrap().clone()
    }
}

impl RuleBackend for FakeRuleBackend {
    fn ensure_chain(&self, table: &str, chain: &str) -> Result<(), NetworkError> {
        let mut chains = self.chains.lock().unwrap();
        let key = (table.to_string(), chain.to_string());
        if !chains.contains(&key) {
            chains.push(key);
        }
        Ok(())
    }

    fn ensure_jump(&self, table: &str, from_chain: &str, chain: &str, _position: i32) -> Result<(), NetworkError> {
        let mut jumps = self.jumps.lock().unwrap();
        let key = (table.to_string(), from_chain.to_string(), chain.to_string());
        if !jumps.contains(&key) {
            jumps.push(key);
        }
        Ok(())
    }

    fn append(&self, rule: &Rule) -> Result<(), NetworkError> {
        self.rules.lock().unwrap().push(rule.clone());
        Ok(())
    }

    fn exists(&self, rule: &Rule) -> Result<bool, NetworkError> {
        Ok(self.rules.lock().unwrap().contains(rule))
    }

    fn delete_if_exists(&self, rule: &Rule) -> Result<(), NetworkError> {
        let mut rules = self.rules.lock().unwrap();
        if let Some(pos) = rules.iter().position(|r| r == rule) {
            rules.remove(pos);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_backend_round_trips_a_rule() {
        let backend = FakeRuleBackend::new();
        let rule = Rule::new("nat", "NOMAD_CH_PRT", "-d 10.0.0.5 -p tcp --dport 20022 -j DNAT");
        backend.append(&rule).unwrap();
        assert!(backend.exists(&rule).unwrap());
        backend.delete_if_exists(&rule).unwrap();
        assert!(!backend.exists(&rule).unwrap());
    }

    #[test]
    fn fake_backend_delete_missing_is_ok() {
        let backend = FakeRuleBackend::new();
        let rule = Rule::new("nat", "NOMAD_CH_PRT", "-j DNAT");
        backend.delete_if_exists(&rule).unwrap();
    }

    #[test]
    fn fake_backend_ensure_chain_idempotent() {
        let backend = FakeRuleBackend::new();
        backend.ensure_chain("nat", "NOMAD_CH_PRT").unwrap();
        backend.ensure_chain("nat", "NOMAD_CH_PRT").unwrap();
        assert_eq!(backend.chains.lock().unwrap().len(), 1);
    }
}
