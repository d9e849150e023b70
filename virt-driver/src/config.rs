//! Plugin configuration. Decoding the scheduler's own HCL/struct-tag
//! encoding of this config is out of scope; this is the plain
//! `serde::Deserialize` shape the driver itself loads from a YAML file, with
//! CLI overrides applied on top — the same two-layer pattern the prior daemon
//! uses for its own daemon config.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Args;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Root directory for overlay disks, recovery blobs, and anything else
    /// the plugin owns on disk.
    pub data_dir: String,
    /// Extra base-image allow-list roots, beyond `data_dir` and the task's
    /// own allocation directory.
    pub extra_allowed_image_roots: Vec<PathBuf>,
    /// Base /24 used by the deterministic fallback guest-IP derivation
    /// when a task doesn't carry an explicit guest IP.
    pub guest_subnet: Ipv4Addr,
    /// Bridges fingerprinted on each cycle.
    pub bridges: Vec<String>,
    /// Log verbosity, used only when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit structured JSON logs instead of the console format.
    pub log_json: bool,
    /// Grace period given to a graceful `StopTask` before force-destroy.
    pub stop_grace_secs: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            data_dir: "/var/lib/virt-driver".to_string(),
            extra_allowed_image_roots: Vec::new(),
            guest_subnet: Ipv4Addr::new(192, 168, 1, 0),
            bridges: vec!["virbr0".to_string()],
            log_level: "info".to_string(),
            log_json: false,
            stop_grace_secs: 30,
        }
    }
}

impl PluginConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: PluginConfig =
            serde_yaml::from_str(&content).with_context(|| "failed to parse config file")?;
        Ok(config)
    }

    /// Applies CLI overrides. Values explicitly passed on the command line
    /// win over whatever the config file set.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref data_dir) = args.data_dir {
            self.data_dir = data_dir.clone();
        }
        if let Some(ref log_level) = args.log_level {
            self.log_level = log_level.clone();
        }
        if args.log_json {
            self.log_json = true;
        }
        self
    }

    pub fn recovery_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("recovery")
    }
}

/// Runtime config the coordinator actually consumes — a narrowed view of
/// `PluginConfig` plus anything else `Driver` needs that never comes from a
/// file (kept separate so `Driver` doesn't need to know about CLI/YAML at
/// all).
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub data_dir: String,
    pub extra_allowed_image_roots: Vec<PathBuf>,
    pub guest_subnet: Ipv4Addr,
    pub bridges: Vec<String>,
}

impl DriverConfig {
    pub fn recovery_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("recovery")
    }
}

impl From<&PluginConfig> for DriverConfig {
    fn from(cfg: &PluginConfig) -> Self {
        Self {
            data_dir: cfg.data_dir.clone(),
            extra_allowed_image_roots: cfg.extra_allowed_image_roots.clone(),
            guest_subnet: cfg.guest_subnet,
            bridges: cfg.bridges.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PluginConfig::default();
        assert_eq!(config.data_dir, "/var/lib/virt-driver");
        assert_eq!(config.guest_subnet, Ipv4Addr::new(192, 168, 1, 0));
    }

    #[test]
    fn loads_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "data_dir: /srv/virt-driver\nguest_subnet: 10.0.1.0\nbridges:\n  - br0\n  - br1\n").unwrap();
        let config = PluginConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, "/srv/virt-driver");
        assert_eq!(config.bridges, vec!["br0".to_string(), "br1".to_string()]);
    }
}
