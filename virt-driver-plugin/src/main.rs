//! # virt-driver-plugin
//!
//! CLI entrypoint wiring configuration, logging and the `Driver` coordinator
//! together. Wires the network controller against the real
//! `iptables`/`rtnetlink` backends; swap in the mock hypervisor via
//! `virt_driver_hypervisor::MockHypervisor` for local development without a
//! libvirt/Cloud Hypervisor connection available.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use virt_driver::cli::Args;
use virt_driver::config::{DriverConfig, PluginConfig};
use virt_driver::Driver;
use virt_driver_hypervisor::mock::MockHypervisor;
use virt_driver_hypervisor::network::{CachingResolver, IptablesBackend, NetworkController, RtnetlinkResolver};
use virt_driver_hypervisor::Hypervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match PluginConfig::load(&args.config) {
        Ok(cfg) => cfg,
        Err(_) if args.config == "/etc/virt-driver/config.yaml" => PluginConfig::default(),
        Err(e) => return Err(e),
    };
    let config = config.with_cli_overrides(&args);

    virt_driver_common::init(&config.log_level, config.log_json, None)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir,
        "starting virt-driver-plugin"
    );

    let hypervisor: Arc<dyn Hypervisor> = Arc::new(MockHypervisor::new());

    let rule_backend = IptablesBackend::new().map_err(|e| {
        error!(error = %e, "iptables backend unavailable");
        anyhow::Error::from(e)
    })?;
    let network = Arc::new(NetworkController::new(rule_backend, CachingResolver::new(RtnetlinkResolver::new())));

    let driver = Driver::new(DriverConfig::from(&config), hypervisor, network);
    driver.init().await?;

    info!("driver initialized, awaiting shutdown signal");
    let attrs = driver.fingerprint_attrs().await;
    for (k, v) in &attrs {
        info!(key = %k, value = %v, "fingerprint attribute");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, exiting");
    Ok(())
}
