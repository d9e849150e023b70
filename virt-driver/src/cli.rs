//! Command-line argument parsing for the plugin binary.

use clap::Parser;

/// virt-driver-plugin — a workload-driver plugin that launches and manages
/// virtual machines on a Linux host as if they were container-like tasks.
#[derive(Parser, Debug)]
#[command(name = "virt-driver-plugin")]
#[command(about = "virt-driver-plugin - VM workload-driver for a cluster scheduler")]
#[command(version)]
pub struct Args {
    /// Path to the plugin configuration file.
    #[arg(short, long, default_value = "/etc/virt-driver/config.yaml")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error). Used only when
    /// `RUST_LOG` is unset.
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit structured JSON logs instead of the console format.
    #[arg(long)]
    pub log_json: bool,

    /// Override the plugin's data directory.
    #[arg(long)]
    pub data_dir: Option<String>,
}
