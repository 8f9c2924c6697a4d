//! Opens a TUN/TAP interface and logs every frame it receives.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Parser;
use tuntap::{Config, DevicePermissions, DeviceType, Interface, PlatformParams};

/// How many bytes of each frame to log.
const LOGGED_PREFIX_LEN: usize = 16;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Whether to open a routed (tun) or bridged (tap) interface.
    #[arg(long = "type", env = "TUNTAP_TYPE", default_value = "tap")]
    device_type: DeviceType,

    /// Name of the interface, or the adapter's friendly name on Windows.
    #[arg(long, env = "TUNTAP_NAME")]
    name: Option<String>,

    /// TOML file with platform parameters; flags given on the command line take precedence.
    #[arg(long, env = "TUNTAP_CONFIG")]
    config: Option<PathBuf>,

    /// Component ID of the TAP driver (Windows).
    #[arg(long)]
    component_id: Option<String>,

    /// Network emulated in TUN mode, in CIDR notation (Windows).
    #[arg(long)]
    network: Option<String>,

    /// Let the driver answer DHCP requests (Windows).
    #[arg(long)]
    dhcp: bool,

    #[arg(long)]
    dhcp_server: Option<String>,

    #[arg(long)]
    dns1: Option<String>,

    #[arg(long)]
    dns2: Option<String>,

    /// Keep the interface after exiting (Linux).
    #[arg(long)]
    persist: bool,

    #[arg(long)]
    multi_queue: bool,

    /// User ID that may open the interface (Linux).
    #[arg(long)]
    owner: Option<u32>,

    /// Group ID that may open the interface (Linux).
    #[arg(long)]
    group: Option<u32>,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_filter: String,

    /// Log as JSON.
    #[arg(long, env = "TUNTAP_JSON_LOGS")]
    json_logs: bool,
}

impl Cli {
    fn overrides(&self) -> PlatformParams {
        let permissions =
            (self.owner.is_some() || self.group.is_some()).then_some(DevicePermissions {
                owner: self.owner,
                group: self.group,
            });

        PlatformParams {
            name: self.name.clone().unwrap_or_default(),
            persist: self.persist,
            permissions,
            multi_queue: self.multi_queue,
            component_id: self.component_id.clone().unwrap_or_default(),
            network: self.network.clone().unwrap_or_default(),
            dhcp: self.dhcp,
            dhcp_server: self.dhcp_server.clone().unwrap_or_default(),
            dns1: self.dns1.clone().unwrap_or_default(),
            dns2: self.dns2.clone().unwrap_or_default(),
            ..PlatformParams::empty()
        }
    }

    fn to_config(&self) -> Result<Config> {
        let from_file = match &self.config {
            Some(path) => read_params(path)?,
            None => PlatformParams::empty(),
        };

        Ok(Config::with_params(
            self.device_type,
            from_file.base_on(self.overrides()),
        ))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::setup_global_subscriber(&cli.log_filter, cli.json_logs)
        .context("Failed to set up logging")?;

    let config = cli.to_config()?;
    tracing::debug!(?config, "Opening interface");

    let interface = Interface::open(&config).context("Failed to open interface")?;
    tracing::info!(
        name = %interface.name(),
        device_type = %interface.device_type(),
        "Listening for frames"
    );

    let mut buf = vec![0u8; 65536];

    loop {
        let n = interface
            .read(&mut buf)
            .context("Failed to read from interface")?;

        tracing::info!(len = %n, head = %hex(&buf[..n.min(LOGGED_PREFIX_LEN)]), "Received frame");
    }
}

fn read_params(path: &Path) -> Result<PlatformParams> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    let params = toml::from_str(&content)
        .with_context(|| format!("Failed to parse '{}'", path.display()))?;

    Ok(params)
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
