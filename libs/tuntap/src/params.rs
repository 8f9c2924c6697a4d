//! Platform-specific parameters of a virtual network interface.
//!
//! A caller usually only sets the handful of fields relevant to their platform.
//! [`PlatformParams::base_on`] combines those overrides with the library defaults.

use serde::{Deserialize, Serialize};

/// The component ID of the TAP-Windows driver shipped with OpenVPN.
pub const DEFAULT_COMPONENT_ID: &str = "tap0901";

/// The network emulated by the driver if the caller doesn't configure one.
pub const DEFAULT_NETWORK: &str = "192.168.56.2/24";

/// The macOS TUN/TAP implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MacOsDriver {
    /// The built-in `utun` point-to-point driver.
    #[default]
    System,
    /// The third-party `tuntaposx` driver.
    TunTapOsx,
}

/// Owner and group of a newly created interface (Linux).
///
/// `None` leaves the respective value unchanged, which on Linux allows any user / group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevicePermissions {
    pub owner: Option<u32>,
    pub group: Option<u32>,
}

/// The effective parameter set consumed by every platform backend.
///
/// Empty strings, `false` and `None` double as "not specified".
/// As a result, [`base_on`](PlatformParams::base_on) cannot reset a field of the base back to its zero value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PlatformParams {
    /// Name of the interface.
    ///
    /// On Linux, an empty name lets the kernel pick one, e.g. `tun0`.
    /// On Windows, this is the friendly name of the adapter as shown in the Control Panel and
    /// disambiguates between several adapters of the same driver.
    pub name: String,
    /// macOS only.
    pub driver: MacOsDriver,
    /// Linux only: keep the interface around after the handle is closed.
    pub persist: bool,
    /// Linux only.
    pub permissions: Option<DevicePermissions>,
    /// Linux only: allow multiple file descriptors (queues) on the same interface.
    pub multi_queue: bool,
    /// Windows only: the driver registration string identifying the adapter's driver.
    pub component_id: String,
    /// Windows only: the network the driver emulates in TUN mode, in CIDR notation.
    ///
    /// The host part is the interface's own address, e.g. `10.0.0.2/24`.
    pub network: String,
    /// Windows only: let the driver answer DHCP requests for the interface.
    pub dhcp: bool,
    /// Windows only: address of the emulated DHCP server.
    pub dhcp_server: String,
    /// Windows only: primary DNS server handed out via DHCP.
    pub dns1: String,
    /// Windows only: secondary DNS server handed out via DHCP.
    pub dns2: String,
}

impl Default for PlatformParams {
    fn default() -> Self {
        Self {
            component_id: DEFAULT_COMPONENT_ID.to_owned(),
            network: DEFAULT_NETWORK.to_owned(),
            ..Self::empty()
        }
    }
}

impl PlatformParams {
    /// A parameter set where every field is "not specified".
    ///
    /// Useful as a starting point for overrides.
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            driver: MacOsDriver::System,
            persist: false,
            permissions: None,
            multi_queue: false,
            component_id: String::new(),
            network: String::new(),
            dhcp: false,
            dhcp_server: String::new(),
            dns1: String::new(),
            dns2: String::new(),
        }
    }

    /// Returns `self` with every specified field of `custom` applied on top.
    ///
    /// Strings override if non-empty, booleans if `true`, the driver if not [`MacOsDriver::System`]
    /// and permissions if present.
    pub fn base_on(self, custom: PlatformParams) -> PlatformParams {
        PlatformParams {
            name: non_empty_or(custom.name, self.name),
            driver: match custom.driver {
                MacOsDriver::System => self.driver,
                driver @ MacOsDriver::TunTapOsx => driver,
            },
            persist: self.persist || custom.persist,
            permissions: custom.permissions.or(self.permissions),
            multi_queue: self.multi_queue || custom.multi_queue,
            component_id: non_empty_or(custom.component_id, self.component_id),
            network: non_empty_or(custom.network, self.network),
            dhcp: self.dhcp || custom.dhcp,
            dhcp_server: non_empty_or(custom.dhcp_server, self.dhcp_server),
            dns1: non_empty_or(custom.dns1, self.dns1),
            dns2: non_empty_or(custom.dns2, self.dns2),
        }
    }
}

fn non_empty_or(custom: String, base: String) -> String {
    if custom.is_empty() {
        return base;
    }

    custom
}
