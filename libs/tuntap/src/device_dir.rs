//! Maps a driver component ID (and optionally an adapter's friendly name) to an installed adapter instance.
//!
//! Every installed network adapter has a subkey under the network adapter device class.
//! That subkey records which driver backs the adapter (`ComponentId`) and under which ID the adapter is
//! known to the network configuration (`NetCfgInstanceId`).
//! The friendly name shown in the Control Panel lives in a separate `Connection` key of the latter.

use std::io;

use crate::{Error, Result};

/// Device class of all network adapters.
pub const ADAPTER_CLASS_KEY: &str =
    r"SYSTEM\CurrentControlSet\Control\Class\{4D36E972-E325-11CE-BFC1-08002BE10318}";

/// Network configuration of all network adapters, keyed by instance ID.
pub const NET_CONFIG_KEY: &str =
    r"SYSTEM\CurrentControlSet\Control\Network\{4D36E972-E325-11CE-BFC1-08002BE10318}";

/// Read access to the machine-wide registry.
///
/// All paths are relative to `HKEY_LOCAL_MACHINE`.
pub trait Registry {
    /// Names of the immediate subkeys of `path`.
    fn subkeys(&self, path: &str) -> io::Result<Vec<String>>;

    /// Reads the string value `name` of the key at `path`.
    fn read_string(&self, path: &str, name: &str) -> io::Result<String>;
}

/// The device path of a TAP-Windows adapter.
pub fn device_path(instance_id: &str) -> String {
    format!(r"\\.\Global\{instance_id}.tap")
}

/// Finds the instance ID of the adapter that is backed by `component_id` and, if non-empty, named `wanted_name`.
///
/// Entries that cannot be read are skipped.
/// With a name constraint, the scan continues past adapters of the right driver but with a different name.
pub fn resolve(registry: &impl Registry, component_id: &str, wanted_name: &str) -> Result<String> {
    let adapters = registry.subkeys(ADAPTER_CLASS_KEY).map_err(Error::io(
        "Failed to open the adapter registry, TAP driver may not be installed",
    ))?;

    for adapter in adapters {
        let key = format!(r"{ADAPTER_CLASS_KEY}\{adapter}");

        let Ok(candidate) = registry.read_string(&key, "ComponentId") else {
            continue;
        };

        if candidate != component_id {
            continue;
        }

        let instance_id = match registry.read_string(&key, "NetCfgInstanceId") {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(%adapter, "Failed to read `NetCfgInstanceId`: {e}");
                continue;
            }
        };

        if wanted_name.is_empty() {
            tracing::debug!(%component_id, %instance_id, "Found adapter");

            return Ok(instance_id);
        }

        match connection_name(registry, &instance_id) {
            Ok(name) if name == wanted_name => {
                tracing::debug!(%component_id, %instance_id, %name, "Found adapter");

                return Ok(instance_id);
            }
            Ok(name) => {
                tracing::trace!(%instance_id, %name, "Skipping adapter with different name");
            }
            Err(e) => {
                tracing::debug!(%instance_id, "Failed to read connection name: {e}");
            }
        }
    }

    Err(Error::NotFound {
        component_id: component_id.to_owned(),
        name: wanted_name.to_owned(),
    })
}

fn connection_name(registry: &impl Registry, instance_id: &str) -> io::Result<String> {
    registry.read_string(&format!(r"{NET_CONFIG_KEY}\{instance_id}\Connection"), "Name")
}

/// The Windows registry under `HKEY_LOCAL_MACHINE`.
#[cfg(windows)]
pub struct LocalMachine {
    hklm: winreg::RegKey,
}

#[cfg(windows)]
impl LocalMachine {
    pub fn new() -> Self {
        Self {
            hklm: winreg::RegKey::predef(winreg::enums::HKEY_LOCAL_MACHINE),
        }
    }

    fn open(&self, path: &str) -> io::Result<winreg::RegKey> {
        self.hklm
            .open_subkey_with_flags(path, winreg::enums::KEY_READ)
    }
}

#[cfg(windows)]
impl Default for LocalMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
impl Registry for LocalMachine {
    fn subkeys(&self, path: &str) -> io::Result<Vec<String>> {
        self.open(path)?.enum_keys().collect()
    }

    fn read_string(&self, path: &str, name: &str) -> io::Result<String> {
        self.open(path)?.get_value(name)
    }
}
