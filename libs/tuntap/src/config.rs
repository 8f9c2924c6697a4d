use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::params::PlatformParams;

/// The kind of virtual interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// A routed interface carrying IP packets.
    Tun,
    /// A bridged interface carrying Ethernet frames.
    Tap,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Tun => write!(f, "tun"),
            DeviceType::Tap => write!(f, "tap"),
        }
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tun" => Ok(DeviceType::Tun),
            "tap" => Ok(DeviceType::Tap),
            other => Err(format!("Unknown device type '{other}', expected 'tun' or 'tap'")),
        }
    }
}

/// What to open: the kind of device plus its platform parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub device_type: DeviceType,
    #[serde(default)]
    pub params: PlatformParams,
}

impl Config {
    /// A config with the library defaults.
    pub fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            params: PlatformParams::default(),
        }
    }

    /// A config with `overrides` applied on top of the library defaults.
    pub fn with_params(device_type: DeviceType, overrides: PlatformParams) -> Self {
        Self {
            device_type,
            params: PlatformParams::default().base_on(overrides),
        }
    }

    /// The parameters to actually use when opening the device.
    pub(crate) fn effective_params(&self) -> PlatformParams {
        PlatformParams::default().base_on(self.params.clone())
    }
}
