//! Create, configure and perform I/O on TUN/TAP virtual network interfaces.
//!
//! [`Interface::open`] takes a [`Config`] and hands back a live interface that can be read from and
//! written to like a file.
//! On Windows, this requires the TAP-Windows driver; on Linux, the universal TUN/TAP driver.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod assembly;
pub mod config;
pub mod control;
pub mod device_dir;
mod error;
pub mod overlapped;
pub mod params;

#[cfg(target_os = "linux")]
mod ioctl;
#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(any(target_os = "linux", windows)))]
mod unsupported;
#[cfg(windows)]
mod windows;

#[cfg(test)]
mod testing;

#[cfg(target_os = "linux")]
use self::linux as platform;
#[cfg(not(any(target_os = "linux", windows)))]
use self::unsupported as platform;
#[cfg(windows)]
use self::windows as platform;

use std::io;

pub use config::{Config, DeviceType};
pub use error::{Error, Result, TransferError};
pub use params::{DevicePermissions, MacOsDriver, PlatformParams};

/// An open virtual network interface.
///
/// Reading yields one packet (TUN) or Ethernet frame (TAP) per call; writing injects one.
/// One reader and one writer may use the interface concurrently.
pub struct Interface {
    device_type: DeviceType,
    name: String,
    device: platform::Device,
}

impl Interface {
    /// Opens the interface described by `config`.
    ///
    /// The parameters of `config` are applied on top of the library defaults.
    pub fn open(config: &Config) -> Result<Self> {
        let params = config.effective_params();
        let (device, name) = platform::open_device(config.device_type, &params)?;

        tracing::info!(%name, device_type = %config.device_type, "Opened interface");

        Ok(Self {
            device_type: config.device_type,
            name,
            device,
        })
    }

    /// The name of the interface as known to the operating system.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn is_tun(&self) -> bool {
        self.device_type == DeviceType::Tun
    }

    pub fn is_tap(&self) -> bool {
        self.device_type == DeviceType::Tap
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        let n = self.device.read(buf)?;

        tracing::trace!(name = %self.name, %n, "Read from interface");

        Ok(n)
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize, TransferError> {
        let n = self.device.write(buf)?;

        tracing::trace!(name = %self.name, %n, "Wrote to interface");

        Ok(n)
    }

    /// Unblocks pending reads and writes; subsequent calls fail.
    ///
    /// The device itself is released when the [`Interface`] is dropped.
    pub fn close(&self) -> io::Result<()> {
        tracing::debug!(name = %self.name, "Closing interface");

        self.device.close()
    }
}

impl io::Read for &Interface {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Interface::read(self, buf)?)
    }
}

impl io::Write for &Interface {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(Interface::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for Interface {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Interface::read(self, buf)?)
    }
}

impl io::Write for Interface {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(Interface::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
