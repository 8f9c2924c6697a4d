use std::io;

use crate::{DeviceType, Error, Result, error::TransferError, params::PlatformParams};

pub fn open_device(_: DeviceType, _: &PlatformParams) -> Result<(Device, String)> {
    Err(Error::Unsupported(
        "TUN/TAP interfaces are only supported on Linux and Windows",
    ))
}

/// A device that can never be opened.
pub enum Device {}

impl Device {
    pub fn read(&self, _: &mut [u8]) -> Result<usize, TransferError> {
        match *self {}
    }

    pub fn write(&self, _: &[u8]) -> Result<usize, TransferError> {
        match *self {}
    }

    pub fn close(&self) -> io::Result<()> {
        match *self {}
    }
}
