use std::{io, os::fd::RawFd};

use crate::{DeviceType, Error, Result};

pub const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
pub const TUNSETPERSIST: libc::c_ulong = 0x4004_54cb;
pub const TUNSETOWNER: libc::c_ulong = 0x4004_54cc;
pub const TUNSETGROUP: libc::c_ulong = 0x4004_54ce;

/// Executes the `ioctl` syscall on the given file descriptor with the provided request.
///
/// # Safety
///
/// The file descriptor must be open.
pub unsafe fn exec<P>(fd: RawFd, code: libc::c_ulong, req: &mut Request<P>) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(fd, code as _, req) };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Executes an `ioctl` whose argument is passed by value.
///
/// # Safety
///
/// The file descriptor must be open.
pub unsafe fn exec_with_value(
    fd: RawFd,
    code: libc::c_ulong,
    value: libc::c_ulong,
) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(fd, code as _, value) };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Represents a control request to an IO device, addresses by the device's name.
///
/// The payload MUST also be `#[repr(C)]` and its layout depends on the particular request you are sending.
#[repr(C)]
pub struct Request<P> {
    name: [std::ffi::c_uchar; libc::IF_NAMESIZE],
    payload: P,
}

impl Request<SetTunFlagsPayload> {
    /// A `TUNSETIFF` request; an empty `name` lets the kernel pick one.
    pub fn new(name: &str, device_type: DeviceType, multi_queue: bool) -> Result<Self> {
        let name_as_bytes = name.as_bytes();
        if name_as_bytes.len() >= libc::IF_NAMESIZE || name_as_bytes.contains(&0) {
            return Err(Error::validation(format!(
                "Interface name '{name}' must be shorter than {} bytes and must not contain NUL",
                libc::IF_NAMESIZE
            )));
        }

        let mut name = [0u8; libc::IF_NAMESIZE];
        name[..name_as_bytes.len()].copy_from_slice(name_as_bytes);

        let mut flags = libc::IFF_NO_PI;
        flags |= match device_type {
            DeviceType::Tun => libc::IFF_TUN,
            DeviceType::Tap => libc::IFF_TAP,
        };
        if multi_queue {
            flags |= libc::IFF_MULTI_QUEUE;
        }

        Ok(Self {
            name,
            payload: SetTunFlagsPayload {
                flags: flags as _,
                _padding: [0; 22],
            },
        })
    }

    /// The interface name, as filled in by the kernel.
    pub fn name(&self) -> std::borrow::Cow<'_, str> {
        let len = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.name.len());

        String::from_utf8_lossy(&self.name[..len])
    }

    #[cfg(test)]
    pub fn flags(&self) -> std::ffi::c_short {
        self.payload.flags
    }
}

/// The remainder of `struct ifreq` after the name: the flags plus padding up to the size of the union.
#[repr(C)]
pub struct SetTunFlagsPayload {
    flags: std::ffi::c_short,
    _padding: [u8; 22],
}
