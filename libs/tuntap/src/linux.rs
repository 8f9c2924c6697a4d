//! Linux backend on top of the universal TUN/TAP driver.

use std::{
    ffi::CStr,
    io,
    os::fd::{AsRawFd as _, FromRawFd as _, OwnedFd, RawFd},
    sync::atomic::{AtomicBool, Ordering},
};

use libc::{
    EFD_CLOEXEC, EFD_NONBLOCK, F_GETFL, F_SETFL, O_CLOEXEC, O_NONBLOCK, O_RDWR, POLLIN, POLLOUT,
    eventfd, fcntl, open,
};

use crate::{
    DeviceType, Error, Result,
    error::{TransferError, closed},
    ioctl,
    params::PlatformParams,
};

const TUN_FILE: &CStr = c"/dev/net/tun";

pub fn open_device(device_type: DeviceType, params: &PlatformParams) -> Result<(Device, String)> {
    let mut request = ioctl::Request::<ioctl::SetTunFlagsPayload>::new(
        &params.name,
        device_type,
        params.multi_queue,
    )?;

    let fd = match unsafe { open(TUN_FILE.as_ptr() as _, O_RDWR | O_CLOEXEC) } {
        -1 => return Err(Error::io("Failed to open '/dev/net/tun'")(io::Error::last_os_error())),
        // Safety: We are the only owner of the fresh FD.
        fd => unsafe { OwnedFd::from_raw_fd(fd) },
    };

    unsafe { ioctl::exec(fd.as_raw_fd(), ioctl::TUNSETIFF, &mut request) }
        .map_err(Error::io("Failed to set flags on TUN device"))?;

    let name = request.name().into_owned();

    if params.persist {
        unsafe { ioctl::exec_with_value(fd.as_raw_fd(), ioctl::TUNSETPERSIST, 1) }
            .map_err(Error::io("Failed to make interface persistent"))?;
    }

    if let Some(permissions) = params.permissions {
        if let Some(owner) = permissions.owner {
            unsafe { ioctl::exec_with_value(fd.as_raw_fd(), ioctl::TUNSETOWNER, owner.into()) }
                .map_err(Error::io("Failed to set owner of interface"))?;
        }

        if let Some(group) = permissions.group {
            unsafe { ioctl::exec_with_value(fd.as_raw_fd(), ioctl::TUNSETGROUP, group.into()) }
                .map_err(Error::io("Failed to set group of interface"))?;
        }
    }

    set_non_blocking(fd.as_raw_fd()).map_err(Error::io("Failed to make TUN device non-blocking"))?;

    let wake = match unsafe { eventfd(0, EFD_CLOEXEC | EFD_NONBLOCK) } {
        -1 => return Err(Error::io("Failed to create eventfd")(io::Error::last_os_error())),
        // Safety: We are the only owner of the fresh FD.
        fd => unsafe { OwnedFd::from_raw_fd(fd) },
    };

    tracing::debug!(
        %name,
        %device_type,
        persist = %params.persist,
        multi_queue = %params.multi_queue,
        "Opened TUN/TAP device"
    );

    Ok((
        Device {
            fd,
            wake,
            closed: AtomicBool::new(false),
        },
        name,
    ))
}

/// A TUN/TAP file descriptor in non-blocking mode.
///
/// Reads and writes block in `poll` until the device is ready or [`Device::close`] is called.
pub struct Device {
    fd: OwnedFd,
    /// Becomes readable once the device is closed.
    wake: OwnedFd,
    closed: AtomicBool,
}

impl Device {
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        self.blocking(POLLIN, || {
            // Safety: `buf` is valid for `buf.len()` bytes.
            unsafe { libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) }
        })
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize, TransferError> {
        self.blocking(POLLOUT, || {
            // Safety: `buf` is valid for `buf.len()` bytes.
            unsafe { libc::write(self.fd.as_raw_fd(), buf.as_ptr().cast(), buf.len()) }
        })
    }

    pub fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);

        let one = 1u64.to_ne_bytes();
        // Safety: `one` is 8 bytes, as required by eventfd.
        match unsafe { libc::write(self.wake.as_raw_fd(), one.as_ptr().cast(), one.len()) } {
            -1 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }

    fn blocking(
        &self,
        events: libc::c_short,
        mut syscall: impl FnMut() -> libc::ssize_t,
    ) -> Result<usize, TransferError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransferError::nothing_transferred(closed()));
            }

            let n = syscall();
            if n >= 0 {
                return Ok(n as usize);
            }

            let error = io::Error::last_os_error();
            match error.kind() {
                io::ErrorKind::WouldBlock => {}
                io::ErrorKind::Interrupted => continue,
                _ => return Err(TransferError::nothing_transferred(error)),
            }

            self.poll(events).map_err(TransferError::nothing_transferred)?;
        }
    }

    fn poll(&self, events: libc::c_short) -> io::Result<()> {
        let mut fds = [
            libc::pollfd {
                fd: self.fd.as_raw_fd(),
                events,
                revents: 0,
            },
            libc::pollfd {
                fd: self.wake.as_raw_fd(),
                events: POLLIN,
                revents: 0,
            },
        ];

        // Safety: `fds` is valid for its length.
        match unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as _, -1) } {
            -1 => {
                let error = io::Error::last_os_error();
                if error.kind() == io::ErrorKind::Interrupted {
                    return Ok(());
                }

                Err(error)
            }
            _ => Ok(()),
        }
    }
}

fn set_non_blocking(fd: RawFd) -> io::Result<()> {
    match unsafe { fcntl(fd, F_GETFL) } {
        -1 => Err(io::Error::last_os_error()),
        flags => match unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } {
            -1 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        },
    }
}
