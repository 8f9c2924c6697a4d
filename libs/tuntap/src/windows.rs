//! TAP-Windows backend.

use std::{
    io,
    os::windows::io::{AsRawHandle as _, FromRawHandle as _, OwnedHandle},
    ptr::null,
};

use windows::{
    Win32::{
        Foundation::{
            ERROR_BUFFER_OVERFLOW, ERROR_IO_PENDING, ERROR_NOT_FOUND, GENERIC_READ, GENERIC_WRITE,
            HANDLE, WIN32_ERROR,
        },
        NetworkManagement::IpHelper::{
            GET_ADAPTERS_ADDRESSES_FLAGS, GetAdaptersAddresses, IP_ADAPTER_ADDRESSES_LH,
        },
        Networking::WinSock::AF_UNSPEC,
        Storage::FileSystem::{
            CreateFileW, FILE_ATTRIBUTE_SYSTEM, FILE_FLAG_OVERLAPPED, FILE_SHARE_READ,
            FILE_SHARE_WRITE, OPEN_EXISTING, ReadFile, WriteFile,
        },
        System::{
            IO::{CancelIoEx, DeviceIoControl, GetOverlappedResult, OVERLAPPED},
            Threading::{CreateEventW, ResetEvent},
        },
    },
    core::{HSTRING, PCWSTR},
};

use crate::{
    DeviceType, Error, Result,
    assembly::{self, SystemInterface},
    control::DeviceControl,
    device_dir::{self, LocalMachine},
    error::TransferError,
    overlapped::{OverlappedDevice, OverlappedFile, Submission},
    params::PlatformParams,
};

pub type Device = OverlappedFile<TapHandle>;

pub fn open_device(device_type: DeviceType, params: &PlatformParams) -> Result<(Device, String)> {
    let instance_id =
        device_dir::resolve(&LocalMachine::new(), &params.component_id, &params.name)?;
    let path = device_dir::device_path(&instance_id);

    let tap = TapHandle::open(&path).map_err(Error::io("Failed to open TAP device"))?;

    tracing::debug!(%path, "Opened TAP device");

    assembly::assemble(tap, device_type, params, list_interfaces)
}

/// An open TAP-Windows device, opened for overlapped I/O.
pub struct TapHandle {
    handle: OwnedHandle,
}

/// An `OVERLAPPED` structure and the manual-reset event it signals.
pub struct Completion {
    overlapped: Box<OVERLAPPED>,
    event: OwnedHandle,
}

// Safety: The event handle and the `OVERLAPPED` may be used from any thread.
unsafe impl Send for Completion {}

impl Completion {
    fn new() -> io::Result<Self> {
        // Safety: No security attributes and no name.
        let event = unsafe { CreateEventW(None, true, false, PCWSTR::null()) }?;
        // Safety: `CreateEventW` returned a new handle that nothing else owns.
        let event = unsafe { OwnedHandle::from_raw_handle(event.0) };

        let mut completion = Self {
            overlapped: Box::default(),
            event,
        };
        completion.rearm();

        Ok(completion)
    }

    fn event(&self) -> HANDLE {
        HANDLE(self.event.as_raw_handle())
    }

    fn rearm(&mut self) {
        *self.overlapped = OVERLAPPED {
            hEvent: self.event(),
            ..Default::default()
        };
    }
}

impl TapHandle {
    pub fn open(path: &str) -> io::Result<Self> {
        // Safety: All arguments are valid for the duration of the call.
        let handle = unsafe {
            CreateFileW(
                &HSTRING::from(path),
                (GENERIC_READ | GENERIC_WRITE).0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_ATTRIBUTE_SYSTEM | FILE_FLAG_OVERLAPPED,
                None,
            )
        }?;

        Ok(Self {
            // Safety: `CreateFileW` returned a new handle that nothing else owns.
            handle: unsafe { OwnedHandle::from_raw_handle(handle.0) },
        })
    }

    fn raw(&self) -> HANDLE {
        HANDLE(self.handle.as_raw_handle())
    }

    fn submission(&self, result: windows::core::Result<()>, transferred: u32) -> Submission {
        match result {
            Ok(()) => Submission::Complete(transferred as usize),
            Err(e) if e.code() == ERROR_IO_PENDING.to_hresult() => Submission::Pending,
            Err(e) => Submission::Failed {
                transferred: transferred as usize,
                error: e.into(),
            },
        }
    }
}

impl DeviceControl for TapHandle {
    fn control(&self, code: u32, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
        let mut completion = Completion::new()?;
        let mut returned = 0u32;

        // Safety: `input`, `output` and `completion` outlive the request because we wait for it below.
        let result = unsafe {
            DeviceIoControl(
                self.raw(),
                code,
                (!input.is_empty()).then(|| input.as_ptr().cast()),
                input.len() as u32,
                (!output.is_empty()).then(|| output.as_mut_ptr().cast()),
                output.len() as u32,
                Some(&mut returned),
                Some(&mut *completion.overlapped),
            )
        };

        match self.submission(result, returned) {
            Submission::Complete(n) => Ok(n),
            Submission::Failed { error, .. } => Err(error),
            Submission::Pending => Ok(self.wait(&mut completion)?),
        }
    }
}

impl OverlappedDevice for TapHandle {
    type Completion = Completion;

    fn completion(&self) -> io::Result<Completion> {
        Completion::new()
    }

    fn reset(&self, completion: &mut Completion) -> io::Result<()> {
        // Safety: We own the event.
        unsafe { ResetEvent(completion.event()) }?;
        completion.rearm();

        Ok(())
    }

    unsafe fn submit_read(&self, completion: &mut Completion, buf: &mut [u8]) -> Submission {
        let mut read = 0u32;

        // Safety: The caller guarantees that `buf` and `completion` outlive the request.
        let result = unsafe {
            ReadFile(
                self.raw(),
                Some(buf),
                Some(&mut read),
                Some(&mut *completion.overlapped),
            )
        };

        self.submission(result, read)
    }

    unsafe fn submit_write(&self, completion: &mut Completion, buf: &[u8]) -> Submission {
        let mut written = 0u32;

        // Safety: The caller guarantees that `buf` and `completion` outlive the request.
        let result = unsafe {
            WriteFile(
                self.raw(),
                Some(buf),
                Some(&mut written),
                Some(&mut *completion.overlapped),
            )
        };

        self.submission(result, written)
    }

    fn wait(&self, completion: &mut Completion) -> Result<usize, TransferError> {
        let mut transferred = 0u32;

        // Safety: `completion.overlapped` belongs to a request on this handle.
        unsafe { GetOverlappedResult(self.raw(), &*completion.overlapped, &mut transferred, true) }
            .map_err(|e| TransferError {
                transferred: transferred as usize,
                source: e.into(),
            })?;

        tracing::trace!(%transferred, "Overlapped request completed");

        Ok(transferred as usize)
    }

    fn cancel(&self) -> io::Result<()> {
        // Safety: The handle is open for as long as `self` lives.
        match unsafe { CancelIoEx(self.raw(), None) } {
            Ok(()) => Ok(()),
            Err(e) if e.code() == ERROR_NOT_FOUND.to_hresult() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn list_interfaces() -> io::Result<Vec<SystemInterface>> {
    let interfaces = list_adapters()?
        .filter_map(|adapter| {
            if adapter.FriendlyName.is_null() {
                return None;
            }

            // SAFETY: We checked that the pointer is not null and it lives as long as the adapter list.
            let name = unsafe { adapter.FriendlyName.to_string() }.ok()?;
            let len = (adapter.PhysicalAddressLength as usize).min(adapter.PhysicalAddress.len());

            Some(SystemInterface {
                name,
                hardware_addr: adapter.PhysicalAddress[..len].to_vec(),
            })
        })
        .collect();

    Ok(interfaces)
}

struct Adapters {
    _buffer: Vec<u8>,
    next: *const IP_ADAPTER_ADDRESSES_LH,
}

impl Iterator for Adapters {
    type Item = &'static IP_ADAPTER_ADDRESSES_LH;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: We expect windows to give us a valid linked list where each item of the list is actually an IP_ADAPTER_ADDRESSES_LH.
        let adapter = unsafe { self.next.as_ref()? };

        self.next = adapter.Next;

        Some(adapter)
    }
}

fn list_adapters() -> io::Result<Adapters> {
    // 15kB is recommended to almost never fail
    let mut buffer: Vec<u8> = vec![0u8; 15000];
    let mut buffer_len = buffer.len() as u32;
    // SAFETY: we just allocated buffer with the len we are passing
    let mut res = unsafe {
        GetAdaptersAddresses(
            AF_UNSPEC.0 as u32,
            GET_ADAPTERS_ADDRESSES_FLAGS(0),
            Some(null()),
            Some(buffer.as_mut_ptr() as *mut _),
            &mut buffer_len as *mut _,
        )
    };

    // In case of a buffer overflow buffer_len will contain the necessary length
    if res == ERROR_BUFFER_OVERFLOW.0 {
        buffer = vec![0u8; buffer_len as usize];
        // SAFETY: we just allocated buffer with the len we are passing
        res = unsafe {
            GetAdaptersAddresses(
                AF_UNSPEC.0 as u32,
                GET_ADAPTERS_ADDRESSES_FLAGS(0),
                Some(null()),
                Some(buffer.as_mut_ptr() as *mut _),
                &mut buffer_len as *mut _,
            )
        };
    }

    WIN32_ERROR(res).ok()?;

    let next = buffer.as_ptr() as *const _;
    Ok(Adapters {
        _buffer: buffer,
        next,
    })
}
