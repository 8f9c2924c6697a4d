//! An in-memory TAP device for unit tests.

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use parking_lot::{Condvar, Mutex};

use crate::{
    control::{
        DeviceControl, TAP_WIN_IOCTL_GET_MAC, TAP_WIN_IOCTL_GET_MTU, TAP_WIN_IOCTL_GET_VERSION,
    },
    error::TransferError,
    overlapped::{OverlappedDevice, Submission},
};

/// Answers device-control requests like the TAP-Windows driver and loops frames through in-memory queues.
pub struct FakeTap {
    mac: [u8; 6],
    mac_len: usize,
    version: (u32, u32, bool),
    mtu: u32,
    failing_on: Option<u32>,
    failing_writes: Option<usize>,

    shared: Arc<Shared>,
}

/// Observes a [`FakeTap`] after it has been moved elsewhere.
#[derive(Clone)]
pub struct FakeTapHandle(Arc<Shared>);

#[derive(Default)]
struct Shared {
    requests: Mutex<Vec<(u32, Vec<u8>)>>,
    io: Mutex<IoState>,
    io_changed: Condvar,

    completions_created: AtomicUsize,
    resets: AtomicUsize,
    waits: AtomicUsize,
    dropped: AtomicBool,
}

#[derive(Default)]
struct IoState {
    inbound: VecDeque<Vec<u8>>,
    outbound: Vec<Vec<u8>>,
    pending_reads: usize,
    cancelled: bool,
}

#[derive(Default)]
pub struct FakeCompletion {
    pending_read: Option<(*mut u8, usize)>,
}

// Safety: The pointer is only dereferenced while the submitting caller waits for the completion.
unsafe impl Send for FakeCompletion {}

impl FakeTap {
    pub fn new(mac: [u8; 6]) -> Self {
        Self {
            mac,
            mac_len: 6,
            version: (9, 24, false),
            mtu: 1500,
            failing_on: None,
            failing_writes: None,
            shared: Arc::default(),
        }
    }

    /// Truncates the reply to [`TAP_WIN_IOCTL_GET_MAC`].
    pub fn with_mac_len(mut self, len: usize) -> Self {
        self.mac_len = len;
        self
    }

    pub fn with_version(mut self, major: u32, minor: u32, debug: bool) -> Self {
        self.version = (major, minor, debug);
        self
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Fails every request with the given control code.
    pub fn failing_on(mut self, code: u32) -> Self {
        self.failing_on = Some(code);
        self
    }

    /// Fails every write synchronously after `transferred` bytes.
    pub fn with_failing_writes(mut self, transferred: usize) -> Self {
        self.failing_writes = Some(transferred);
        self
    }

    pub fn handle(&self) -> FakeTapHandle {
        FakeTapHandle(self.shared.clone())
    }

    pub fn requests(&self) -> Vec<(u32, Vec<u8>)> {
        self.handle().requests()
    }

    pub fn codes(&self) -> Vec<u32> {
        self.handle().codes()
    }
}

impl FakeTapHandle {
    pub fn requests(&self) -> Vec<(u32, Vec<u8>)> {
        self.0.requests.lock().clone()
    }

    pub fn codes(&self) -> Vec<u32> {
        self.requests().into_iter().map(|(code, _)| code).collect()
    }

    pub fn is_dropped(&self) -> bool {
        self.0.dropped.load(Ordering::SeqCst)
    }

    pub fn push_inbound(&self, frame: Vec<u8>) {
        self.0.io.lock().inbound.push_back(frame);
        self.0.io_changed.notify_all();
    }

    pub fn outbound(&self) -> Vec<Vec<u8>> {
        self.0.io.lock().outbound.clone()
    }

    /// Blocks until a read is in flight.
    pub fn wait_for_pending_read(&self) {
        let mut io = self.0.io.lock();

        while io.pending_reads == 0 {
            self.0.io_changed.wait(&mut io);
        }
    }

    pub fn completions_created(&self) -> usize {
        self.0.completions_created.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.0.resets.load(Ordering::SeqCst)
    }

    pub fn waits(&self) -> usize {
        self.0.waits.load(Ordering::SeqCst)
    }
}

impl Drop for FakeTap {
    fn drop(&mut self) {
        self.shared.dropped.store(true, Ordering::SeqCst);
    }
}

impl DeviceControl for FakeTap {
    fn control(&self, code: u32, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
        self.shared.requests.lock().push((code, input.to_vec()));

        if self.failing_on == Some(code) {
            return Err(io::Error::other("Device rejected request"));
        }

        let reply = match code {
            TAP_WIN_IOCTL_GET_MAC => self.mac[..self.mac_len].to_vec(),
            TAP_WIN_IOCTL_GET_VERSION => {
                let (major, minor, debug) = self.version;

                [major, minor, u32::from(debug)]
                    .into_iter()
                    .flat_map(u32::to_le_bytes)
                    .collect()
            }
            TAP_WIN_IOCTL_GET_MTU => self.mtu.to_le_bytes().to_vec(),
            _ => Vec::new(),
        };

        let len = reply.len().min(output.len());
        output[..len].copy_from_slice(&reply[..len]);

        Ok(len)
    }
}

impl OverlappedDevice for FakeTap {
    type Completion = FakeCompletion;

    fn completion(&self) -> io::Result<Self::Completion> {
        self.shared.completions_created.fetch_add(1, Ordering::SeqCst);

        Ok(FakeCompletion::default())
    }

    fn reset(&self, completion: &mut Self::Completion) -> io::Result<()> {
        self.shared.resets.fetch_add(1, Ordering::SeqCst);
        completion.pending_read = None;

        Ok(())
    }

    unsafe fn submit_read(&self, completion: &mut Self::Completion, buf: &mut [u8]) -> Submission {
        let mut io = self.shared.io.lock();

        if io.cancelled {
            return Submission::Failed {
                transferred: 0,
                error: aborted(),
            };
        }

        if let Some(frame) = io.inbound.pop_front() {
            let len = frame.len().min(buf.len());
            buf[..len].copy_from_slice(&frame[..len]);

            return Submission::Complete(len);
        }

        completion.pending_read = Some((buf.as_mut_ptr(), buf.len()));
        io.pending_reads += 1;
        self.shared.io_changed.notify_all();

        Submission::Pending
    }

    unsafe fn submit_write(&self, _: &mut Self::Completion, buf: &[u8]) -> Submission {
        if let Some(transferred) = self.failing_writes {
            return Submission::Failed {
                transferred,
                error: io::Error::other("Device rejected write"),
            };
        }

        let mut io = self.shared.io.lock();

        if io.cancelled {
            return Submission::Failed {
                transferred: 0,
                error: aborted(),
            };
        }

        io.outbound.push(buf.to_vec());

        Submission::Complete(buf.len())
    }

    fn wait(&self, completion: &mut Self::Completion) -> Result<usize, TransferError> {
        self.shared.waits.fetch_add(1, Ordering::SeqCst);

        let Some((ptr, capacity)) = completion.pending_read.take() else {
            return Err(TransferError::nothing_transferred(io::Error::other(
                "No request in flight",
            )));
        };

        let mut io = self.shared.io.lock();

        loop {
            if io.cancelled {
                io.pending_reads -= 1;

                return Err(TransferError::nothing_transferred(aborted()));
            }

            if let Some(frame) = io.inbound.pop_front() {
                io.pending_reads -= 1;

                let len = frame.len().min(capacity);
                // Safety: The buffer passed to `submit_read` outlives the wait.
                unsafe { std::ptr::copy_nonoverlapping(frame.as_ptr(), ptr, len) };

                return Ok(len);
            }

            self.shared.io_changed.wait(&mut io);
        }
    }

    fn cancel(&self) -> io::Result<()> {
        self.shared.io.lock().cancelled = true;
        self.shared.io_changed.notify_all();

        Ok(())
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "Request cancelled")
}
