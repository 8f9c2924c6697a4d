//! Blocking reads and writes on top of a device that completes I/O asynchronously.
//!
//! Each direction owns one completion context and a lock around it.
//! At most one request per direction is outstanding at any time, so one reader and one writer can
//! make progress concurrently while callers of the same direction queue up on the lock.

use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

use crate::error::{TransferError, closed};

/// The immediate outcome of submitting an I/O request.
#[derive(Debug)]
pub enum Submission {
    /// The request completed synchronously.
    Complete(usize),
    /// The request is in flight; its completion context will be signalled.
    Pending,
    /// The request failed synchronously.
    Failed {
        transferred: usize,
        error: io::Error,
    },
}

/// A device that supports overlapped I/O.
pub trait OverlappedDevice: Send + Sync {
    /// Per-request state that the OS signals upon completion.
    type Completion: Send;

    /// Creates a new, unsignalled completion context.
    fn completion(&self) -> io::Result<Self::Completion>;

    /// Puts `completion` back into the unsignalled state.
    fn reset(&self, completion: &mut Self::Completion) -> io::Result<()>;

    /// Submits a read into `buf`.
    ///
    /// # Safety
    ///
    /// If this returns [`Submission::Pending`], `buf` and `completion` must stay valid and must not be
    /// touched until [`wait`](OverlappedDevice::wait) returned for `completion`.
    unsafe fn submit_read(&self, completion: &mut Self::Completion, buf: &mut [u8]) -> Submission;

    /// Submits a write of `buf`.
    ///
    /// # Safety
    ///
    /// Same as [`submit_read`](OverlappedDevice::submit_read).
    unsafe fn submit_write(&self, completion: &mut Self::Completion, buf: &[u8]) -> Submission;

    /// Blocks until the pending request on `completion` finished and returns its byte count.
    fn wait(&self, completion: &mut Self::Completion) -> Result<usize, TransferError>;

    /// Cancels all outstanding requests, making their [`wait`](OverlappedDevice::wait) return an error.
    fn cancel(&self) -> io::Result<()>;
}

/// Owns an [`OverlappedDevice`] and exposes it as a blocking byte stream.
pub struct OverlappedFile<D>
where
    D: OverlappedDevice,
{
    device: D,

    read: Mutex<D::Completion>,
    write: Mutex<D::Completion>,

    closed: AtomicBool,
}

impl<D> OverlappedFile<D>
where
    D: OverlappedDevice,
{
    pub fn new(device: D) -> io::Result<Self> {
        let read = device.completion()?;
        let write = device.completion()?;

        Ok(Self {
            device,
            read: Mutex::new(read),
            write: Mutex::new(write),
            closed: AtomicBool::new(false),
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Reads one unit (a frame or packet) from the device into `buf`.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        let mut completion = self.read.lock();

        self.ensure_open()?;
        self.device
            .reset(&mut completion)
            .map_err(TransferError::nothing_transferred)?;

        // Safety: We hold the lock and `buf` is borrowed until `finish` returns, which waits for any pending request.
        let submission = unsafe { self.device.submit_read(&mut completion, buf) };

        self.finish(&mut completion, submission)
    }

    /// Writes one unit (a frame or packet) from `buf` to the device.
    pub fn write(&self, buf: &[u8]) -> Result<usize, TransferError> {
        let mut completion = self.write.lock();

        self.ensure_open()?;
        self.device
            .reset(&mut completion)
            .map_err(TransferError::nothing_transferred)?;

        // Safety: We hold the lock and `buf` is borrowed until `finish` returns, which waits for any pending request.
        let submission = unsafe { self.device.submit_write(&mut completion, buf) };

        self.finish(&mut completion, submission)
    }

    /// Unblocks all pending and future reads and writes with an error.
    ///
    /// The underlying handle is released once `self` is dropped.
    pub fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.device.cancel()
    }

    fn finish(
        &self,
        completion: &mut D::Completion,
        submission: Submission,
    ) -> Result<usize, TransferError> {
        match submission {
            Submission::Complete(n) => Ok(n),
            Submission::Failed { transferred, error } => Err(TransferError {
                transferred,
                source: error,
            }),
            Submission::Pending => {
                // `close` may have run between our `ensure_open` and the submission, in which case it didn't see our request.
                if self.closed.load(Ordering::SeqCst) {
                    logging::unwrap_or_debug!(
                        self.device.cancel(),
                        "Failed to cancel request after close: {}"
                    );
                }

                self.device.wait(completion)
            }
        }
    }

    fn ensure_open(&self) -> Result<(), TransferError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransferError::nothing_transferred(closed()));
        }

        Ok(())
    }
}

impl<D> std::fmt::Debug for OverlappedFile<D>
where
    D: OverlappedDevice,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlappedFile")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<D> io::Read for &OverlappedFile<D>
where
    D: OverlappedDevice,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(OverlappedFile::read(self, buf)?)
    }
}

impl<D> io::Write for &OverlappedFile<D>
where
    D: OverlappedDevice,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(OverlappedFile::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
