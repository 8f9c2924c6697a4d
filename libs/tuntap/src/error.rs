use std::io;

/// Errors that can occur while setting up a virtual network interface.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No installed adapter matched the requested component ID (and name).
    #[error(
        "Failed to find a device with component ID '{component_id}'{}; the driver may not be installed",
        name_suffix(.name)
    )]
    NotFound { component_id: String, name: String },
    /// An address or CIDR in the configuration is malformed.
    #[error("Invalid configuration: {0}")]
    Validation(String),
    #[error("{context}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    /// The device was set up but no OS interface carries its hardware address.
    #[error("Failed to find the name of the interface with MAC {}", format_mac(.mac))]
    NameNotFound { mac: [u8; 6] },
    #[error("Not supported: {0}")]
    Unsupported(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A failed read or write, together with the number of bytes that were transferred before it failed.
#[derive(thiserror::Error, Debug)]
#[error("I/O failed after {transferred} bytes")]
pub struct TransferError {
    pub transferred: usize,
    #[source]
    pub source: io::Error,
}

impl TransferError {
    pub fn nothing_transferred(source: io::Error) -> Self {
        Self {
            transferred: 0,
            source,
        }
    }
}

impl From<TransferError> for io::Error {
    fn from(e: TransferError) -> Self {
        e.source
    }
}

pub(crate) fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "Interface closed")
}

impl Error {
    pub(crate) fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { context, source }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound { .. } | Error::NameNotFound { .. } => {
                io::Error::new(io::ErrorKind::NotFound, e)
            }
            Error::Validation(_) => io::Error::new(io::ErrorKind::InvalidInput, e),
            Error::Io { source, .. } => source,
            Error::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, e),
        }
    }
}

fn name_suffix(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }

    format!(" and name '{name}'")
}

pub(crate) fn format_mac(mac: &[u8]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
