use thiserror::Error;

/// Error kinds per the driver's error-handling design: transport errors leave
/// the mirror untouched, protocol mismatches are logged once, and bad
/// arguments never reach the wire.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o transport error: {0}")]
    IoTransport(#[from] usb_iface::UsbIfaceError),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(&'static str),

    #[error("bad argument: {0}")]
    BadArgument(&'static str),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("not supported: {0}")]
    NotSupported(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
