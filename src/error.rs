//! Our error types for the HM305 PSUs and the command server.

use thiserror::Error;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Errors raised while talking to the PSU over the serial link.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Serial communication error: {0:?}")]
    SerialError(I),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("Device rejected request: {0}")]
    DeviceRejected(DeviceFault),
    #[error("Communication timeout")]
    Timeout,
    #[error("Reply does not fit the receive buffer")]
    BufferOverflow,
    #[error("Invalid response received")]
    InvalidResponse,
    #[error("Register {0:#06x} is read-only")]
    ReadOnly(u16),
}

/// Integrity problems with a frame received from the PSU.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The trailing CRC16 does not match the frame contents.
    #[error("Frame CRC mismatch: computed {computed:#06x}, received {received:#06x}")]
    Crc { computed: u16, received: u16 },
    #[error("Frame too short or inconsistent ({0} bytes)")]
    Truncated(usize),
    #[error("Unknown function code {0:#04x}")]
    UnknownFunction(u8),
}

/// What the PSU reported in a `0x83` error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFault {
    /// Sub-code `0x08`: the PSU failed the CRC check of the request we sent.
    CrcRejected,
    /// Any other sub-code.
    Other(u8),
}

impl core::fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeviceFault::CrcRejected => write!(f, "request CRC rejected"),
            DeviceFault::Other(code) => write!(f, "error code {code:#04x}"),
        }
    }
}

/// A request line that could not be turned into a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("syntax error: {0}")]
    Parse(String),
    #[error("cmd not found: {0}")]
    UnknownCommand(String),
}

/// Problems handing a command to the dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A command that needs the serial link was pushed onto the fast queue.
    #[error("{0} cannot be placed in the fast queue")]
    QueueMisuse(String),
    #[error("dispatcher is shutting down")]
    ShuttingDown,
    #[error("failed to spawn worker thread")]
    Spawn(#[from] std::io::Error),
}
