//! Unrecoverable failures of the radio and serial collaborators.
//!
//! None of these are retried: a stack that refuses a scan request or a UART
//! that reports a line error is misconfigured, and the firmware halts rather
//! than run degraded. Storage being busy is not an error; see
//! [`crate::scheduler::ScanState::DeferredForStorage`].

use core::fmt;

/// Fatal error raised by the scan and serial paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The radio stack rejected a start-scan request.
    ScanStart,
    /// The serial peripheral could not be configured.
    SerialConfig,
    /// The serial receiver reported a framing, parity or overrun error.
    SerialComm,
    /// The serial receive FIFO overflowed.
    SerialFifo,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ScanStart => write!(f, "radio rejected scan start"),
            Error::SerialConfig => write!(f, "serial configuration failed"),
            Error::SerialComm => write!(f, "serial communication error"),
            Error::SerialFifo => write!(f, "serial FIFO error"),
        }
    }
}
