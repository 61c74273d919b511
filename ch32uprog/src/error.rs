//! Error types for ch32uprog.

use crate::protocol::constants::MAX_FIRMWARE_SIZE;
use crate::session::Phase;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for ch32uprog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Direction of a single guarded transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Sending a frame to the device.
    Write,
    /// Reading an acknowledgment from the device.
    Read,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// Error type for ch32uprog operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error while reading the firmware source.
    #[error("cannot open firmware: {0}")]
    Io(#[from] io::Error),

    /// Serial port error while opening or configuring the port.
    #[cfg(feature = "native")]
    #[error("cannot open port: {0}")]
    Serial(#[from] serialport::Error),

    /// Firmware image is larger than the device accepts.
    #[error("over firmware size: {size} bytes (max {})", MAX_FIRMWARE_SIZE)]
    OversizedImage {
        /// Image size in bytes, capped at one past the limit for sources
        /// that are not read to the end.
        size: usize,
    },

    /// A single transport call did not finish within its deadline.
    #[error("UART {operation} timeout after {}ms", .timeout.as_millis())]
    TransportTimeout {
        /// Which call timed out.
        operation: Operation,
        /// The deadline that expired.
        timeout: Duration,
    },

    /// The transport reported a fault or closed unexpectedly.
    #[error("UART transport error: {0}")]
    Transport(#[source] io::Error),

    /// The device returned fewer acknowledgment bytes than expected.
    #[error("cannot get response: got {received} of {expected} bytes")]
    MalformedAcknowledgment {
        /// Bytes actually received.
        received: usize,
        /// Bytes required for a complete acknowledgment.
        expected: usize,
    },

    /// The device acknowledged with a non-zero status.
    #[error("response status is not success: {status:#04x}")]
    DeviceRejected {
        /// Status byte reported by the device.
        status: u8,
    },

    /// The transport accepted fewer bytes than the frame holds.
    #[error("cannot write all buffer: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes the transport accepted.
        written: usize,
        /// Frame length.
        expected: usize,
    },

    /// A frame was built with more payload than the protocol allows.
    #[error("frame payload too large: {len} bytes")]
    PayloadTooLarge {
        /// Payload length requested.
        len: usize,
    },

    /// The embedding application asked the session to stop.
    #[error("interrupted")]
    Interrupted,

    /// An error raised while the session was in the given phase.
    #[error("{phase} error: {source}")]
    Phase {
        /// Phase that failed.
        phase: Phase,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Tag this error with the phase it happened in.
    ///
    /// Already tagged errors keep their original phase.
    #[must_use]
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            tagged @ Self::Phase { .. } => tagged,
            other => Self::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Phase the error was raised in, if the session tagged it.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The underlying cause, with any phase tag stripped.
    pub fn cause(&self) -> &Self {
        match self {
            Self::Phase { source, .. } => source.cause(),
            other => other,
        }
    }

    /// Whether this error means the device never answered in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause(), Self::TransportTimeout { .. })
    }
}
