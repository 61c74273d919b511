//! Port abstraction for the serial link to the bootloader.
//!
//! The flasher never talks to a concrete serial API. It drives any type
//! implementing [`Port`], which keeps the protocol layer I/O-agnostic:
//!
//! ```text
//! +------------------+
//! |  Session / Guard |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |    Port Trait    |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | NativePort       |
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! Opening and closing the port stays with the caller. The flasher only
//! borrows it for the length of a session.

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::protocol::constants::{DEFAULT_BAUD, IO_TIMEOUT};

/// Serial port configuration.
///
/// The bootloader always runs 8N1 without flow control, so only the name,
/// baud rate and timeout are configurable.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout of the underlying handle.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: IO_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte-oriented duplex transport to the device.
///
/// `Send` is required because each guarded call runs on a short-lived worker
/// thread.
///
/// Line settings are fixed when the port is opened.
pub trait Port: Read + Write + Send {
    /// Discard anything pending in the input and output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn clear_buffers(&mut self) -> Result<()> {
        (**self).clear_buffers()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

// Re-export the appropriate implementation based on features
#[cfg(feature = "native")]
pub use native::NativePort;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_serial_config_builder() {
        let config =
            SerialConfig::new("/dev/ttyUSB0", 460800).with_timeout(Duration::from_millis(250));

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 460800);
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_boxed_port_delegates() {
        let (port, handle) = mock::MockPort::acking();
        let mut port: Box<dyn Port> = Box::new(port);

        assert_eq!(port.name(), "mock");
        port.clear_buffers().unwrap();
        port.close().unwrap();
        assert_eq!(handle.clears(), 1);
    }
}
