//! Serial device resolution.
//!
//! The device comes from `--device`/`CH32UPROG_DEVICE` or the config file.
//! There is no auto-detection: the bootloader sits behind a generic
//! USB-serial adapter that cannot be told apart from any other.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    ch32uprog::{NativePort, SerialConfig, protocol::constants::DEFAULT_BAUD},
    log::debug,
};

/// Resolved connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialOptions {
    /// Device path as passed to the OS.
    pub device: String,
    /// Baud rate.
    pub baud: u32,
}

impl SerialOptions {
    /// Resolve from flags (already merged with env by clap) and config.
    pub fn resolve(device: Option<&str>, baud: Option<u32>, config: &Config) -> Result<Self> {
        let device = device
            .map(str::to_string)
            .or_else(|| config.connection.device.clone())
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| {
                CliError::Usage(
                    "no serial device given; use -d/--device, CH32UPROG_DEVICE or [connection] \
                     device in ch32uprog.toml"
                        .to_string(),
                )
            })?;

        let baud = baud
            .or(config.connection.baud)
            .unwrap_or(DEFAULT_BAUD);
        if baud == 0 {
            return Err(CliError::Usage("baud rate must be greater than zero".to_string()).into());
        }

        Ok(Self {
            device: normalize_device_path(&device),
            baud,
        })
    }

    /// Open the native port.
    pub fn open(&self) -> Result<NativePort> {
        debug!("Opening {} at {} baud", self.device, self.baud);
        NativePort::open(&SerialConfig::new(&self.device, self.baud)).map_err(|e| {
            CliError::Device(format!("cannot open port {}: {e}", self.device)).into()
        })
    }
}

/// Normalize a device name for the current platform.
pub fn normalize_device_path(device: &str) -> String {
    normalize_for(device, cfg!(windows))
}

/// `COMn` ports above 9 must be opened through the `\\.\` namespace on
/// Windows; the prefix is harmless for lower numbers.
fn normalize_for(device: &str, windows: bool) -> String {
    if windows
        && device
            .get(..3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("COM"))
    {
        format!(r"\\.\{device}")
    } else {
        device.to_string()
    }
}
