//! # ch32uprog
//!
//! A library for flashing CH32V003 microcontrollers through their UART
//! bootloader.
//!
//! This crate provides:
//!
//! - Command frame encoding for the bootloader protocol
//! - Deadline-bounded serial reads and writes
//! - The erase, program, verify and end session sequence
//!
//! ## Protocol
//!
//! Every command is a frame of two sync bytes, a four byte header, up to 60
//! payload bytes and an 8-bit additive checksum:
//!
//! ```text
//! +------+------+-----+-----+------+------+-----------+-----+
//! | 0x57 | 0xAB | cmd | len | arg1 | arg2 | payload.. | sum |
//! +------+------+-----+-----+------+------+-----------+-----+
//! ```
//!
//! The device answers each command except End with two bytes, the first of
//! which is a status (0 means success).
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for reports
//!
//! ## Example
//!
//! ```rust,no_run
//! use ch32uprog::{FirmwareImage, Flasher};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("firmware.bin")?;
//!     println!("{} bytes in {} chunks", image.len(), image.chunk_count());
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut flasher = Flasher::open("/dev/ttyUSB0", 115200)?;
//!         flasher.flash(&image)?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod flasher;
pub mod guard;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;

// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    error::{Error, Operation, Result},
    flasher::Flasher,
    guard::TransportGuard,
    image::{FirmwareImage, FirmwareSource},
    port::{Port, SerialConfig},
    protocol::{Ack, Command, CommandFrame, FrameBuilder, checksum},
    session::{FlashReport, Phase, SessionState},
};
