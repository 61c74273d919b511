//! Wire-level constants of the CH32V003 UART bootloader protocol.
//!
//! Every literal that shapes a frame lives here so the format can be audited
//! in one place.

use std::time::Duration;

/// First sync byte of every frame.
pub const SYNC1: u8 = 0x57;

/// Second sync byte of every frame.
pub const SYNC2: u8 = 0xAB;

/// Program a chunk of flash.
pub const CMD_PROGRAM: u8 = 0x80;

/// Erase the user flash.
pub const CMD_ERASE: u8 = 0x81;

/// Compare a chunk of flash against the payload.
pub const CMD_VERIFY: u8 = 0x82;

/// Leave the bootloader.
pub const CMD_END: u8 = 0x83;

/// Length field used by the argument-less Erase and End commands.
pub const CONTROL_LEN: u8 = 2;

/// Maximum payload carried by one frame.
pub const MAX_PAYLOAD: usize = 60;

/// Frame bytes that surround the payload: sync(2) + header(4) + checksum(1).
pub const FRAME_OVERHEAD: usize = 7;

/// Largest firmware image the device accepts (16 KiB of user flash).
pub const MAX_FIRMWARE_SIZE: usize = 16 << 10;

/// Acknowledgment length in bytes.
pub const ACK_LEN: usize = 2;

/// Acknowledgment status for success.
pub const ACK_SUCCESS: u8 = 0x00;

/// Deadline for a single transport write or read.
pub const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Baud rate used by the bootloader unless told otherwise.
pub const DEFAULT_BAUD: u32 = 115_200;
