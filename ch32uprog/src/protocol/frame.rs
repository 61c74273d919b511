//! Command frames of the CH32V003 UART bootloader.
//!
//! ## Frame Format
//!
//! ```text
//! +-------+-------+-----+-----+------+------+-----------+----------+
//! | Sync1 | Sync2 | Cmd | Len | Arg1 | Arg2 |  Payload  | Checksum |
//! +-------+-------+-----+-----+------+------+-----------+----------+
//! |   1   |   1   |  1  |  1  |  1   |  1   |   0..60   |    1     |
//! +-------+-------+-----+-----+------+------+-----------+----------+
//! | 0x57  | 0xAB  | cmd | len | addr lo/hi  |   data    | sum      |
//! +-------+-------+-----+-----+------+------+-----------+----------+
//! ```
//!
//! The checksum is the wrapping 8-bit sum of every byte from `Cmd` through
//! the last payload byte. The sync bytes are not summed.
//!
//! The device answers every frame except End with a two byte
//! acknowledgment, see [`Ack`].

use crate::error::{Error, Result};
use crate::protocol::constants::{
    ACK_LEN, ACK_SUCCESS, CMD_END, CMD_ERASE, CMD_PROGRAM, CMD_VERIFY, CONTROL_LEN, FRAME_OVERHEAD,
    MAX_PAYLOAD, SYNC1, SYNC2,
};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Bootloader command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Program a chunk (0x80).
    Program = CMD_PROGRAM,
    /// Erase user flash (0x81).
    Erase = CMD_ERASE,
    /// Verify a chunk (0x82).
    Verify = CMD_VERIFY,
    /// Leave the bootloader (0x83).
    End = CMD_END,
}

impl Command {
    /// Wire code of this command.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look a command up by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            CMD_PROGRAM => Some(Self::Program),
            CMD_ERASE => Some(Self::Erase),
            CMD_VERIFY => Some(Self::Verify),
            CMD_END => Some(Self::End),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Program => write!(f, "Program"),
            Self::Erase => write!(f, "Erase"),
            Self::Verify => write!(f, "Verify"),
            Self::End => write!(f, "End"),
        }
    }
}

/// Wrapping 8-bit sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Incremental frame serializer with a running checksum.
///
/// A frame is started with [`begin`](Self::begin), extended with payload
/// bytes and closed with [`finish`](Self::finish). `finish` hands the bytes
/// out as an owned buffer and resets the accumulator, so one builder can be
/// reused for every frame of a session.
#[derive(Debug)]
pub struct FrameBuilder {
    buf: Vec<u8>,
    check: u8,
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_OVERHEAD + MAX_PAYLOAD),
            check: 0,
        }
    }

    /// Start a frame: sync bytes plus the four summed header bytes.
    ///
    /// Any partially built frame is discarded.
    pub fn begin(&mut self, command: u8, length: u8, arg1: u8, arg2: u8) -> &mut Self {
        self.buf.clear();
        self.check = 0;
        self.buf.push(SYNC1);
        self.buf.push(SYNC2);
        self.push(command)
            .push(length)
            .push(arg1)
            .push(arg2)
    }

    /// Append one summed byte.
    pub fn push(&mut self, byte: u8) -> &mut Self {
        self.buf.push(byte);
        self.check = self.check.wrapping_add(byte);
        self
    }

    /// Append summed payload bytes.
    pub fn extend(&mut self, bytes: &[u8]) -> &mut Self {
        for &b in bytes {
            self.push(b);
        }
        self
    }

    /// Running checksum of the frame under construction.
    pub fn checksum(&self) -> u8 {
        self.check
    }

    /// Bytes written so far, checksum excluded.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written since the last `finish`.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append the checksum and take the finished frame.
    ///
    /// The accumulator is zero afterwards; checksums of consecutive frames
    /// must never mix.
    pub fn finish(&mut self) -> Vec<u8> {
        let check = std::mem::take(&mut self.check);
        self.buf.push(check);
        std::mem::replace(
            &mut self.buf,
            Vec::with_capacity(FRAME_OVERHEAD + MAX_PAYLOAD),
        )
    }
}

/// One bootloader command with its arguments and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    command: Command,
    length: u8,
    arg1: u8,
    arg2: u8,
    payload: Vec<u8>,
}

impl CommandFrame {
    /// Build the Erase frame.
    pub fn erase() -> Self {
        Self::control(Command::Erase)
    }

    /// Build the End frame.
    pub fn end() -> Self {
        Self::control(Command::End)
    }

    fn control(command: Command) -> Self {
        Self {
            command,
            length: CONTROL_LEN,
            arg1: 0,
            arg2: 0,
            payload: Vec::new(),
        }
    }

    /// Build a Program frame for `chunk` at `offset`.
    pub fn program(offset: u16, chunk: &[u8]) -> Result<Self> {
        Self::data(Command::Program, offset, chunk)
    }

    /// Build a Verify frame for `chunk` at `offset`.
    pub fn verify(offset: u16, chunk: &[u8]) -> Result<Self> {
        Self::data(Command::Verify, offset, chunk)
    }

    /// Build a data-carrying frame.
    ///
    /// The length field is the chunk size and the offset is split into
    /// little-endian `arg1`/`arg2`.
    pub fn data(command: Command, offset: u16, chunk: &[u8]) -> Result<Self> {
        if chunk.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge { len: chunk.len() });
        }
        let length =
            u8::try_from(chunk.len()).map_err(|_| Error::PayloadTooLarge { len: chunk.len() })?;
        let mut addr = [0u8; 2];
        LittleEndian::write_u16(&mut addr, offset);

        Ok(Self {
            command,
            length,
            arg1: addr[0],
            arg2: addr[1],
            payload: chunk.to_vec(),
        })
    }

    /// Serialize using a fresh builder.
    pub fn build(&self) -> Vec<u8> {
        self.write_to(&mut FrameBuilder::new())
    }

    /// Serialize using an existing builder.
    pub fn write_to(&self, builder: &mut FrameBuilder) -> Vec<u8> {
        builder
            .begin(self.command.code(), self.length, self.arg1, self.arg2)
            .extend(&self.payload)
            .finish()
    }

    /// Checksum byte this frame serializes with.
    pub fn checksum(&self) -> u8 {
        checksum(&[self.command.code(), self.length, self.arg1, self.arg2])
            .wrapping_add(checksum(&self.payload))
    }

    /// Get the command.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Declared length field.
    pub fn length(&self) -> u8 {
        self.length
    }

    /// Raw argument bytes.
    pub fn args(&self) -> (u8, u8) {
        (self.arg1, self.arg2)
    }

    /// Argument bytes read as the little-endian flash offset.
    pub fn offset(&self) -> u16 {
        LittleEndian::read_u16(&[self.arg1, self.arg2])
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialized length in bytes.
    pub fn wire_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }
}

/// Device acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Status byte (0x00 = success).
    pub status: u8,
    /// Reserved byte, unused by this protocol version.
    pub reserved: u8,
}

impl Ack {
    /// Parse the two acknowledgment bytes.
    pub fn from_bytes(bytes: [u8; ACK_LEN]) -> Self {
        Self {
            status: bytes[0],
            reserved: bytes[1],
        }
    }

    /// Check if this is a successful response.
    pub fn is_success(&self) -> bool {
        self.status == ACK_SUCCESS
    }

    /// Turn a failure status into [`Error::DeviceRejected`].
    pub fn check(self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::DeviceRejected {
                status: self.status,
            })
        }
    }
}
