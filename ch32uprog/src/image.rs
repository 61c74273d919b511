//! Firmware images and the sources they are read from.
//!
//! The payload is a raw binary. A session reads its source twice, once for
//! the program pass and once for the verify pass, so a [`FirmwareSource`]
//! must be able to produce the bytes again on every call.

use crate::error::{Error, Result};
use crate::protocol::constants::{MAX_FIRMWARE_SIZE, MAX_PAYLOAD};
use log::debug;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

/// A re-readable source of firmware bytes.
pub trait FirmwareSource {
    /// Human readable description used in logs.
    fn describe(&self) -> String;

    /// Open a fresh reader positioned at the first byte.
    fn open(&self) -> Result<Box<dyn Read + '_>>;
}

impl FirmwareSource for Path {
    fn describe(&self) -> String {
        self.display().to_string()
    }

    fn open(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(BufReader::new(File::open(self)?)))
    }
}

impl FirmwareSource for PathBuf {
    fn describe(&self) -> String {
        self.as_path().describe()
    }

    fn open(&self) -> Result<Box<dyn Read + '_>> {
        self.as_path().open()
    }
}

impl FirmwareSource for [u8] {
    fn describe(&self) -> String {
        format!("<{} byte buffer>", self.len())
    }

    fn open(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(Cursor::new(self)))
    }
}

impl FirmwareSource for Vec<u8> {
    fn describe(&self) -> String {
        self.as_slice().describe()
    }

    fn open(&self) -> Result<Box<dyn Read + '_>> {
        self.as_slice().open()
    }
}

impl<S: FirmwareSource + ?Sized> FirmwareSource for &S {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&self) -> Result<Box<dyn Read + '_>> {
        (**self).open()
    }
}

/// A size-checked firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wrap raw bytes, rejecting images larger than the device flash.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_FIRMWARE_SIZE {
            return Err(Error::OversizedImage { size: data.len() });
        }
        Ok(Self { data })
    }

    /// Read a complete image from `source`.
    ///
    /// Reading stops one byte past the device capacity, so an endless or huge
    /// source is rejected without being buffered.
    pub fn load<S: FirmwareSource + ?Sized>(source: &S) -> Result<Self> {
        let mut data = Vec::new();
        source
            .open()?
            .take(MAX_FIRMWARE_SIZE as u64 + 1)
            .read_to_end(&mut data)?;
        debug!("Loaded {} bytes from {}", data.len(), source.describe());
        Self::new(data)
    }

    /// Read a complete image from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(path.as_ref())
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of frames needed to send the image.
    pub fn chunk_count(&self) -> usize {
        self.data.len().div_ceil(MAX_PAYLOAD)
    }

    /// Iterate over `(offset, chunk)` pairs of at most `MAX_PAYLOAD` bytes.
    pub fn chunks(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.data
            .chunks(MAX_PAYLOAD)
            .enumerate()
            .map(|(i, chunk)| (i * MAX_PAYLOAD, chunk))
    }
}

impl FirmwareSource for FirmwareImage {
    fn describe(&self) -> String {
        self.data.describe()
    }

    fn open(&self) -> Result<Box<dyn Read + '_>> {
        self.data.open()
    }
}

impl AsRef<[u8]> for FirmwareImage {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
