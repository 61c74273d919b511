//! Scripted in-memory port for unit tests.
//!
//! Keeps reads and writes independent: every `write` call is recorded as
//! one chunk of bytes and every acknowledgment read pops the next scripted
//! [`Reply`]. A [`MockHandle`] shares the state so tests can inspect it
//! after the port has been moved into a flasher.

use crate::error::Result;
use crate::port::Port;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// What the next read returns.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// A complete two byte acknowledgment.
    Ack([u8; 2]),
    /// Some bytes, then end of stream.
    Partial(Vec<u8>),
    /// End of stream.
    Eof,
    /// Block for the given time, then report a timeout.
    Stall(Duration),
    /// Fail with the given error kind.
    Fail(io::ErrorKind),
}

/// How writes behave.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) enum WriteMode {
    /// Accept everything.
    #[default]
    Full,
    /// Accept at most this many bytes per frame, then report zero.
    Truncate(usize),
    /// Block for the given time before accepting.
    Stall(Duration),
    /// Fail with the given error kind.
    Fail(io::ErrorKind),
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub writes: Vec<Vec<u8>>,
    pub replies: VecDeque<Reply>,
    pub default_ack: Option<[u8; 2]>,
    pub write_mode: WriteMode,
    pub reads: usize,
    pub clears: usize,
    truncated: bool,
}

/// Shared view of a [`MockPort`]'s state.
#[derive(Debug, Clone)]
pub(crate) struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn with<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Every recorded write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.with(|s| s.writes.clone())
    }

    /// Number of acknowledgment reads attempted.
    pub fn reads(&self) -> usize {
        self.with(|s| s.reads)
    }

    /// Number of buffer clears requested.
    pub fn clears(&self) -> usize {
        self.with(|s| s.clears)
    }

    /// Queue replies for upcoming reads.
    pub fn push_replies(&self, replies: impl IntoIterator<Item = Reply>) {
        self.with(|s| s.replies.extend(replies));
    }

    /// Change write behaviour.
    pub fn set_write_mode(&self, mode: WriteMode) {
        self.with(|s| s.write_mode = mode);
    }
}

/// In-memory port driven by a script.
#[derive(Debug)]
pub(crate) struct MockPort {
    state: Arc<Mutex<MockState>>,
}

impl MockPort {
    /// Port that answers every read with a success acknowledgment.
    pub fn acking() -> (Self, MockHandle) {
        Self::build(Some([0x00, 0x00]))
    }

    /// Port that only answers with queued replies, then reports EOF.
    pub fn scripted(replies: impl IntoIterator<Item = Reply>) -> (Self, MockHandle) {
        let (port, handle) = Self::build(None);
        handle.push_replies(replies);
        (port, handle)
    }

    fn build(default_ack: Option<[u8; 2]>) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            default_ack,
            ..MockState::default()
        }));
        let handle = MockHandle {
            state: Arc::clone(&state),
        };
        (Self { state }, handle)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let reply = {
            let mut state = self.lock();
            state.reads += 1;
            match state.replies.pop_front() {
                Some(reply) => reply,
                None => state
                    .default_ack
                    .map_or(Reply::Eof, Reply::Ack),
            }
        };

        // The lock is released here so a stalled read never blocks inspection.
        match reply {
            Reply::Ack(ack) => {
                let n = buf.len().min(ack.len());
                buf[..n].copy_from_slice(&ack[..n]);
                Ok(n)
            },
            Reply::Partial(bytes) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                self.lock()
                    .replies
                    .push_front(Reply::Eof);
                Ok(n)
            },
            Reply::Eof => Ok(0),
            Reply::Stall(delay) => {
                thread::sleep(delay);
                Err(io::Error::new(io::ErrorKind::TimedOut, "stalled"))
            },
            Reply::Fail(kind) => Err(io::Error::new(kind, "mock read failure")),
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mode = self.lock().write_mode;
        match mode {
            WriteMode::Full => {
                self.lock()
                    .writes
                    .push(buf.to_vec());
                Ok(buf.len())
            },
            WriteMode::Truncate(limit) => {
                let mut state = self.lock();
                if state.truncated {
                    state.truncated = false;
                    return Ok(0);
                }
                let n = buf.len().min(limit);
                state.truncated = true;
                state.writes.push(buf[..n].to_vec());
                Ok(n)
            },
            WriteMode::Stall(delay) => {
                thread::sleep(delay);
                self.lock()
                    .writes
                    .push(buf.to_vec());
                Ok(buf.len())
            },
            WriteMode::Fail(kind) => Err(io::Error::new(kind, "mock write failure")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Split a recorded frame into `(cmd, len, arg1, arg2, payload)`.
///
/// Panics if the sync bytes or checksum are wrong.
pub(crate) fn decode(frame: &[u8]) -> (u8, u8, u8, u8, &[u8]) {
    assert!(frame.len() >= 7, "frame too short: {frame:02X?}");
    assert_eq!(&frame[..2], &[0x57, 0xAB], "bad sync bytes");
    let body = &frame[2..frame.len() - 1];
    let sum = body
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b));
    assert_eq!(sum, frame[frame.len() - 1], "bad checksum");
    (body[0], body[1], body[2], body[3], &body[4..])
}

impl Port for MockPort {
    fn clear_buffers(&mut self) -> Result<()> {
        self.lock().clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
