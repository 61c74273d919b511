//! Deadline-bounded transport calls.
//!
//! Serial reads and writes block, and a stalled bootloader would otherwise
//! hang the tool forever. [`TransportGuard`] runs every call on a worker
//! thread and waits for its result with a deadline:
//!
//! ```text
//!  caller                 worker
//!    |  spawn(frame) -------> |  lock port, write/read
//!    |  recv_timeout(1s)      |
//!    |<------- result ------- |   (in time: returned)
//!    |  ...timeout...         |
//!    x  TransportTimeout      |-> send fails, result dropped
//! ```
//!
//! A worker that misses the deadline is not cancelled. It keeps running
//! until the blocking call returns on its own, so:
//!
//! - each call owns its buffers (the frame is moved into the worker, the
//!   acknowledgment buffer is created inside it),
//! - the port sits behind a mutex, so a late worker finishes before the next
//!   call can touch the handle,
//! - the call after a timeout clears the port's buffers first, so bytes
//!   meant for the abandoned call are not taken as a fresh acknowledgment,
//! - a call that timed out before it got the port never touches it: its
//!   worker sees the abandoned flag once the lock is free and returns.

use crate::error::{Error, Operation, Result};
use crate::port::Port;
use crate::protocol::constants::{ACK_LEN, IO_TIMEOUT};
use crate::protocol::frame::Ack;
use log::{debug, trace, warn};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Runs single transport calls against a deadline.
pub struct TransportGuard<P: Port + 'static> {
    port: Arc<Mutex<P>>,
    timeout: Duration,
    needs_drain: bool,
}

impl<P: Port + 'static> TransportGuard<P> {
    /// Guard `port` with the default one second deadline.
    pub fn new(port: P) -> Self {
        Self {
            port: Arc::new(Mutex::new(port)),
            timeout: IO_TIMEOUT,
            needs_drain: false,
        }
    }

    /// Set the per-call deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the per-call deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the next call will clear stale bytes left by a timed out call.
    pub fn needs_drain(&self) -> bool {
        self.needs_drain
    }

    /// Port name, or `None` while a straggling call still holds the port.
    pub fn port_name(&self) -> Option<String> {
        self.port
            .try_lock()
            .ok()
            .map(|p| p.name().to_string())
    }

    /// Take the port back.
    ///
    /// Fails with the guard itself if an abandoned call still holds a
    /// reference to the port.
    pub fn into_port(self) -> std::result::Result<P, Self> {
        let Self {
            port,
            timeout,
            needs_drain,
        } = self;
        match Arc::try_unwrap(port) {
            Ok(mutex) => Ok(mutex
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)),
            Err(port) => Err(Self {
                port,
                timeout,
                needs_drain,
            }),
        }
    }

    /// Send one complete frame.
    pub fn write_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        let expected = frame.len();
        trace!("TX {frame:02X?}");

        let written = self.run(Operation::Write, move |port| {
            let mut written = 0;
            while written < frame.len() {
                match port.write(&frame[written..]) {
                    Ok(0) => break,
                    Ok(n) => written += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => {},
                    Err(e) => return Err(map_io(e, Operation::Write)),
                }
            }
            port.flush()
                .map_err(|e| map_io(e, Operation::Write))?;
            Ok(written)
        })?;

        if written != expected {
            return Err(Error::ShortWrite { written, expected });
        }
        Ok(())
    }

    /// Read one two-byte acknowledgment.
    ///
    /// The status byte is not checked here; see [`Ack::check`].
    pub fn read_ack(&mut self) -> Result<Ack> {
        let (buf, filled) = self.run(Operation::Read, |port| {
            let mut buf = [0u8; ACK_LEN];
            let mut filled = 0;
            while filled < ACK_LEN {
                match port.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => {},
                    Err(e) => return Err(map_io(e, Operation::Read)),
                }
            }
            Ok((buf, filled))
        })?;

        trace!("RX {:02X?}", &buf[..filled]);
        match filled {
            0 => Err(Error::Transport(io::Error::new(
                ErrorKind::UnexpectedEof,
                "response closed",
            ))),
            n if n < ACK_LEN => Err(Error::MalformedAcknowledgment {
                received: n,
                expected: ACK_LEN,
            }),
            _ => Ok(Ack::from_bytes(buf)),
        }
    }

    /// Run `op` on a worker and wait at most `self.timeout` for it.
    fn run<T, F>(&mut self, operation: Operation, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut P) -> Result<T> + Send + 'static,
    {
        // Capacity 1: the worker's send never blocks, even with nobody listening.
        let (tx, rx) = mpsc::sync_channel(1);
        let port = Arc::clone(&self.port);
        let drain = std::mem::take(&mut self.needs_drain);
        let abandoned = Arc::new(AtomicBool::new(false));
        let worker_abandoned = Arc::clone(&abandoned);

        thread::Builder::new()
            .name(format!("ch32uprog-{operation}"))
            .spawn(move || {
                let mut port = port
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                // The caller already reported this call as failed.
                if worker_abandoned.load(Ordering::SeqCst) {
                    debug!("Skipping abandoned UART {operation}");
                    return;
                }
                if drain {
                    debug!("Clearing stale bytes after an abandoned call");
                    if let Err(e) = port.clear_buffers() {
                        warn!("Could not clear port buffers: {e}");
                    }
                }
                let result = op(&mut *port);
                // Fire-and-forget on timeout: if the caller stopped waiting,
                // the receiver is gone and this late result is dropped here.
                let _ = tx.send(result);
            })
            .map_err(Error::Transport)?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => {
                if let Err(Error::TransportTimeout { .. }) = &result {
                    self.needs_drain = true;
                }
                result.map_err(|e| match e {
                    Error::TransportTimeout { operation, .. } => Error::TransportTimeout {
                        operation,
                        timeout: self.timeout,
                    },
                    other => other,
                })
            },
            Err(RecvTimeoutError::Timeout) => {
                // A worker still queued on the lock is skipped. One already
                // inside `op` runs to completion and its result is dropped.
                abandoned.store(true, Ordering::SeqCst);
                warn!(
                    "UART {operation} did not finish within {}ms, abandoning it",
                    self.timeout.as_millis()
                );
                self.needs_drain = true;
                Err(Error::TransportTimeout {
                    operation,
                    timeout: self.timeout,
                })
            },
            Err(RecvTimeoutError::Disconnected) => Err(Error::Transport(io::Error::other(
                format!("UART {operation} worker exited without a result"),
            ))),
        }
    }
}

/// Map a transport `io::Error`, keeping timeouts distinct from faults.
///
/// The deadline is filled in by the guard once the result comes back.
fn map_io(e: io::Error, operation: Operation) -> Error {
    if e.kind() == ErrorKind::TimedOut {
        Error::TransportTimeout {
            operation,
            timeout: IO_TIMEOUT,
        }
    } else {
        Error::Transport(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockPort, Reply, WriteMode};
    use std::time::Instant;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_write_frame_records_bytes() {
        let (port, handle) = MockPort::acking();
        let mut guard = TransportGuard::new(port);

        guard
            .write_frame(vec![0x57, 0xAB, 0x81, 0x02, 0x00, 0x00, 0x83])
            .unwrap();
        assert_eq!(handle.writes(), vec![vec![0x57, 0xAB, 0x81, 0x02, 0x00, 0x00, 0x83]]);
    }

    #[test]
    fn test_short_write() {
        let (port, handle) = MockPort::acking();
        handle.set_write_mode(WriteMode::Truncate(3));
        let mut guard = TransportGuard::new(port);

        let err = guard
            .write_frame(vec![0; 7])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ShortWrite {
                written: 3,
                expected: 7
            }
        ));
    }

    #[test]
    fn test_write_error_is_transport_error() {
        let (port, handle) = MockPort::acking();
        handle.set_write_mode(WriteMode::Fail(ErrorKind::BrokenPipe));
        let mut guard = TransportGuard::new(port);

        let err = guard
            .write_frame(vec![0; 7])
            .unwrap_err();
        assert!(matches!(err, Error::Transport(ref e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[test]
    fn test_stalled_write_times_out() {
        let (port, handle) = MockPort::acking();
        handle.set_write_mode(WriteMode::Stall(Duration::from_secs(2)));
        let mut guard = TransportGuard::new(port).with_timeout(SHORT);

        let start = Instant::now();
        let err = guard
            .write_frame(vec![0; 7])
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(matches!(
            err,
            Error::TransportTimeout {
                operation: Operation::Write,
                ..
            }
        ));
    }

    #[test]
    fn test_read_ack() {
        let (port, _handle) = MockPort::scripted([Reply::Ack([0x00, 0x42])]);
        let mut guard = TransportGuard::new(port);

        let ack = guard.read_ack().unwrap();
        assert!(ack.is_success());
        assert_eq!(ack.reserved, 0x42);
    }

    #[test]
    fn test_read_ack_does_not_check_status() {
        let (port, _handle) = MockPort::scripted([Reply::Ack([0x05, 0x00])]);
        let mut guard = TransportGuard::new(port);

        let ack = guard.read_ack().unwrap();
        assert_eq!(ack.status, 0x05);
    }

    #[test]
    fn test_read_eof_is_response_closed() {
        let (port, _handle) = MockPort::scripted([Reply::Eof]);
        let mut guard = TransportGuard::new(port);

        let err = guard.read_ack().unwrap_err();
        assert!(matches!(err, Error::Transport(ref e) if e.kind() == ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_read_single_byte_is_malformed() {
        let (port, _handle) = MockPort::scripted([Reply::Partial(vec![0x00])]);
        let mut guard = TransportGuard::new(port);

        let err = guard.read_ack().unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedAcknowledgment {
                received: 1,
                expected: 2
            }
        ));
    }

    #[test]
    fn test_read_fault_is_transport_error() {
        let (port, _handle) = MockPort::scripted([Reply::Fail(ErrorKind::PermissionDenied)]);
        let mut guard = TransportGuard::new(port);

        let err = guard.read_ack().unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_stalled_read_times_out_within_margin() {
        let (port, _handle) = MockPort::scripted([Reply::Stall(Duration::from_secs(5))]);
        let mut guard = TransportGuard::new(port).with_timeout(SHORT);

        let start = Instant::now();
        let err = guard.read_ack().unwrap_err();
        let elapsed = start.elapsed();

        assert!(elapsed >= SHORT);
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
        assert!(matches!(
            err,
            Error::TransportTimeout {
                operation: Operation::Read,
                timeout: SHORT
            }
        ));
        assert!(guard.needs_drain());
    }

    #[test]
    fn test_port_timeout_maps_to_transport_timeout() {
        // The port gives up on its own before the guard's deadline.
        let (port, _handle) = MockPort::scripted([Reply::Stall(Duration::ZERO)]);
        let mut guard = TransportGuard::new(port).with_timeout(Duration::from_secs(1));

        let err = guard.read_ack().unwrap_err();
        assert!(matches!(
            err,
            Error::TransportTimeout {
                timeout,
                ..
            } if timeout == Duration::from_secs(1)
        ));
    }

    #[test]
    fn test_call_after_timeout_drains_port() {
        let (port, handle) = MockPort::scripted([
            Reply::Stall(Duration::from_millis(150)),
            Reply::Ack([0x00, 0x00]),
        ]);
        let mut guard = TransportGuard::new(port).with_timeout(SHORT);

        assert!(guard.read_ack().unwrap_err().is_timeout());
        assert_eq!(handle.clears(), 0);

        // The next worker waits for the straggler to release the port.
        guard.timeout = Duration::from_secs(1);
        let ack = guard.read_ack().unwrap();
        assert!(ack.is_success());
        assert_eq!(handle.clears(), 1);
        assert!(!guard.needs_drain());
    }

    #[test]
    fn test_into_port_waits_for_straggler() {
        let (port, _handle) = MockPort::scripted([Reply::Stall(Duration::from_millis(200))]);
        let mut guard = TransportGuard::new(port).with_timeout(SHORT);
        assert!(guard.read_ack().is_err());

        // Straggler still holds the port.
        let guard = match guard.into_port() {
            Ok(_) => panic!("port returned while a call was in flight"),
            Err(guard) => guard,
        };

        thread::sleep(Duration::from_millis(400));
        assert!(guard.into_port().is_ok());
    }

    #[test]
    fn test_call_timed_out_on_lock_never_reaches_port() {
        let (port, handle) = MockPort::acking();
        handle.set_write_mode(WriteMode::Stall(Duration::from_millis(300)));
        let mut guard = TransportGuard::new(port).with_timeout(SHORT);

        let erase = vec![0x57, 0xAB, 0x81, 0x02, 0x00, 0x00, 0x83];
        let end = vec![0x57, 0xAB, 0x83, 0x02, 0x00, 0x00, 0x85];

        assert!(guard.write_frame(erase.clone()).unwrap_err().is_timeout());
        // Queued behind the stalled erase write, so it misses its deadline too.
        let err = guard.write_frame(end).unwrap_err();
        assert!(matches!(
            err,
            Error::TransportTimeout {
                operation: Operation::Write,
                timeout: SHORT
            }
        ));

        thread::sleep(Duration::from_millis(600));
        assert_eq!(handle.writes(), vec![erase]);
        assert!(guard.into_port().is_ok());
    }
}
