//! High level flashing interface.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ch32uprog::Flasher;
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut flasher = Flasher::open("/dev/ttyUSB0", 115200)?;
//!     let report = flasher.flash_with_progress(Path::new("firmware.bin"), |phase, done, total| {
//!         println!("{phase}: {done}/{total}");
//!     })?;
//!     println!("wrote {} bytes", report.image_size);
//!     Ok(())
//! }
//! ```

use crate::error::Result;
use crate::guard::TransportGuard;
use crate::image::FirmwareSource;
use crate::port::Port;
use crate::session::{FlashReport, Phase, Session, SessionState};
use std::time::Duration;

type InterruptChecker = Box<dyn Fn() -> bool + Send + Sync>;

/// Flasher for the CH32 USB/UART bootloader.
///
/// Generic over the port type `P`, which must implement the `Port` trait.
pub struct Flasher<P: Port + 'static> {
    guard: TransportGuard<P>,
    interrupt: Option<InterruptChecker>,
    state: SessionState,
}

impl<P: Port + 'static> Flasher<P> {
    /// Create a flasher over an opened port.
    pub fn new(port: P) -> Self {
        Self {
            guard: TransportGuard::new(port),
            interrupt: None,
            state: SessionState::Idle,
        }
    }

    /// Set the deadline for each single read or write.
    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.guard = self.guard.with_timeout(timeout);
        self
    }

    /// Register a checker polled before every command.
    ///
    /// When it returns `true` the session stops with
    /// [`Error::Interrupted`](crate::Error::Interrupted).
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.interrupt = Some(Box::new(checker));
        self
    }

    /// Per-call deadline.
    pub fn io_timeout(&self) -> Duration {
        self.guard.timeout()
    }

    /// State reached by the most recent session.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Port name, if the port is not held by an abandoned call.
    pub fn port_name(&self) -> Option<String> {
        self.guard.port_name()
    }

    /// Erase, program, verify and release the device.
    pub fn flash<S: FirmwareSource + ?Sized>(&mut self, source: &S) -> Result<FlashReport> {
        self.flash_with_progress(source, |_, _, _| {})
    }

    /// Like [`flash`](Self::flash), reporting `(phase, done, total)` as it goes.
    pub fn flash_with_progress<S, F>(&mut self, source: &S, mut progress: F) -> Result<FlashReport>
    where
        S: FirmwareSource + ?Sized,
        F: FnMut(Phase, usize, usize),
    {
        let mut session = Session::new(&mut self.guard, self.interrupt.as_deref());
        let result = session.run(source, &mut progress);
        self.state = session.state();
        result
    }

    /// Consume the flasher and return the underlying port.
    ///
    /// Fails with the flasher itself while an abandoned call still holds the
    /// port; try again once it has returned.
    pub fn into_port(self) -> std::result::Result<P, Self> {
        let Self {
            guard,
            interrupt,
            state,
        } = self;
        guard.into_port().map_err(|guard| Self {
            guard,
            interrupt,
            state,
        })
    }
}

#[cfg(feature = "native")]
mod native {
    use super::Flasher;
    use crate::error::Result;
    use crate::port::{NativePort, SerialConfig};

    impl Flasher<NativePort> {
        /// Open a native serial port and create a flasher over it.
        pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
            let port = NativePort::open(&SerialConfig::new(port_name, baud_rate))?;
            Ok(Self::new(port))
        }
    }
}
