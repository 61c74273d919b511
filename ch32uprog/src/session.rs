//! The erase → program → verify → end command sequence.
//!
//! ```text
//! Idle -> Erasing -> WritingFirmware -> VerifyingFirmware -> Ending -> Complete
//!   \________\_____________\__________________\________________\-> Failed
//! ```
//!
//! The sequence never branches back. Any failed send or acknowledgment moves
//! the session to `Failed` and surfaces the error tagged with the phase it
//! happened in; nothing is retried or rolled back.

use crate::error::{Error, Result};
use crate::guard::TransportGuard;
use crate::image::{FirmwareImage, FirmwareSource};
use crate::port::Port;
use crate::protocol::frame::{Command, CommandFrame, FrameBuilder};
use log::{debug, info};
use std::fmt;

/// User-visible phase of a flashing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Phase {
    /// Erasing user flash.
    Erase,
    /// Programming chunks.
    Write,
    /// Verifying chunks.
    Verify,
    /// Leaving the bootloader.
    End,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erase => write!(f, "erase"),
            Self::Write => write!(f, "write"),
            Self::Verify => write!(f, "verify"),
            Self::End => write!(f, "end"),
        }
    }
}

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// Erase command in flight.
    Erasing,
    /// Program pass.
    WritingFirmware,
    /// Verify pass.
    VerifyingFirmware,
    /// End command in flight.
    Ending,
    /// Sequence finished.
    Complete,
    /// Sequence aborted.
    Failed,
}

impl SessionState {
    /// Whether the session can make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Phase this state belongs to, if any.
    pub fn phase(self) -> Option<Phase> {
        match self {
            Self::Erasing => Some(Phase::Erase),
            Self::WritingFirmware => Some(Phase::Write),
            Self::VerifyingFirmware => Some(Phase::Verify),
            Self::Ending => Some(Phase::End),
            Self::Idle | Self::Complete | Self::Failed => None,
        }
    }
}

/// Summary of a successful session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlashReport {
    /// Firmware size in bytes.
    pub image_size: usize,
    /// Program frames sent.
    pub program_frames: usize,
    /// Verify frames sent.
    pub verify_frames: usize,
}

/// Progress callback: `(phase, done, total)`.
///
/// Erase and End report `0/1` then `1/1`; the data passes report bytes.
pub type Progress<'p> = &'p mut dyn FnMut(Phase, usize, usize);

/// Interrupt checker polled before every command.
pub type InterruptCheck<'i> = &'i (dyn Fn() -> bool + Send + Sync);

/// One flashing run over a guarded port.
pub(crate) struct Session<'a, P: Port + 'static> {
    guard: &'a mut TransportGuard<P>,
    builder: FrameBuilder,
    offset: usize,
    state: SessionState,
    interrupt: Option<InterruptCheck<'a>>,
    report: FlashReport,
}

impl<'a, P: Port + 'static> Session<'a, P> {
    pub(crate) fn new(
        guard: &'a mut TransportGuard<P>,
        interrupt: Option<InterruptCheck<'a>>,
    ) -> Self {
        Self {
            guard,
            builder: FrameBuilder::new(),
            offset: 0,
            state: SessionState::Idle,
            interrupt,
            report: FlashReport::default(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the full sequence.
    pub(crate) fn run<S: FirmwareSource + ?Sized>(
        &mut self,
        source: &S,
        progress: Progress<'_>,
    ) -> Result<FlashReport> {
        // Size check happens before anything reaches the device.
        let image = FirmwareImage::load(source).map_err(|e| self.abort(e))?;
        self.report.image_size = image.len();
        info!(
            "Flashing {} ({} bytes, {} chunks)",
            source.describe(),
            image.len(),
            image.chunk_count()
        );

        self.enter(SessionState::Erasing);
        self.erase(progress)
            .map_err(|e| self.fail(Phase::Erase, e))?;

        self.enter(SessionState::WritingFirmware);
        self.report.program_frames = self
            .transfer(Command::Program, Phase::Write, image, progress)
            .map_err(|e| self.fail(Phase::Write, e))?;

        // The write pass consumed its copy; read the source again.
        self.enter(SessionState::VerifyingFirmware);
        self.report.verify_frames = FirmwareImage::load(source)
            .and_then(|image| self.transfer(Command::Verify, Phase::Verify, image, progress))
            .map_err(|e| self.fail(Phase::Verify, e))?;

        self.enter(SessionState::Ending);
        self.end(progress)
            .map_err(|e| self.fail(Phase::End, e))?;

        self.enter(SessionState::Complete);
        info!("Flashing complete");
        Ok(self.report)
    }

    fn enter(&mut self, state: SessionState) {
        debug!("Session {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn abort(&mut self, e: Error) -> Error {
        self.enter(SessionState::Failed);
        e
    }

    fn fail(&mut self, phase: Phase, e: Error) -> Error {
        self.abort(e.in_phase(phase))
    }

    fn check_interrupt(&self) -> Result<()> {
        if self
            .interrupt
            .is_some_and(|interrupted| interrupted())
        {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    fn erase(&mut self, progress: Progress<'_>) -> Result<()> {
        info!("Erase...");
        progress(Phase::Erase, 0, 1);
        self.check_interrupt()?;
        self.exchange(&CommandFrame::erase())?;
        progress(Phase::Erase, 1, 1);
        Ok(())
    }

    /// Send `image` in chunks with `command`, one acknowledged frame each.
    fn transfer(
        &mut self,
        command: Command,
        phase: Phase,
        image: FirmwareImage,
        progress: Progress<'_>,
    ) -> Result<usize> {
        info!("{phase}...");
        let total = image.len();
        let mut frames = 0;
        self.offset = 0;
        progress(phase, 0, total);

        for (_, chunk) in image.chunks() {
            self.check_interrupt()?;
            let offset =
                u16::try_from(self.offset).map_err(|_| Error::OversizedImage { size: total })?;
            let frame = CommandFrame::data(command, offset, chunk)?;
            self.exchange(&frame)?;

            self.offset += chunk.len();
            frames += 1;
            progress(phase, self.offset, total);
        }

        debug!("{phase}: {frames} frames, {} bytes", self.offset);
        Ok(frames)
    }

    fn end(&mut self, progress: Progress<'_>) -> Result<()> {
        progress(Phase::End, 0, 1);
        self.check_interrupt()?;
        // The bootloader does not acknowledge End.
        self.send(&CommandFrame::end())?;
        progress(Phase::End, 1, 1);
        Ok(())
    }

    /// Send a frame and require a success acknowledgment.
    fn exchange(&mut self, frame: &CommandFrame) -> Result<()> {
        self.send(frame)?;
        let ack = self.guard.read_ack()?;
        ack.check()
    }

    fn send(&mut self, frame: &CommandFrame) -> Result<()> {
        let bytes = frame.write_to(&mut self.builder);
        debug!(
            "Sending {} (len {}, offset 0x{:04X}): {} bytes",
            frame.command(),
            frame.length(),
            frame.offset(),
            bytes.len()
        );
        self.guard.write_frame(bytes)
    }
}
