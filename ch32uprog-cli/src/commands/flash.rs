//! Flash command implementation.

use anyhow::{Context, Result};
use ch32uprog::{Error, FirmwareImage, Flasher, Phase, Port};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::warn;
use std::path::Path;

use crate::config::Config;
use crate::serial::SerialOptions;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Erase => "Erasing",
        Phase::Write => "Writing",
        Phase::Verify => "Verifying",
        Phase::End => "Finishing",
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config, firmware: &Path) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware: {}",
            style("📦").cyan(),
            firmware.display()
        );
    }

    // Reject unreadable or oversized images before touching the port.
    let image = FirmwareImage::from_file(firmware)
        .with_context(|| format!("cannot load firmware {}", firmware.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} {} bytes, {} chunks",
            style("ℹ").blue(),
            image.len(),
            image.chunk_count()
        );
    }
    drop(image);

    let options = SerialOptions::resolve(cli.device.as_deref(), cli.baud, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("🔌").cyan(),
            options.device,
            options.baud
        );
    }

    let port = options.open()?;
    let mut flasher = Flasher::new(port).with_interrupt_checker(was_interrupted);

    let pb = progress_bar(cli.quiet);
    let mut current = None;
    let result = flasher.flash_with_progress(firmware, |phase, done, total| {
        if current != Some(phase) {
            current = Some(phase);
            pb.set_message(phase_label(phase));
            pb.set_length(total as u64);
        }
        pb.set_position(done as u64);
    });

    // Release the port even when the session failed.
    match flasher.into_port() {
        Ok(mut port) => {
            if let Err(e) = port.close() {
                warn!("Could not close {}: {e}", options.device);
            }
        },
        Err(_) => warn!("{} is still busy; it is released on exit", options.device),
    }

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            pb.abandon();
            if matches!(err.cause(), Error::Interrupted) {
                return Err(CliError::Cancelled(format!("{err}")).into());
            }
            return Err(err.into());
        },
    };

    pb.finish_with_message("Done");

    if !cli.quiet {
        eprintln!(
            "\n{} Flashed {} bytes ({} program frames, {} verify frames)",
            style("🎉").green().bold(),
            report.image_size,
            report.program_frames,
            report.verify_frames
        );
    }

    Ok(())
}
