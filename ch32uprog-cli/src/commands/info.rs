//! Firmware info command implementation.

use {
    anyhow::{Context, Result},
    ch32uprog::{
        Phase,
        protocol::constants::{FRAME_OVERHEAD, MAX_FIRMWARE_SIZE, MAX_PAYLOAD},
    },
    console::style,
    std::{fs, path::Path},
};

/// Frames one phase of a session would send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub(crate) struct PlannedPhase {
    phase: Phase,
    frames: usize,
}

/// What a flash of this file would involve.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub(crate) struct FirmwareInfo {
    path: String,
    size: usize,
    capacity: usize,
    fits: bool,
    chunks: usize,
    frames: usize,
    wire_bytes: usize,
    plan: Vec<PlannedPhase>,
}

impl FirmwareInfo {
    fn from_size(path: &Path, size: usize) -> Self {
        let chunks = size.div_ceil(MAX_PAYLOAD);
        let plan = vec![
            PlannedPhase {
                phase: Phase::Erase,
                frames: 1,
            },
            PlannedPhase {
                phase: Phase::Write,
                frames: chunks,
            },
            PlannedPhase {
                phase: Phase::Verify,
                frames: chunks,
            },
            PlannedPhase {
                phase: Phase::End,
                frames: 1,
            },
        ];
        let frames = plan
            .iter()
            .map(|p| p.frames)
            .sum::<usize>();
        // Every data byte goes out twice, once per pass.
        let wire_bytes = size
            .saturating_mul(2)
            .saturating_add(frames.saturating_mul(FRAME_OVERHEAD));
        Self {
            path: path.display().to_string(),
            size,
            capacity: MAX_FIRMWARE_SIZE,
            fits: size <= MAX_FIRMWARE_SIZE,
            chunks,
            frames,
            wire_bytes,
            plan,
        }
    }
}

/// Info command implementation.
///
/// Only the file's metadata is read, so the size of any file can be shown.
pub(crate) fn cmd_info(firmware: &Path, json: bool) -> Result<()> {
    let metadata = fs::metadata(firmware)
        .with_context(|| format!("cannot read firmware {}", firmware.display()))?;
    if !metadata.is_file() {
        anyhow::bail!("cannot read firmware {}: not a regular file", firmware.display());
    }
    let size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
    let info = FirmwareInfo::from_size(firmware, size);

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    eprintln!("{}", style("Firmware").bold().underlined());
    eprintln!("  File:     {}", info.path);
    eprintln!("  Size:     {} bytes", info.size);
    eprintln!("  Capacity: {} bytes", info.capacity);
    eprintln!(
        "  Fits:     {}",
        if info.fits {
            style("yes").green()
        } else {
            style("no").red()
        }
    );
    eprintln!("  Chunks:   {} x {} bytes", info.chunks, MAX_PAYLOAD);
    eprintln!("  Frames:   {}", info.frames);
    eprintln!("  On wire:  {} bytes", info.wire_bytes);
    for step in &info.plan {
        eprintln!("    {:<8}{} frames", step.phase.to_string(), step.frames);
    }

    Ok(())
}
