//! ch32uprog CLI - Command-line tool for flashing CH32V003 chips.
//!
//! ## Features
//!
//! - Flash raw firmware binaries through the UART bootloader
//! - Inspect a firmware file before flashing
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::{debug, warn};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

mod commands;
mod config;
mod serial;

use config::Config;

/// ch32uprog - Flash CH32V003 microcontrollers over their UART bootloader.
///
/// Environment variables:
///   CH32UPROG_DEVICE   - Default serial device
///   CH32UPROG_BAUD     - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "ch32uprog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    ch32uprog -d /dev/ttyUSB0 flash firmware.bin\n  \
    ch32uprog -d COM3 -b 115200 flash firmware.bin\n  \
    ch32uprog info --json firmware.bin")]
pub(crate) struct Cli {
    /// Serial device the bootloader is attached to.
    #[arg(short, long, global = true, env = "CH32UPROG_DEVICE")]
    device: Option<String>,

    /// Baud rate (default: config file, then 115200).
    #[arg(short, long, global = true, env = "CH32UPROG_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Erase, program and verify a raw firmware binary.
    Flash {
        /// Path to the firmware binary.
        firmware: PathBuf,
    },

    /// Show size and transfer information about a firmware binary.
    Info {
        /// Path to the firmware binary.
        firmware: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Errors that select a specific exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration (exit 3).
    #[error("{0}")]
    Config(String),
    /// Device could not be reached (exit 4).
    #[error("{0}")]
    Device(String),
    /// Interrupted by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Device(_) => 4,
            CliError::Cancelled(_) => 130,
        };
    }

    if let Some(lib_err) = err.downcast_ref::<ch32uprog::Error>() {
        return match lib_err.cause() {
            ch32uprog::Error::Interrupted => 130,
            ch32uprog::Error::Serial(_)
            | ch32uprog::Error::TransportTimeout { .. }
            | ch32uprog::Error::Transport(_)
            | ch32uprog::Error::MalformedAcknowledgment { .. }
            | ch32uprog::Error::DeviceRejected { .. }
            | ch32uprog::Error::ShortWrite { .. } => 4,
            _ => 1,
        };
    }

    1
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        warn!("Could not install Ctrl-C handler: {e}");
    }

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code_for(&err));
    }
}

/// Setup logging based on verbosity.
fn init_logging(verbose: u8, quiet: bool) {
    let log_level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(verbose >= 2)
        .format_timestamp(if verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    debug!(
        "ch32uprog v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)?
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash { firmware } => commands::flash::cmd_flash(cli, &config, firmware),
        Commands::Info { firmware, json } => commands::info::cmd_info(firmware, *json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}
