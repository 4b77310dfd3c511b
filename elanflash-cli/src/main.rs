//! elanflash CLI - Command-line tool for updating ELAN touch controller firmware.
//!
//! ## Features
//!
//! - Update firmware from an image file, with progress display
//! - Read firmware identification and the calibration counter
//! - Trigger a touch recalibration
//! - Works with controllers stranded in recovery mode

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use elanflash::{
    BootMode, FirmwareFile, NativeHidPort, TouchFlasher, UpdateError, UpdateOptions,
};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// elanflash - A cross-platform firmware update tool for ELAN HID touch controllers.
///
/// Environment variables:
///   ELANFLASH_PID   - Default product ID to open (hex)
#[derive(Parser)]
#[command(name = "elanflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// HID product ID to open, in hex (first ELAN device if not specified).
    #[arg(
        short,
        long,
        global = true,
        default_value = "0",
        value_parser = parse_hex_u16,
        env = "ELANFLASH_PID"
    )]
    pid: u16,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Update the controller firmware from an image file.
    Update {
        /// Path to the firmware image file.
        firmware: PathBuf,

        /// Skip the remark ID compatibility check.
        #[arg(long)]
        skip_remark_check: bool,

        /// Skip the info-page counter and timestamp update.
        #[arg(long)]
        skip_info_update: bool,
    },

    /// Show firmware identification of the connected controller.
    Info,

    /// Show the calibration counter.
    Counter,

    /// Trigger a touch recalibration.
    Calibrate,
}

/// Parse a hexadecimal product ID (supports 0x prefix).
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(s, 16).map_err(|e| format!("Invalid hex product ID: {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "elanflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Update {
            firmware,
            skip_remark_check,
            skip_info_update,
        } => cmd_update(cli, firmware, *skip_remark_check, *skip_info_update),
        Commands::Info => cmd_info(cli),
        Commands::Counter => cmd_counter(cli),
        Commands::Calibrate => cmd_calibrate(cli),
    }
}

/// Print a failure with the numeric error kind the vendor tooling uses.
fn report_error(err: &anyhow::Error) {
    let cross = style("✗").red().bold();
    if let Some(update) = err.downcast_ref::<UpdateError>() {
        eprintln!(
            "{cross} {} failed: {} (code 0x{:04X})",
            update.phase,
            update.source,
            update.source.code()
        );
    } else if let Some(lib) = err.downcast_ref::<elanflash::Error>() {
        eprintln!("{cross} {lib} (code 0x{:04X})", lib.code());
    } else {
        eprintln!("{cross} {err:#}");
    }
}

/// Open the controller and detect its generation and boot mode.
fn open_flasher(cli: &Cli) -> Result<(TouchFlasher<NativeHidPort>, BootMode)> {
    let port = NativeHidPort::open(cli.pid)?;
    let mut flasher = TouchFlasher::new(port);
    let (generation, mode) = flasher.detect()?;

    if !cli.quiet {
        eprintln!(
            "{} {} controller in {} mode ({})",
            style("✓").green(),
            style(generation).cyan(),
            mode,
            flasher.name()
        );
    }
    Ok((flasher, mode))
}

/// Update command implementation.
fn cmd_update(
    cli: &Cli,
    firmware_path: &PathBuf,
    skip_remark_check: bool,
    skip_info_update: bool,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware image {}",
            style("📦").cyan(),
            firmware_path.display()
        );
    }
    // Read the image before touching the device.
    let firmware = FirmwareFile::open(firmware_path)?;

    let (mut flasher, mode) = open_flasher(cli)?;

    // Create progress bar
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(0);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let options = UpdateOptions {
        skip_remark_check,
        skip_info_update,
        ..UpdateOptions::default()
    };

    flasher.update_firmware(&firmware, &options, &mut |done, total| {
        pb.set_length(u64::from(total));
        pb.set_position(u64::from(done));
    })?;

    pb.finish_and_clear();

    if !cli.quiet {
        let confirmation = match mode {
            BootMode::Normal => "firmware updated and verified",
            BootMode::Recovery => "firmware written, controller left recovery mode",
        };
        eprintln!("{} {confirmation}", style("🎉").green().bold());
    }
    Ok(())
}

/// Info command implementation.
fn cmd_info(cli: &Cli) -> Result<()> {
    let (mut flasher, _mode) = open_flasher(cli)?;
    let info = flasher.firmware_information()?;

    println!("FW ID:             {:#06x}", info.fw_id);
    println!("FW version:        {:#06x}", info.fw_version);
    println!("Test version:      {:#06x}", info.test_version);
    println!("Boot code version: {:#06x}", info.bc_version);
    println!("Solution ID:       {:#04x}", info.solution_id());
    Ok(())
}

/// Counter command implementation.
fn cmd_counter(cli: &Cli) -> Result<()> {
    let (mut flasher, _mode) = open_flasher(cli)?;
    let counter = flasher.calibration_counter()?;

    println!("Calibration counter: {counter}");
    Ok(())
}

/// Calibrate command implementation.
fn cmd_calibrate(cli: &Cli) -> Result<()> {
    let (mut flasher, _mode) = open_flasher(cli)?;

    if !cli.quiet {
        eprintln!("{} Re-calibrating, keep hands off the panel", style("⏳").yellow());
    }
    flasher.calibrate()?;
    let counter = flasher.calibration_counter()?;

    if !cli.quiet {
        eprintln!(
            "{} Calibration complete (counter now {counter})",
            style("✓").green().bold()
        );
    }
    Ok(())
}
