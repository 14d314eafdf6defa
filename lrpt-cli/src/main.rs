mod config;
mod status;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Timelike, Utc};
use clap::{ArgAction, Parser};
use color_eyre::eyre::{bail, eyre, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lrpt_core::config::{RectifyMode, MAX_OPERATION_TIME};
use lrpt_core::source::file::RawFormat;
use lrpt_core::{FileSource, IqSource, OutputSpec, Session};

use config::{CliConfig, IqFileFormat};
use status::StatusReporter;

/// Meteor-M2 LRPT receiver: demodulates the 137 MHz QPSK/OQPSK
/// downlink and decodes the three APID channel images plus a
/// pseudocolor composite.
#[derive(Parser, Debug)]
#[command(name = "lrpt", version, about, disable_version_flag = true)]
struct Cli {
    /// Path to the TOML configuration file (default ~/.lrptrc.toml)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Override the SDR center frequency, in kHz
    #[arg(short = 'f', long)]
    frequency_khz: Option<f64>,

    /// Rectification: 0 = none, 1 = W2RG, 2 = 5B4AZ
    #[arg(short = 'r', long)]
    rectify: Option<u8>,

    /// Operation window as HHMM-HHMM UTC; sleeps until the start time
    #[arg(short = 's', long, value_name = "HHMM-HHMM")]
    schedule: Option<String>,

    /// Operation duration in minutes
    #[arg(short = 't', long)]
    duration_min: Option<u32>,

    /// Quiet mode: errors only, no status line
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Rotate output images 180 degrees (south-to-north passes)
    #[arg(short = 'i', long)]
    invert: bool,

    /// Print version information and exit
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: (),
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    let default_level = if args.quiet { "error" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let mut cli_config = CliConfig::load(args.config.as_deref())?;

    // Command-line overrides.
    if let Some(khz) = args.frequency_khz {
        cli_config.core.sdr.center_freq_hz = (khz * 1000.0) as u32;
    }
    if let Some(selector) = args.rectify {
        cli_config.core.image.rectify =
            RectifyMode::from_selector(selector).map_err(|err| eyre!(err))?;
    }
    if let Some(minutes) = args.duration_min {
        cli_config.core.decoder.operation_time_secs = minutes * 60;
    }
    if args.invert {
        cli_config.core.image.invert = true;
    }

    // A UTC window both delays the start and sets the duration.
    if let Some(window) = &args.schedule {
        let (sleep_secs, duration_secs) = parse_utc_window(window)?;
        cli_config.core.decoder.operation_time_secs = duration_secs;
        info!(
            sleep_secs,
            duration_secs, "pausing until scheduled start time"
        );
        std::thread::sleep(Duration::from_secs(sleep_secs as u64));
    }

    if cli_config.core.decoder.operation_time_secs > MAX_OPERATION_TIME {
        tracing::warn!(
            seconds = cli_config.core.decoder.operation_time_secs,
            "operation time exceeds a typical pass by a wide margin"
        );
    }

    let images_dir = resolve_images_dir(&cli_config)?;
    let stem = Utc::now().format("%d%b%Y-%H%M").to_string();
    let output = OutputSpec {
        directory: images_dir.clone(),
        stem,
    };

    let operation_secs = cli_config.core.decoder.operation_time_secs;
    let source = open_source(&cli_config)?;

    let mut session = Session::new(cli_config.core).wrap_err("invalid configuration")?;

    // Ctrl-C requests a graceful stop through the shared token.
    let token = session.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("interrupt received, stopping session");
        token.cancel();
    })
    .wrap_err("failed to install signal handler")?;

    let reporter = (!args.quiet)
        .then(|| StatusReporter::spawn(session.status(), operation_secs as u64));

    let summary = session.run(source, &output)?;

    if let Some(reporter) = reporter {
        reporter.finish();
    }

    println!(
        "Frames: {}/{} ok, signal quality {:.1}%, {} packets ({} dropped)",
        summary.frames_ok,
        summary.frames_total,
        summary.signal_quality,
        summary.packets,
        summary.packet_drops,
    );
    for file in &summary.files {
        println!("Wrote {}", file.display());
    }
    if summary.files.is_empty() {
        println!("No images decoded; nothing written to {}", images_dir.display());
    }

    Ok(())
}

/// Build the IQ source from the configuration. Live SDR hardware is an
/// external collaborator; this build decodes recorded passes.
fn open_source(cli_config: &CliConfig) -> Result<Box<dyn IqSource>> {
    let input = &cli_config.input;
    let Some(path) = input.iq_file.as_deref() else {
        bail!(
            "no IQ input configured: set input.iq_file in the config file \
             (driver {:?} has no backend in this build)",
            cli_config.core.sdr.driver
        );
    };

    let sample_rate = cli_config.core.sdr.sample_rate;
    let source = match input.format {
        IqFileFormat::Auto => FileSource::open(path, sample_rate)?,
        IqFileFormat::Wav => FileSource::open_wav(path)?,
        IqFileFormat::U8 => FileSource::open_raw(path, RawFormat::Unsigned8, sample_rate)?,
        IqFileFormat::I16 => FileSource::open_raw(path, RawFormat::Signed16, sample_rate)?,
    };
    Ok(Box::new(source))
}

/// Images land in the configured directory, or `$XDG_CACHE_HOME/lrpt`,
/// or `$HOME/.cache/lrpt`; the directory is created mode 0700.
fn resolve_images_dir(cli_config: &CliConfig) -> Result<PathBuf> {
    let dir = if let Some(dir) = &cli_config.core.image.images_dir {
        dir.clone()
    } else if let Some(cache) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(cache).join("lrpt")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".cache").join("lrpt")
    } else {
        bail!("cannot resolve an image directory: set image.images_dir or HOME");
    };

    create_private_dir(&dir)
        .wrap_err_with(|| format!("cannot create image directory {}", dir.display()))?;
    Ok(dir)
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).or_else(|err| {
        if dir.is_dir() {
            Ok(())
        } else {
            Err(err)
        }
    })
}

/// Parse `HHMM-HHMM` into (seconds until start, operation seconds),
/// rolling past midnight when a time is already behind us.
fn parse_utc_window(window: &str) -> Result<(u32, u32)> {
    let (start, stop) = window
        .split_once('-')
        .ok_or_else(|| eyre!("window must be HHMM-HHMM, got {window:?}"))?;
    let start_sec = parse_hhmm(start)?;
    let stop_sec = parse_hhmm(stop)?;

    let now = Utc::now();
    let now_sec = now.hour() * 3600 + now.minute() * 60 + now.second();
    window_from(start_sec, stop_sec, now_sec)
        .ok_or_else(|| eyre!("stop time is not after start time in window {window:?}"))
}

/// Window arithmetic relative to the current second of day.
fn window_from(start_sec: u32, stop_sec: u32, now_sec: u32) -> Option<(u32, u32)> {
    let mut sleep_sec = start_sec as i64 - now_sec as i64;
    if sleep_sec < 0 {
        sleep_sec += 86_400;
    }
    let mut stop_in = stop_sec as i64 - now_sec as i64;
    if stop_in < 0 {
        stop_in += 86_400;
    }
    if stop_in <= sleep_sec {
        return None;
    }
    Some((sleep_sec as u32, (stop_in - sleep_sec) as u32))
}

fn parse_hhmm(text: &str) -> Result<u32> {
    if text.len() != 4 || !text.bytes().all(|b| b.is_ascii_digit()) {
        bail!("time must be four digits HHMM, got {text:?}");
    }
    let hours: u32 = text[..2].parse()?;
    let minutes: u32 = text[2..].parse()?;
    if hours > 23 || minutes > 59 {
        bail!("time {text:?} out of range");
    }
    Ok(hours * 3600 + minutes * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hhmm_parses_and_validates() {
        assert_eq!(parse_hhmm("0000").unwrap(), 0);
        assert_eq!(parse_hhmm("1234").unwrap(), 12 * 3600 + 34 * 60);
        assert!(parse_hhmm("2460").is_err());
        assert!(parse_hhmm("12a4").is_err());
        assert!(parse_hhmm("123").is_err());
    }

    #[test]
    fn window_requires_separator_and_ordering() {
        assert!(parse_utc_window("12001400").is_err());
        // A window of identical times has no duration.
        assert!(parse_utc_window("1200-1200").is_err());
    }

    #[test]
    fn window_arithmetic_handles_midnight_rollover() {
        // Now 10:00, window 12:00-12:30.
        let (sleep, duration) = window_from(12 * 3600, 12 * 3600 + 1800, 10 * 3600).unwrap();
        assert_eq!(sleep, 2 * 3600);
        assert_eq!(duration, 1800);

        // Now 23:50, window 00:10-00:25 tomorrow.
        let (sleep, duration) =
            window_from(600, 1500, 23 * 3600 + 50 * 60).unwrap();
        assert_eq!(sleep, 20 * 60);
        assert_eq!(duration, 900);

        // Stop before start never yields a window.
        assert!(window_from(12 * 3600, 11 * 3600, 10 * 3600).is_none());
    }

    #[test]
    fn private_dir_creation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("lrpt");
        create_private_dir(&target).unwrap();
        create_private_dir(&target).unwrap();
        assert!(target.is_dir());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&target).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
