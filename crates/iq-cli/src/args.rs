//! Command-line arguments
//!
//! Most options are `Option` so the preset overlay can tell "left at
//! default" apart from "explicitly set": an explicit flag always beats a
//! preset value, a preset value beats the built-in default.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use iq_core::config::{AgcProfile, FilterImpl};
use iq_core::formats::SampleFormat;

/// Stream I/Q samples through a DSP chain.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "iqstream",
    version,
    about = "Stream I/Q samples from a file through a DSP chain to a file, container, or stdout"
)]
pub struct Args {
    /// Input sample file.
    #[arg(short = 'i', long)]
    pub input: PathBuf,

    /// Output path, or "-" for stdout.
    #[arg(short = 'o', long)]
    pub output: String,

    /// Input sample rate in Hz.
    #[arg(long, value_parser = parse_hz)]
    pub input_rate: Option<f64>,

    /// Output sample rate in Hz (defaults to the input rate).
    #[arg(long, value_parser = parse_hz)]
    pub output_rate: Option<f64>,

    /// Input sample format.
    #[arg(long, value_parser = parse_format)]
    pub input_format: Option<SampleFormat>,

    /// Output sample format (defaults to the input format).
    #[arg(long, value_parser = parse_format)]
    pub output_format: Option<SampleFormat>,

    /// Output container: raw, wav, rf64, or auto.
    #[arg(long, value_parser = parse_container)]
    pub container: Option<ContainerChoice>,

    /// Frequency shift before resampling, in Hz.
    #[arg(long, value_parser = parse_hz_signed, allow_hyphen_values = true)]
    pub freq_shift: Option<f64>,

    /// Frequency shift after resampling, in Hz.
    #[arg(long, value_parser = parse_hz_signed, allow_hyphen_values = true)]
    pub post_freq_shift: Option<f64>,

    // ── pre-resample filters (repeatable, at most five total per side) ───
    /// Pre-resample lowpass cutoff in Hz.
    #[arg(long, value_parser = parse_hz)]
    pub lowpass: Vec<f64>,

    /// Pre-resample highpass cutoff in Hz.
    #[arg(long, value_parser = parse_hz)]
    pub highpass: Vec<f64>,

    /// Pre-resample passband as F1:F2 in Hz.
    #[arg(long, value_parser = parse_band, allow_hyphen_values = true)]
    pub passband: Vec<(f64, f64)>,

    /// Pre-resample stopband as F1:F2 in Hz.
    #[arg(long, value_parser = parse_band, allow_hyphen_values = true)]
    pub stopband: Vec<(f64, f64)>,

    // ── post-resample filters ────────────────────────────────────────────
    /// Post-resample lowpass cutoff in Hz.
    #[arg(long, value_parser = parse_hz)]
    pub post_lowpass: Vec<f64>,

    /// Post-resample highpass cutoff in Hz.
    #[arg(long, value_parser = parse_hz)]
    pub post_highpass: Vec<f64>,

    /// Post-resample passband as F1:F2 in Hz.
    #[arg(long, value_parser = parse_band, allow_hyphen_values = true)]
    pub post_passband: Vec<(f64, f64)>,

    /// Post-resample stopband as F1:F2 in Hz.
    #[arg(long, value_parser = parse_band, allow_hyphen_values = true)]
    pub post_stopband: Vec<(f64, f64)>,

    // ── filter design knobs (apply to both sides) ────────────────────────
    /// Force the filter engine: auto, fir, or fft.
    #[arg(long, value_parser = parse_filter_impl)]
    pub filter_impl: Option<FilterImpl>,

    /// Explicit filter tap count (rounded up to odd).
    #[arg(long)]
    pub filter_taps: Option<usize>,

    /// Filter transition width in Hz.
    #[arg(long, value_parser = parse_hz)]
    pub transition_width: Option<f64>,

    /// Filter stopband attenuation in dB.
    #[arg(long)]
    pub attenuation_db: Option<f64>,

    /// FFT length for the overlap-save engine (power of two).
    #[arg(long)]
    pub filter_fft_size: Option<usize>,

    // ── runtime DSP toggles ──────────────────────────────────────────────
    /// Output AGC profile: off, dx, local, or digital.
    #[arg(long, value_parser = parse_agc)]
    pub agc: Option<AgcProfile>,

    /// Enable the DC-blocking highpass.
    #[arg(long)]
    pub dc_block: bool,

    /// Enable adaptive I/Q imbalance correction.
    #[arg(long)]
    pub iq_correction: bool,

    /// Run a one-shot I/Q calibration against the file head before
    /// streaming.
    #[arg(long)]
    pub iq_calibrate: bool,

    /// Copy input bytes to the output untouched (no DSP).
    #[arg(long)]
    pub raw_passthrough: bool,

    // ── presets ──────────────────────────────────────────────────────────
    /// Preset name to load from the presets file.
    #[arg(long)]
    pub preset: Option<String>,

    /// Presets file (JSON map of name to options).
    #[arg(long)]
    pub presets_file: Option<PathBuf>,

    // ── advanced / test hooks ────────────────────────────────────────────
    /// Complex frames per pipeline chunk.
    #[arg(long, hide = true)]
    pub base_samples: Option<usize>,

    /// Number of chunks in the pool.
    #[arg(long, hide = true)]
    pub num_chunks: Option<usize>,

    /// Writer ring capacity in bytes.
    #[arg(long, hide = true)]
    pub writer_buffer_bytes: Option<usize>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Output container selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerChoice {
    Raw,
    Wav,
    Rf64,
    /// Pick from the output extension and expected size.
    Auto,
}

fn parse_hz(s: &str) -> Result<f64, String> {
    let value = parse_hz_signed(s)?;
    if value <= 0.0 {
        return Err(format!("{s}: must be positive"));
    }
    Ok(value)
}

/// Accept plain and scientific notation ("1.2e6") plus k/M/G suffixes.
fn parse_hz_signed(s: &str) -> Result<f64, String> {
    let trimmed = s.trim();
    let (number, scale) = match trimmed.chars().last() {
        Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1e3),
        Some('M') => (&trimmed[..trimmed.len() - 1], 1e6),
        Some('G') => (&trimmed[..trimmed.len() - 1], 1e9),
        _ => (trimmed, 1.0),
    };
    number
        .parse::<f64>()
        .map(|v| v * scale)
        .map_err(|e| format!("{s}: {e}"))
}

fn parse_band(s: &str) -> Result<(f64, f64), String> {
    let (f1, f2) = s
        .split_once(':')
        .ok_or_else(|| format!("{s}: expected F1:F2"))?;
    Ok((parse_hz_signed(f1)?, parse_hz_signed(f2)?))
}

fn parse_format(s: &str) -> Result<SampleFormat, String> {
    SampleFormat::from_str(s).map_err(|e| e.to_string())
}

fn parse_container(s: &str) -> Result<ContainerChoice, String> {
    match s.to_ascii_lowercase().as_str() {
        "raw" => Ok(ContainerChoice::Raw),
        "wav" => Ok(ContainerChoice::Wav),
        "rf64" => Ok(ContainerChoice::Rf64),
        "auto" => Ok(ContainerChoice::Auto),
        other => Err(format!("{other}: expected raw, wav, rf64, or auto")),
    }
}

fn parse_agc(s: &str) -> Result<AgcProfile, String> {
    match s.to_ascii_lowercase().as_str() {
        "off" => Ok(AgcProfile::Off),
        "dx" => Ok(AgcProfile::Dx),
        "local" => Ok(AgcProfile::Local),
        "digital" => Ok(AgcProfile::Digital),
        other => Err(format!("{other}: expected off, dx, local, or digital")),
    }
}

fn parse_filter_impl(s: &str) -> Result<FilterImpl, String> {
    match s.to_ascii_lowercase().as_str() {
        "auto" => Ok(FilterImpl::Auto),
        "fir" => Ok(FilterImpl::Fir),
        "fft" => Ok(FilterImpl::Fft),
        other => Err(format!("{other}: expected auto, fir, or fft")),
    }
}
