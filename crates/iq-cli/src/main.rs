//! iqstream: stream I/Q samples through a DSP chain
//!
//! The front end: argument parsing, preset overlay, source and sink
//! construction, signal handling, and progress reporting. Everything that
//! actually moves samples lives in iq-pipeline.

mod args;
mod presets;
mod progress;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use iq_core::config::{FilterOptions, FilterRequest, PipelineConfig};
use iq_core::formats::SampleFormat;
use iq_io::container::ContainerKind;
use iq_io::sink::{FileSink, OutputSink, StdoutSink};
use iq_io::source::FileSource;
use iq_pipeline::events::EventSender;
use iq_pipeline::{Pipeline, PipelineContext};

use crate::args::{Args, ContainerChoice};
use crate::presets::Preset;
use crate::progress::ProgressReporter;

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log::error!("{e:#}");
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<i32> {
    let preset = match (&args.preset, &args.presets_file) {
        (Some(name), Some(path)) => presets::load_preset(path, name)?,
        (Some(_), None) => bail!("--preset requires --presets-file"),
        _ => Preset::default(),
    };

    let config = build_config(&args, &preset)?;
    let input_format = config.input_format;
    let output_format = config.output_format;

    let source = Box::new(FileSource::new(&args.input, input_format, config.input_rate));
    let sink = build_sink(&args, &config, output_format)?;

    let (event_tx, event_rx) = unbounded();

    // Expected length drives the percentage display; derived from the file
    // size so the reporter can start before the pipeline does.
    let expected_output_frames = std::fs::metadata(&args.input).ok().map(|meta| {
        let in_frames = meta.len() / input_format.bytes_per_sample_pair() as u64;
        (in_frames as f64 * config.resample_ratio()) as u64
    });
    let reporter = ProgressReporter::new(event_rx, expected_output_frames);
    let reporter_thread = std::thread::Builder::new()
        .name("iq-progress".into())
        .spawn(move || reporter.run())
        .context("spawning progress reporter")?;

    let pipeline = Pipeline::new(config, source, sink, EventSender::new(event_tx))
        .context("building pipeline")?;
    install_signal_handler(&pipeline.context())?;

    let summary = pipeline.run().context("running pipeline")?;
    // The event sender is gone once run() returns; the reporter drains and
    // exits on its own.
    let _ = reporter_thread.join();

    log::info!(
        "done: {} frames in, {} frames / {} bytes out{}",
        summary.frames_read,
        summary.frames_written,
        summary.bytes_written,
        if summary.input_overruns > 0 {
            format!(", {} input overrun(s)", summary.input_overruns)
        } else {
            String::new()
        }
    );

    Ok(if summary.error_occurred { 1 } else { 0 })
}

/// Merge CLI flags over preset values over defaults.
fn build_config(args: &Args, preset: &Preset) -> Result<PipelineConfig> {
    let Some(input_rate) = args.input_rate.or(preset.input_rate) else {
        bail!("--input-rate is required (no preset supplies it)");
    };
    let output_rate = args
        .output_rate
        .or(preset.output_rate)
        .unwrap_or(input_rate);
    let input_format = args
        .input_format
        .or(preset.input_format)
        .unwrap_or(SampleFormat::Cs16);
    let output_format = args
        .output_format
        .or(preset.output_format)
        .unwrap_or(input_format);

    let filter_knobs = |requests: Vec<FilterRequest>| FilterOptions {
        requests,
        num_taps: args.filter_taps,
        transition_width_hz: args.transition_width.or(preset.transition_width),
        attenuation_db: args.attenuation_db.or(preset.attenuation_db),
        implementation: args.filter_impl.unwrap_or_default(),
        fft_size: args.filter_fft_size,
    };

    let pre_requests = collect_requests(
        &args.lowpass,
        &args.highpass,
        &args.passband,
        &args.stopband,
        &preset.lowpass,
        &preset.highpass,
        &preset.passband,
        &preset.stopband,
    );
    let post_requests = collect_requests(
        &args.post_lowpass,
        &args.post_highpass,
        &args.post_passband,
        &args.post_stopband,
        &preset.post_lowpass,
        &preset.post_highpass,
        &preset.post_passband,
        &preset.post_stopband,
    );

    let mut config = PipelineConfig {
        input_rate,
        output_rate,
        input_format,
        output_format,
        pre_shift_hz: args.freq_shift.or(preset.freq_shift).unwrap_or(0.0),
        post_shift_hz: args
            .post_freq_shift
            .or(preset.post_freq_shift)
            .unwrap_or(0.0),
        dc_block: args.dc_block || preset.dc_block.unwrap_or(false),
        iq_correction: args.iq_correction || preset.iq_correction.unwrap_or(false),
        iq_calibrate_on_start: args.iq_calibrate,
        agc: args.agc.or(preset.agc).unwrap_or_default(),
        pre_filter: filter_knobs(pre_requests),
        post_filter: filter_knobs(post_requests),
        raw_passthrough: args.raw_passthrough,
        ..Default::default()
    };
    if let Some(base) = args.base_samples {
        config.base_samples = base;
    }
    if let Some(chunks) = args.num_chunks {
        config.num_chunks = chunks;
    }
    if let Some(bytes) = args.writer_buffer_bytes {
        config.writer_buffer_bytes = bytes;
    }

    config.validate().context("validating configuration")?;
    Ok(config)
}

/// CLI filter flags replace the preset's chain entirely when any are given;
/// mixing the two would produce chains nobody asked for.
#[allow(clippy::too_many_arguments)]
fn collect_requests(
    lowpass: &[f64],
    highpass: &[f64],
    passband: &[(f64, f64)],
    stopband: &[(f64, f64)],
    preset_lowpass: &[f64],
    preset_highpass: &[f64],
    preset_passband: &[(f64, f64)],
    preset_stopband: &[(f64, f64)],
) -> Vec<FilterRequest> {
    let cli_any =
        !(lowpass.is_empty() && highpass.is_empty() && passband.is_empty() && stopband.is_empty());
    let (lp, hp, pb, sb) = if cli_any {
        (lowpass, highpass, passband, stopband)
    } else {
        (
            preset_lowpass,
            preset_highpass,
            preset_passband,
            preset_stopband,
        )
    };

    let mut requests = Vec::new();
    requests.extend(lp.iter().map(|&f| FilterRequest::lowpass(f)));
    requests.extend(hp.iter().map(|&f| FilterRequest::highpass(f)));
    requests.extend(pb.iter().map(|&(f1, f2)| FilterRequest::passband(f1, f2)));
    requests.extend(sb.iter().map(|&(f1, f2)| FilterRequest::stopband(f1, f2)));
    requests
}

fn build_sink(
    args: &Args,
    config: &PipelineConfig,
    output_format: SampleFormat,
) -> Result<Box<dyn OutputSink>> {
    if args.output == "-" {
        return Ok(Box::new(StdoutSink::new(output_format)));
    }

    let path = Path::new(&args.output);
    let kind = match args.container.unwrap_or(ContainerChoice::Auto) {
        ContainerChoice::Raw => ContainerKind::Raw,
        ContainerChoice::Wav => ContainerKind::Wav,
        ContainerChoice::Rf64 => ContainerKind::Rf64,
        ContainerChoice::Auto => auto_container(args, config, path),
    };

    Ok(Box::new(FileSink::new(
        path,
        kind,
        output_format,
        config.output_rate,
    )))
}

/// Container from the output extension; a wave file whose projected size
/// overflows plain RIFF is promoted to RF64.
fn auto_container(args: &Args, config: &PipelineConfig, path: &Path) -> ContainerKind {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "rf64" => ContainerKind::Rf64,
        "wav" | "wave" => {
            let projected = std::fs::metadata(&args.input).ok().map(|meta| {
                let in_frames =
                    meta.len() / config.input_format.bytes_per_sample_pair() as u64;
                (in_frames as f64
                    * config.resample_ratio()
                    * config.output_format.bytes_per_sample_pair() as f64) as u64
            });
            match projected {
                Some(bytes) if bytes > u32::MAX as u64 => {
                    log::warn!(
                        "projected output of {bytes} bytes exceeds plain WAV; writing RF64"
                    );
                    ContainerKind::Rf64
                }
                _ => ContainerKind::Wav,
            }
        }
        _ => ContainerKind::Raw,
    }
}

/// The handler thread holds only a weak context reference: once the run
/// finishes and the pipeline drops, the event channel must close so the
/// progress reporter can drain and exit.
fn install_signal_handler(ctx: &Arc<PipelineContext>) -> Result<()> {
    let ctx = Arc::downgrade(ctx);
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("installing signal handler")?;
    std::thread::Builder::new()
        .name("iq-signals".into())
        .spawn(move || {
            let mut seen = 0u32;
            for signal in signals.forever() {
                seen += 1;
                match (seen, ctx.upgrade()) {
                    (1, Some(ctx)) => {
                        log::warn!("signal {signal} received; shutting down cleanly");
                        ctx.request_shutdown();
                    }
                    _ => {
                        log::error!("second signal; aborting");
                        std::process::exit(130);
                    }
                }
            }
        })
        .context("spawning signal thread")?;
    Ok(())
}
