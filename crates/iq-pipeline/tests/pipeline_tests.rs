//! End-to-end pipeline scenarios
//!
//! Each test streams a generated file (or a mock SDR) through a fully
//! wired pipeline into a raw sink, then checks the output bytes and the
//! conservation properties: no chunk leaks, clean termination, no error
//! flag on healthy runs.

use std::io::Write;
use std::sync::Arc;

use crossbeam_channel::unbounded;
use num_complex::Complex;

use iq_core::config::{FilterRequest, PipelineConfig};
use iq_core::formats::SampleFormat;
use iq_io::sink::FileSink;
use iq_io::container::ContainerKind;
use iq_io::source::{FileSource, FrameSink, SampleSource, SourceInfo, SourceMode, StreamHooks};
use iq_pipeline::events::EventSender;
use iq_pipeline::{Pipeline, PipelineEvent};

/// Small-geometry config so tests stay light on memory.
fn test_config(input_rate: f64, output_rate: f64) -> PipelineConfig {
    PipelineConfig {
        input_rate,
        output_rate,
        input_format: SampleFormat::Cf32,
        output_format: SampleFormat::Cf32,
        base_samples: 2048,
        num_chunks: 16,
        sdr_buffer_bytes: 1 << 20,
        writer_buffer_bytes: 1 << 20,
        ..Default::default()
    }
}

fn write_cf32_file(path: &std::path::Path, samples: &[Complex<f32>]) {
    let mut file = std::fs::File::create(path).unwrap();
    let mut bytes = Vec::with_capacity(samples.len() * 8);
    for s in samples {
        bytes.extend_from_slice(&s.re.to_le_bytes());
        bytes.extend_from_slice(&s.im.to_le_bytes());
    }
    file.write_all(&bytes).unwrap();
}

fn read_cf32_file(path: &std::path::Path) -> Vec<Complex<f32>> {
    let bytes = std::fs::read(path).unwrap();
    bytes
        .chunks_exact(8)
        .map(|c| {
            Complex::new(
                f32::from_le_bytes(c[0..4].try_into().unwrap()),
                f32::from_le_bytes(c[4..8].try_into().unwrap()),
            )
        })
        .collect()
}

fn run_pipeline(
    config: PipelineConfig,
    source: Box<dyn SampleSource>,
    sink: Box<dyn iq_io::sink::OutputSink>,
) -> (iq_pipeline::RunSummary, Vec<PipelineEvent>) {
    let (tx, rx) = unbounded();
    let pipeline = Pipeline::new(config, source, sink, EventSender::new(tx)).unwrap();
    let summary = pipeline.run().unwrap();
    let events: Vec<PipelineEvent> = rx.try_iter().collect();
    (summary, events)
}

fn assert_clean(summary: &iq_pipeline::RunSummary) {
    assert!(!summary.error_occurred, "run flagged an error");
    assert_eq!(summary.chunks_leaked, 0, "chunks leaked from the pool");
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════════

/// Raw passthrough is byte-identical.
#[test]
fn test_passthrough_identity() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("in.cf32");
    let output_path = dir.path().join("out.cf32");

    let n = 100_000;
    let samples: Vec<Complex<f32>> = (0..n)
        .map(|i| {
            let theta = 2.0 * std::f64::consts::PI * i as f64 / 100.0;
            Complex::new(theta.sin() as f32, theta.cos() as f32)
        })
        .collect();
    write_cf32_file(&input_path, &samples);

    let mut config = test_config(2e6, 2e6);
    config.raw_passthrough = true;

    let source = Box::new(FileSource::new(&input_path, SampleFormat::Cf32, 2e6));
    let sink = Box::new(FileSink::new(
        &output_path,
        ContainerKind::Raw,
        SampleFormat::Cf32,
        2e6,
    ));
    let (summary, _) = run_pipeline(config, source, sink);
    assert_clean(&summary);

    let input_bytes = std::fs::read(&input_path).unwrap();
    let output_bytes = std::fs::read(&output_path).unwrap();
    assert_eq!(input_bytes.len(), n * 8);
    assert_eq!(input_bytes, output_bytes);
    assert_eq!(summary.frames_read, n as u64);
}

/// Rate halving keeps a flat signal flat within one LSB.
#[test]
fn test_rate_halving_cs16() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("in.cs16");
    let output_path = dir.path().join("out.cs16");

    let n = 65_536usize;
    let mut bytes = Vec::with_capacity(n * 4);
    for _ in 0..n {
        bytes.extend_from_slice(&0x4000i16.to_le_bytes());
        bytes.extend_from_slice(&0i16.to_le_bytes());
    }
    std::fs::write(&input_path, &bytes).unwrap();

    let mut config = test_config(2.4e6, 1.2e6);
    config.input_format = SampleFormat::Cs16;
    config.output_format = SampleFormat::Cs16;

    let source = Box::new(FileSource::new(&input_path, SampleFormat::Cs16, 2.4e6));
    let sink = Box::new(FileSink::new(
        &output_path,
        ContainerKind::Raw,
        SampleFormat::Cs16,
        1.2e6,
    ));
    let (summary, _) = run_pipeline(config, source, sink);
    assert_clean(&summary);

    let out = std::fs::read(&output_path).unwrap();
    let frames = out.len() / 4;
    // About half the input, within converter-block granularity.
    assert!(
        (frames as i64 - (n / 2) as i64).unsigned_abs() < 2048,
        "unexpected output length {frames}"
    );

    // The plateau (away from startup/flush transients) holds the level.
    for frame in out[4 * 1024..out.len() - 4 * 1024].chunks_exact(4) {
        let re = i16::from_le_bytes([frame[0], frame[1]]);
        assert!(
            (re as i32 - 0x4000).abs() <= 1,
            "plateau sample drifted: {re:#06x}"
        );
    }
}

/// A -100 kHz shift turns a +100 kHz tone into DC.
#[test]
fn test_pre_shift_moves_tone_to_dc() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("in.cf32");
    let output_path = dir.path().join("out.cf32");

    let rate = 2e6;
    let n = 65_536;
    let samples: Vec<Complex<f32>> = (0..n)
        .map(|i| {
            let theta = 2.0 * std::f64::consts::PI * 100e3 * i as f64 / rate;
            Complex::new(theta.cos() as f32, theta.sin() as f32)
        })
        .collect();
    write_cf32_file(&input_path, &samples);

    let mut config = test_config(rate, rate);
    config.pre_shift_hz = -100e3;

    let source = Box::new(FileSource::new(&input_path, SampleFormat::Cf32, rate));
    let sink = Box::new(FileSink::new(
        &output_path,
        ContainerKind::Raw,
        SampleFormat::Cf32,
        rate,
    ));
    let (summary, _) = run_pipeline(config, source, sink);
    assert_clean(&summary);

    let out = read_cf32_file(&output_path);
    assert_eq!(out.len(), n);
    let mean_sq_err: f64 = out
        .iter()
        .map(|s| {
            let d = (s - Complex::new(1.0, 0.0)).norm_sqr() as f64;
            d
        })
        .sum::<f64>()
        / out.len() as f64;
    assert!(mean_sq_err < 1e-6, "residual error {mean_sq_err}");
}

/// The DC blocker strips the offset and leaves the tone alone.
#[test]
fn test_dc_block_removes_offset() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("in.cf32");
    let output_path = dir.path().join("out.cf32");

    // The 10 Hz blocker has a ~32k-sample time constant at this rate; give
    // the offset a dozen time constants to die.
    let rate = 2e6;
    let n = 524_288;
    let offset = Complex::new(0.1_f32, 0.2);
    let samples: Vec<Complex<f32>> = (0..n)
        .map(|i| {
            let theta = 2.0 * std::f64::consts::PI * 50e3 * i as f64 / rate;
            offset + Complex::new(theta.cos() as f32, theta.sin() as f32) * 0.5
        })
        .collect();
    write_cf32_file(&input_path, &samples);

    let mut config = test_config(rate, rate);
    config.dc_block = true;
    // Small ring keeps the backpressure path exercised.
    config.writer_buffer_bytes = 256 * 1024;

    let source = Box::new(FileSource::new(&input_path, SampleFormat::Cf32, rate));
    let sink = Box::new(FileSink::new(
        &output_path,
        ContainerKind::Raw,
        SampleFormat::Cf32,
        rate,
    ));
    let (summary, _) = run_pipeline(config, source, sink);
    assert_clean(&summary);

    let out = read_cf32_file(&output_path);
    assert_eq!(out.len(), n);

    let tail = &out[out.len() - 65_536..];
    let mean = tail.iter().map(|s| Complex::new(s.re as f64, s.im as f64)).sum::<Complex<f64>>()
        / tail.len() as f64;
    assert!(mean.norm() < 1e-3, "residual DC {mean}");

    // Tone power: amplitude 0.5 tone has power 0.25; allow 1%.
    let power: f64 =
        tail.iter().map(|s| s.norm_sqr() as f64).sum::<f64>() / tail.len() as f64;
    assert!(
        (power - 0.25).abs() / 0.25 < 0.01,
        "tone power changed: {power}"
    );
}

/// A 200 kHz lowpass crushes energy above 300 kHz and spares the passband.
#[test]
fn test_lowpass_psd() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("in.cf32");
    let output_path = dir.path().join("out.cf32");

    let rate = 2e6;
    let n = 262_144usize;
    // Deterministic white-ish noise.
    let mut state = 0x9e37_79b9_u64;
    let mut next = || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 33) as f32 / (1u64 << 31) as f32) - 1.0
    };
    let samples: Vec<Complex<f32>> = (0..n).map(|_| Complex::new(next(), next()) * 0.3).collect();
    write_cf32_file(&input_path, &samples);

    let mut config = test_config(rate, rate);
    config.pre_filter.requests = vec![FilterRequest::lowpass(200e3)];

    let source = Box::new(FileSource::new(&input_path, SampleFormat::Cf32, rate));
    let sink = Box::new(FileSink::new(
        &output_path,
        ContainerKind::Raw,
        SampleFormat::Cf32,
        rate,
    ));
    let (summary, _) = run_pipeline(config, source, sink);
    assert_clean(&summary);

    let out = read_cf32_file(&output_path);
    assert_eq!(out.len(), n);

    // Averaged periodograms over 4096-point blocks, skipping the filter
    // warmup at the head.
    let band_power = |data: &[Complex<f32>], lo_hz: f64, hi_hz: f64| -> f64 {
        let fft_len = 4096usize;
        let mut planner = rustfft::FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_len);
        let mut acc = vec![0.0_f64; fft_len];
        let mut blocks = 0;
        for block in data[fft_len..].chunks_exact(fft_len).take(32) {
            let mut work: Vec<Complex<f32>> = block.to_vec();
            fft.process(&mut work);
            for (k, v) in work.iter().enumerate() {
                acc[k] += v.norm_sqr() as f64;
            }
            blocks += 1;
        }
        let hz_per_bin = rate / fft_len as f64;
        let mut power = 0.0;
        let mut count = 0usize;
        for (k, &p) in acc.iter().enumerate() {
            // Signed frequency of this bin.
            let freq = if k < fft_len / 2 {
                k as f64 * hz_per_bin
            } else {
                (k as f64 - fft_len as f64) * hz_per_bin
            };
            if freq.abs() >= lo_hz && freq.abs() <= hi_hz {
                power += p;
                count += 1;
            }
        }
        power / (count.max(1) * blocks.max(1)) as f64
    };

    let in_stop = band_power(&samples, 300e3, 900e3);
    let out_stop = band_power(&out, 300e3, 900e3);
    let stop_db = 10.0 * (out_stop / in_stop).log10();
    assert!(stop_db <= -55.0, "stopband only {stop_db:.1} dB down");

    let in_pass = band_power(&samples, 0.0, 150e3);
    let out_pass = band_power(&out, 0.0, 150e3);
    let pass_db = 10.0 * (out_pass / in_pass).log10();
    assert!(pass_db.abs() <= 0.5, "passband moved {pass_db:.2} dB");
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUFFERED SDR MODE & DISCONTINUITY
// ═══════════════════════════════════════════════════════════════════════════════

/// Mock driver: 20 DATA frames, one RESET, 20 more DATA frames.
struct MockSdrSource {
    frames_per_packet: usize,
    packets_per_half: usize,
}

impl MockSdrSource {
    fn packet(&self, index: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.frames_per_packet * 4);
        for k in 0..self.frames_per_packet {
            let v = (index * self.frames_per_packet + k) as i16;
            bytes.extend_from_slice(&v.to_le_bytes());
            bytes.extend_from_slice(&v.wrapping_neg().to_le_bytes());
        }
        bytes
    }

    fn expected_payload(&self) -> Vec<u8> {
        (0..self.packets_per_half * 2)
            .flat_map(|i| self.packet(i))
            .collect()
    }
}

impl SampleSource for MockSdrSource {
    fn initialize(&mut self) -> iq_io::IoModResult<SourceInfo> {
        Ok(SourceInfo {
            format: SampleFormat::Cs16,
            sample_rate: 1e6,
            total_frames: None,
            max_bytes_per_sample_pair: 4,
        })
    }

    fn mode(&self) -> SourceMode {
        SourceMode::BufferedSdr
    }

    fn start_stream(
        &mut self,
        frames: &dyn FrameSink,
        hooks: &dyn StreamHooks,
    ) -> iq_io::IoModResult<()> {
        for i in 0..self.packets_per_half {
            hooks.heartbeat();
            frames.write_interleaved_chunk(SampleFormat::Cs16, &self.packet(i));
        }
        frames.write_reset_event();
        for i in 0..self.packets_per_half {
            if hooks.should_stop() {
                break;
            }
            hooks.heartbeat();
            frames.write_interleaved_chunk(
                SampleFormat::Cs16,
                &self.packet(self.packets_per_half + i),
            );
        }
        Ok(())
    }

    fn summary(&self) -> String {
        "mock sdr".into()
    }
}

/// A RESET frame becomes exactly one discontinuity; every data byte
/// arrives, in order, across it.
#[test]
fn test_buffered_sdr_discontinuity() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("out.cs16");

    let mut config = test_config(1e6, 1e6);
    config.input_format = SampleFormat::Cs16;
    config.output_format = SampleFormat::Cs16;

    let source = Box::new(MockSdrSource {
        frames_per_packet: 256,
        packets_per_half: 20,
    });
    let expected = source.expected_payload();

    let sink = Box::new(FileSink::new(
        &output_path,
        ContainerKind::Raw,
        SampleFormat::Cs16,
        1e6,
    ));
    let (summary, events) = run_pipeline(config, source, sink);
    assert_clean(&summary);
    assert_eq!(summary.input_overruns, 0);

    let out = std::fs::read(&output_path).unwrap();
    assert_eq!(out, expected, "payload bytes lost or reordered");

    let discontinuities = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Discontinuity))
        .count();
    assert_eq!(discontinuities, 1);
    assert!(events.contains(&PipelineEvent::Finished));
}

/// Realtime-mode drivers fill chunks straight through the pump.
struct MockRealtimeSource {
    blocks: usize,
}

impl SampleSource for MockRealtimeSource {
    fn initialize(&mut self) -> iq_io::IoModResult<SourceInfo> {
        Ok(SourceInfo {
            format: SampleFormat::Cu8,
            sample_rate: 250e3,
            total_frames: None,
            max_bytes_per_sample_pair: 2,
        })
    }

    fn mode(&self) -> SourceMode {
        SourceMode::RealtimeSdr
    }

    fn run_realtime(
        &mut self,
        pump: &mut dyn iq_io::source::ChunkPump,
    ) -> iq_io::IoModResult<()> {
        for i in 0..self.blocks {
            let byte = (i % 251) as u8;
            if !pump.push_samples(SampleFormat::Cu8, &[byte; 512]) {
                break;
            }
        }
        Ok(())
    }

    fn summary(&self) -> String {
        "mock realtime".into()
    }
}

#[test]
fn test_realtime_mode_streams_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("out.cu8");

    let mut config = test_config(250e3, 250e3);
    config.input_format = SampleFormat::Cu8;
    config.output_format = SampleFormat::Cu8;

    let source = Box::new(MockRealtimeSource { blocks: 40 });
    let sink = Box::new(FileSink::new(
        &output_path,
        ContainerKind::Raw,
        SampleFormat::Cu8,
        250e3,
    ));
    let (summary, _) = run_pipeline(config, source, sink);
    assert_clean(&summary);

    assert_eq!(summary.frames_read, 40 * 256);
    let out = std::fs::read(&output_path).unwrap();
    assert_eq!(out.len(), 40 * 512);
}

// ═══════════════════════════════════════════════════════════════════════════════
// STDOUT-STYLE DIRECT PATH & TERMINATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Sink that takes the chunk-queue path, like stdout, into memory.
struct CollectingSink {
    buffer: Arc<parking_lot::Mutex<Vec<u8>>>,
}

impl iq_io::sink::OutputSink for CollectingSink {
    fn initialize(&mut self) -> iq_io::IoModResult<()> {
        Ok(())
    }

    fn write_chunk(&mut self, bytes: &[u8]) -> iq_io::IoModResult<usize> {
        self.buffer.lock().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn finalize(&mut self) -> iq_io::IoModResult<()> {
        Ok(())
    }

    fn summary(&self) -> String {
        "collector".into()
    }

    fn direct_write(&self) -> bool {
        true
    }
}

#[test]
fn test_direct_write_path_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("in.cf32");

    let n = 20_000;
    let samples: Vec<Complex<f32>> = (0..n)
        .map(|i| Complex::new((i as f32 * 0.01).sin(), (i as f32 * 0.01).cos()))
        .collect();
    write_cf32_file(&input_path, &samples);

    let config = test_config(1e6, 1e6);
    let buffer = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Box::new(CollectingSink {
        buffer: Arc::clone(&buffer),
    });
    let source = Box::new(FileSource::new(&input_path, SampleFormat::Cf32, 1e6));

    let (summary, _) = run_pipeline(config, source, sink);
    assert_clean(&summary);

    let collected = buffer.lock();
    assert_eq!(collected.len(), n * 8);
    assert_eq!(&collected[..], &std::fs::read(&input_path).unwrap()[..]);
    assert_eq!(summary.frames_written, n as u64);
}

/// Cancelling mid-run still drains, finalizes, and terminates.
#[test]
fn test_cooperative_cancel_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("in.cf32");
    let output_path = dir.path().join("out.cf32");

    let samples: Vec<Complex<f32>> = vec![Complex::new(0.1, -0.1); 200_000];
    write_cf32_file(&input_path, &samples);

    let config = test_config(1e6, 1e6);
    let source = Box::new(FileSource::new(&input_path, SampleFormat::Cf32, 1e6));
    let sink = Box::new(FileSink::new(
        &output_path,
        ContainerKind::Raw,
        SampleFormat::Cf32,
        1e6,
    ));

    let pipeline = Pipeline::new(config, source, sink, EventSender::disconnected()).unwrap();
    let ctx = pipeline.context();

    let canceller = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        ctx.request_shutdown();
    });

    // Must terminate; a cancelled run reports no error.
    let summary = pipeline.run().unwrap();
    canceller.join().unwrap();
    assert!(!summary.error_occurred);
    assert!(output_path.exists());
}
