//! Compile-time tunables
//!
//! Every fixed parameter of the pipeline lives here so that a change in one
//! place propagates to the pool sizing, the filter designer, and the tests.

/// Number of chunks allocated by the free pool at startup.
pub const PIPELINE_NUM_CHUNKS: usize = 512;

/// Complex frames per chunk read from a source in one go.
pub const PIPELINE_CHUNK_BASE_SAMPLES: usize = 16384;

/// Extra output frames a resampled chunk can always absorb beyond
/// `ceil(frames_read * ratio)`.
pub const RESAMPLER_OUTPUT_SAFETY_MARGIN: usize = 128;

/// Baseline stopband attenuation of the rate converter, in dB.
pub const RESAMPLER_QUALITY_ATTENUATION_DB: f64 = 60.0;

/// Internal block granularity of the rate converter, in input frames.
pub const RESAMPLER_BLOCK_FRAMES: usize = 1024;

/// Derived transition width as a fraction of the characteristic frequency
/// when the user specifies neither taps nor transition width.
pub const DEFAULT_FILTER_TRANSITION_FACTOR: f64 = 0.25;

/// Smallest tap count a designed filter may have.
pub const FILTER_MINIMUM_TAPS: usize = 21;

/// A normalization divisor smaller than this is treated as a degenerate
/// (all-rejecting) design and refused.
pub const FILTER_GAIN_ZERO_THRESHOLD: f64 = 1e-9;

/// Unit-circle sample count used for peak-magnitude normalization.
pub const FILTER_FREQ_RESPONSE_POINTS: usize = 2048;

/// Default stopband attenuation for user filters, in dB.
pub const FILTER_DEFAULT_ATTENUATION_DB: f64 = 60.0;

/// FFT length used by the I/Q imbalance estimator.
pub const IQ_CORRECTION_FFT_SIZE: usize = 1024;

/// Minimum spacing between optimizer passes.
pub const IQ_CORRECTION_INTERVAL_MS: u64 = 500;

/// Hill-climb step applied to each correction axis.
pub const IQ_BASE_INCREMENT: f32 = 1e-4;

/// Hill-climb candidates evaluated per optimizer pass.
pub const IQ_MAX_PASSES: usize = 25;

/// Peak-over-average spectral power required before a pass runs, in dB.
pub const IQ_CORRECTION_POWER_THRESHOLD_DB: f64 = 20.0;

/// Exponential smoothing applied when publishing new correction factors.
pub const IQ_CORRECTION_SMOOTHING_FACTOR: f32 = 0.05;

/// Cutoff of the fixed DC-blocking highpass, in Hz against the input rate.
pub const DC_BLOCK_CUTOFF_HZ: f64 = 10.0;

/// Capacity of the framed ring buffer between driver callbacks and the
/// Reader, in bytes.
pub const IO_SDR_INPUT_BUFFER_BYTES: usize = 256 * 1024 * 1024;

/// Capacity of the byte ring between the PostProcessor and a container
/// sink, in bytes.
pub const IO_FILE_WRITER_BUFFER_BYTES: usize = 1024 * 1024 * 1024;

/// Slice size the Writer drains from the byte ring per sink write.
pub const IO_FILE_WRITER_CHUNK_SIZE: usize = 1024 * 1024;

/// Fill ratio of the writer ring above which file-mode reading pauses.
pub const IO_WRITER_BUFFER_HIGH_WATER_MARK: f64 = 0.95;

/// Pause applied by a file reader while the writer ring is above the
/// high-water mark.
pub const IO_READER_BACKPRESSURE_PAUSE_MS: u64 = 10;

/// Watchdog check cadence.
pub const WATCHDOG_INTERVAL_MS: u64 = 2000;

/// Heartbeat silence after which the watchdog kills the process.
pub const WATCHDOG_TIMEOUT_MS: u64 = 8000;

/// Largest tolerated `|shift_hz| / sample_rate`.
pub const SHIFT_FACTOR_LIMIT: f64 = 5.0;

/// Most filter requests accepted per side (pre- and post-resample).
pub const MAX_FILTER_CHAIN: usize = 5;

/// Seconds of signal the digital AGC scans before locking its gain.
pub const AGC_DIGITAL_SCAN_SECONDS: f64 = 2.0;

/// Peak-memory seed that keeps a silent startup from producing a gain spike.
pub const AGC_DIGITAL_PEAK_SEED: f32 = 0.05;

/// Seconds below the low threshold before locked gain starts recovering.
pub const AGC_DIGITAL_HANG_SECONDS: f64 = 1.0;

/// Multiplicative gain recovery applied per block once the hang expires.
pub const AGC_DIGITAL_RECOVERY_PER_BLOCK: f32 = 1.001;
