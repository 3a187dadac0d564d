//! Pipeline configuration model
//!
//! Plain data describing one run: rates, formats, shifts, filter chains,
//! correction toggles, and buffer overrides. Validation happens once,
//! before any thread is spawned; a config that passes `validate` will not
//! fail for configuration reasons later.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::formats::SampleFormat;
use crate::tunables::{
    IO_FILE_WRITER_BUFFER_BYTES, IO_SDR_INPUT_BUFFER_BYTES, MAX_FILTER_CHAIN,
    PIPELINE_CHUNK_BASE_SAMPLES, PIPELINE_NUM_CHUNKS, SHIFT_FACTOR_LIMIT,
};

/// Offset below which a passband is considered centered (symmetric).
pub const PASSBAND_CENTER_EPSILON_HZ: f64 = 1e-3;

/// Output gain-control profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgcProfile {
    #[default]
    Off,
    /// RMS tracking, slow loop for weak-signal listening.
    Dx,
    /// RMS tracking, fast loop for strong local signals.
    Local,
    /// Peak-locked profile for digital modes.
    Digital,
}

/// Filter response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Lowpass,
    Highpass,
    Passband,
    Stopband,
}

/// One user filter request. `f1`/`f2` meaning depends on the kind:
/// lowpass/highpass use `f1` as the cutoff; passband/stopband use the
/// `[f1, f2]` edge pair (which may sit off-center for complex designs).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterRequest {
    pub kind: FilterKind,
    pub f1_hz: f64,
    pub f2_hz: f64,
}

impl FilterRequest {
    pub fn lowpass(cutoff_hz: f64) -> Self {
        Self {
            kind: FilterKind::Lowpass,
            f1_hz: cutoff_hz,
            f2_hz: 0.0,
        }
    }

    pub fn highpass(cutoff_hz: f64) -> Self {
        Self {
            kind: FilterKind::Highpass,
            f1_hz: cutoff_hz,
            f2_hz: 0.0,
        }
    }

    pub fn passband(f1_hz: f64, f2_hz: f64) -> Self {
        Self {
            kind: FilterKind::Passband,
            f1_hz,
            f2_hz,
        }
    }

    pub fn stopband(f1_hz: f64, f2_hz: f64) -> Self {
        Self {
            kind: FilterKind::Stopband,
            f1_hz,
            f2_hz,
        }
    }

    /// Center frequency of a band request.
    pub fn center_hz(&self) -> f64 {
        (self.f1_hz + self.f2_hz) * 0.5
    }

    /// A passband whose center sits away from zero needs complex taps.
    pub fn is_asymmetric(&self) -> bool {
        self.kind == FilterKind::Passband && self.center_hz().abs() > PASSBAND_CENTER_EPSILON_HZ
    }

    /// The frequency that drives derived transition width.
    pub fn reference_hz(&self) -> f64 {
        match self.kind {
            FilterKind::Lowpass | FilterKind::Highpass => self.f1_hz,
            FilterKind::Passband | FilterKind::Stopband => (self.f2_hz - self.f1_hz) * 0.5,
        }
    }
}

/// Filter engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterImpl {
    /// Asymmetric combined response picks overlap-save, symmetric picks FIR.
    #[default]
    Auto,
    Fir,
    Fft,
}

/// Everything describing one side's filter chain (pre- or post-resample).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterOptions {
    pub requests: Vec<FilterRequest>,
    /// Explicit tap count; rounded up to odd, takes precedence over
    /// transition width.
    pub num_taps: Option<usize>,
    pub transition_width_hz: Option<f64>,
    /// Stopband attenuation in dB; `None` means the 60 dB default.
    pub attenuation_db: Option<f64>,
    pub implementation: FilterImpl,
    /// User FFT length; block size becomes half of it.
    pub fft_size: Option<usize>,
}

impl FilterOptions {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Full description of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input_rate: f64,
    pub output_rate: f64,
    pub input_format: SampleFormat,
    pub output_format: SampleFormat,

    /// Frequency shift applied before resampling, in Hz.
    pub pre_shift_hz: f64,
    /// Frequency shift applied after resampling, in Hz.
    pub post_shift_hz: f64,

    pub dc_block: bool,
    pub iq_correction: bool,
    /// Run one synchronous correction pass before streaming (file sources).
    pub iq_calibrate_on_start: bool,
    pub agc: AgcProfile,

    pub pre_filter: FilterOptions,
    pub post_filter: FilterOptions,

    /// Copy source bytes straight to the output, bypassing DSP entirely.
    pub raw_passthrough: bool,

    /// Complex frames per chunk.
    pub base_samples: usize,
    /// Chunks allocated by the pool.
    pub num_chunks: usize,
    /// Framed SDR buffer capacity in bytes.
    pub sdr_buffer_bytes: usize,
    /// Writer byte-ring capacity in bytes.
    pub writer_buffer_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_rate: 0.0,
            output_rate: 0.0,
            input_format: SampleFormat::Cs16,
            output_format: SampleFormat::Cs16,
            pre_shift_hz: 0.0,
            post_shift_hz: 0.0,
            dc_block: false,
            iq_correction: false,
            iq_calibrate_on_start: false,
            agc: AgcProfile::Off,
            pre_filter: FilterOptions::default(),
            post_filter: FilterOptions::default(),
            raw_passthrough: false,
            base_samples: PIPELINE_CHUNK_BASE_SAMPLES,
            num_chunks: PIPELINE_NUM_CHUNKS,
            sdr_buffer_bytes: IO_SDR_INPUT_BUFFER_BYTES,
            writer_buffer_bytes: IO_FILE_WRITER_BUFFER_BYTES,
        }
    }
}

impl PipelineConfig {
    /// Rate-conversion ratio `output_rate / input_rate`.
    pub fn resample_ratio(&self) -> f64 {
        self.output_rate / self.input_rate
    }

    /// True when no rate conversion happens and the resampler stage is
    /// omitted from the graph.
    pub fn no_resample(&self) -> bool {
        (self.resample_ratio() - 1.0).abs() < 1e-12
    }

    /// True when any DSP stage runs between Reader and Writer.
    pub fn any_dsp(&self) -> bool {
        !self.raw_passthrough
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.input_rate <= 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "input rate must be positive, got {}",
                self.input_rate
            )));
        }
        if self.output_rate <= 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "output rate must be positive, got {}",
                self.output_rate
            )));
        }
        if self.base_samples == 0 || self.num_chunks < 4 {
            return Err(CoreError::InvalidConfig(
                "chunk geometry too small: need base samples > 0 and at least 4 chunks".into(),
            ));
        }

        for (label, shift, rate) in [
            ("pre-resample", self.pre_shift_hz, self.input_rate),
            ("post-resample", self.post_shift_hz, self.output_rate),
        ] {
            if (shift / rate).abs() > SHIFT_FACTOR_LIMIT {
                return Err(CoreError::InvalidConfig(format!(
                    "{label} shift of {shift} Hz exceeds {SHIFT_FACTOR_LIMIT}x the sample rate"
                )));
            }
        }

        for (label, side) in [("pre", &self.pre_filter), ("post", &self.post_filter)] {
            if side.requests.len() > MAX_FILTER_CHAIN {
                return Err(CoreError::InvalidFilter(format!(
                    "{label}-resample chain has {} requests, maximum is {MAX_FILTER_CHAIN}",
                    side.requests.len()
                )));
            }
            for request in &side.requests {
                validate_request(label, request)?;
            }
            if let Some(fft_size) = side.fft_size {
                if !fft_size.is_power_of_two() || fft_size < 32 {
                    return Err(CoreError::InvalidFilter(format!(
                        "{label}-resample FFT size {fft_size} must be a power of two >= 32"
                    )));
                }
            }
        }

        if self.raw_passthrough {
            if self.input_format != self.output_format {
                return Err(CoreError::InvalidConfig(
                    "raw passthrough requires identical input and output formats".into(),
                ));
            }
            if !self.no_resample() {
                return Err(CoreError::InvalidConfig(
                    "raw passthrough cannot change the sample rate".into(),
                ));
            }
        }

        if self.iq_correction && !self.input_format.is_complex() {
            return Err(CoreError::InvalidConfig(
                "I/Q correction requires a complex input format".into(),
            ));
        }

        Ok(())
    }
}

fn validate_request(label: &str, request: &FilterRequest) -> CoreResult<()> {
    match request.kind {
        FilterKind::Lowpass | FilterKind::Highpass => {
            if request.f1_hz <= 0.0 {
                return Err(CoreError::InvalidFilter(format!(
                    "{label}-resample {:?} cutoff must be positive, got {}",
                    request.kind, request.f1_hz
                )));
            }
        }
        FilterKind::Passband | FilterKind::Stopband => {
            if request.f2_hz <= request.f1_hz {
                return Err(CoreError::InvalidFilter(format!(
                    "{label}-resample {:?} edges must satisfy f1 < f2, got [{}, {}]",
                    request.kind, request.f1_hz, request.f2_hz
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> PipelineConfig {
        PipelineConfig {
            input_rate: 2_400_000.0,
            output_rate: 1_200_000.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        base_config().validate().unwrap();
    }

    #[test]
    fn test_ratio_and_no_resample() {
        let config = base_config();
        assert!((config.resample_ratio() - 0.5).abs() < 1e-12);
        assert!(!config.no_resample());

        let mut unity = base_config();
        unity.output_rate = unity.input_rate;
        assert!(unity.no_resample());
    }

    #[test]
    fn test_shift_limit_enforced() {
        let mut config = base_config();
        config.pre_shift_hz = config.input_rate * (SHIFT_FACTOR_LIMIT + 1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_chain_limit() {
        let mut config = base_config();
        config.pre_filter.requests = vec![FilterRequest::lowpass(100e3); MAX_FILTER_CHAIN + 1];
        assert!(config.validate().is_err());

        config.pre_filter.requests.truncate(MAX_FILTER_CHAIN);
        config.validate().unwrap();
    }

    #[test]
    fn test_band_edges_ordered() {
        let mut config = base_config();
        config.post_filter.requests = vec![FilterRequest::passband(200e3, 100e3)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_passthrough_constraints() {
        let mut config = base_config();
        config.raw_passthrough = true;
        // Rate change forbidden.
        assert!(config.validate().is_err());

        config.output_rate = config.input_rate;
        config.validate().unwrap();

        config.output_format = SampleFormat::Cf32;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_asymmetric_passband_detection() {
        assert!(FilterRequest::passband(50e3, 150e3).is_asymmetric());
        assert!(!FilterRequest::passband(-100e3, 100e3).is_asymmetric());
        assert!(!FilterRequest::stopband(50e3, 150e3).is_asymmetric());
    }
}
