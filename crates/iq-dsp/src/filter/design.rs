//! Windowed-sinc filter design
//!
//! Kaiser-windowed sinc prototypes, spectral inversion for highpass and
//! stopband shapes, complex modulation for off-center passbands, chain
//! convolution into a single master tap array, and the dual normalization
//! rule (DC sum for plain lowpass-like chains, unit-circle peak otherwise).

use num_complex::Complex;

use iq_core::config::{FilterImpl, FilterKind, FilterOptions, FilterRequest};
use iq_core::tunables::{
    DEFAULT_FILTER_TRANSITION_FACTOR, FILTER_DEFAULT_ATTENUATION_DB, FILTER_FREQ_RESPONSE_POINTS,
    FILTER_GAIN_ZERO_THRESHOLD, FILTER_MINIMUM_TAPS,
};

use crate::error::{DspError, DspResult};

/// Offset below which a band center counts as zero.
const CENTER_EPSILON_HZ: f64 = 1e-3;

/// Master tap array of a combined filter chain.
#[derive(Debug, Clone)]
pub enum FilterTaps {
    Real(Vec<f32>),
    Complex(Vec<Complex<f32>>),
}

impl FilterTaps {
    pub fn len(&self) -> usize {
        match self {
            FilterTaps::Real(t) => t.len(),
            FilterTaps::Complex(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, FilterTaps::Complex(_))
    }

    /// Taps as complex values regardless of storage.
    pub fn to_complex(&self) -> Vec<Complex<f32>> {
        match self {
            FilterTaps::Real(t) => t.iter().map(|&x| Complex::new(x, 0.0)).collect(),
            FilterTaps::Complex(t) => t.clone(),
        }
    }
}

/// A designed, normalized filter with its resolved engine choice.
#[derive(Debug, Clone)]
pub struct DesignedFilter {
    pub taps: FilterTaps,
    /// True when the combined response is one-sided (complex taps).
    pub is_asymmetric: bool,
    /// `Some(block)` selects the overlap-save engine with that block size.
    pub fft_block: Option<usize>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// KAISER WINDOW
// ═══════════════════════════════════════════════════════════════════════════════

/// Zeroth-order modified Bessel function of the first kind.
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    let mut k = 1.0;
    loop {
        term *= (half / k) * (half / k);
        sum += term;
        if term < sum * 1e-12 {
            return sum;
        }
        k += 1.0;
    }
}

/// Kaiser shape parameter for a given stopband attenuation.
fn kaiser_beta(attenuation_db: f64) -> f64 {
    if attenuation_db > 50.0 {
        0.1102 * (attenuation_db - 8.7)
    } else if attenuation_db >= 21.0 {
        0.5842 * (attenuation_db - 21.0).powf(0.4) + 0.07886 * (attenuation_db - 21.0)
    } else {
        0.0
    }
}

/// Kaiser tap-count estimate for an attenuation and normalized transition
/// width, forced odd and floored at the design minimum.
fn kaiser_tap_count(attenuation_db: f64, transition_hz: f64, sample_rate: f64) -> usize {
    let delta_omega = 2.0 * std::f64::consts::PI * transition_hz.abs() / sample_rate;
    let estimate = if delta_omega > 0.0 {
        ((attenuation_db - 7.95) / (2.285 * delta_omega)).ceil() as usize
    } else {
        0
    };
    force_odd(estimate.max(FILTER_MINIMUM_TAPS))
}

fn force_odd(n: usize) -> usize {
    if n % 2 == 0 {
        n + 1
    } else {
        n
    }
}

fn kaiser_window(num_taps: usize, beta: f64) -> Vec<f64> {
    let m = (num_taps - 1) as f64 / 2.0;
    let denom = bessel_i0(beta);
    (0..num_taps)
        .map(|n| {
            let t = (n as f64 - m) / m.max(1.0);
            bessel_i0(beta * (1.0 - t * t).max(0.0).sqrt()) / denom
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOTYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Kaiser-windowed sinc lowpass with the given cutoff.
fn lowpass_taps(cutoff_hz: f64, sample_rate: f64, num_taps: usize, beta: f64) -> Vec<f64> {
    let fc = cutoff_hz / sample_rate;
    let m = (num_taps - 1) as f64 / 2.0;
    let window = kaiser_window(num_taps, beta);
    (0..num_taps)
        .map(|n| {
            let t = n as f64 - m;
            let sinc = if t == 0.0 {
                2.0 * fc
            } else {
                (2.0 * std::f64::consts::PI * fc * t).sin() / (std::f64::consts::PI * t)
            };
            sinc * window[n]
        })
        .collect()
}

/// `delta[center] - taps`: spectral inversion.
fn invert_real(taps: &[f64]) -> Vec<f64> {
    let center = (taps.len() - 1) / 2;
    taps.iter()
        .enumerate()
        .map(|(n, &h)| if n == center { 1.0 - h } else { -h })
        .collect()
}

fn invert_complex(taps: &[Complex<f64>]) -> Vec<Complex<f64>> {
    let center = (taps.len() - 1) / 2;
    taps.iter()
        .enumerate()
        .map(|(n, &h)| {
            if n == center {
                Complex::new(1.0, 0.0) - h
            } else {
                -h
            }
        })
        .collect()
}

/// Modulate a real prototype to a band center, producing complex taps.
fn modulate(taps: &[f64], center_hz: f64, sample_rate: f64) -> Vec<Complex<f64>> {
    let m = (taps.len() - 1) as f64 / 2.0;
    let omega = 2.0 * std::f64::consts::PI * center_hz / sample_rate;
    taps.iter()
        .enumerate()
        .map(|(n, &h)| Complex::from_polar(h, omega * (n as f64 - m)))
        .collect()
}

/// One stage's taps in f64 precision.
enum StageTaps {
    Real(Vec<f64>),
    Complex(Vec<Complex<f64>>),
}

/// A request reduced to canonical band form after shift compensation.
struct CanonicalBand {
    center_hz: f64,
    half_width_hz: f64,
    reject: bool,
}

fn canonicalize(request: &FilterRequest, compensate_hz: f64) -> CanonicalBand {
    let (center, half_width, reject) = match request.kind {
        FilterKind::Lowpass => (0.0, request.f1_hz.abs(), false),
        FilterKind::Highpass => (0.0, request.f1_hz.abs(), true),
        FilterKind::Passband => (
            request.center_hz(),
            (request.f2_hz - request.f1_hz) * 0.5,
            false,
        ),
        FilterKind::Stopband => (
            request.center_hz(),
            (request.f2_hz - request.f1_hz) * 0.5,
            true,
        ),
    };
    CanonicalBand {
        center_hz: center - compensate_hz,
        half_width_hz: half_width,
        reject,
    }
}

fn design_stage(
    band: &CanonicalBand,
    sample_rate: f64,
    num_taps: usize,
    beta: f64,
) -> StageTaps {
    let prototype = lowpass_taps(band.half_width_hz, sample_rate, num_taps, beta);

    if band.center_hz.abs() <= CENTER_EPSILON_HZ {
        if band.reject {
            StageTaps::Real(invert_real(&prototype))
        } else {
            StageTaps::Real(prototype)
        }
    } else {
        let shifted = modulate(&prototype, band.center_hz, sample_rate);
        if band.reject {
            StageTaps::Complex(invert_complex(&shifted))
        } else {
            StageTaps::Complex(shifted)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN COMBINATION & NORMALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

fn convolve_complex(a: &[Complex<f64>], b: &[Complex<f64>]) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

fn to_complex64(stage: &StageTaps) -> Vec<Complex<f64>> {
    match stage {
        StageTaps::Real(t) => t.iter().map(|&x| Complex::new(x, 0.0)).collect(),
        StageTaps::Complex(t) => t.clone(),
    }
}

/// Peak response magnitude sampled on the unit circle.
fn peak_response(taps: &[Complex<f64>]) -> f64 {
    let points = FILTER_FREQ_RESPONSE_POINTS;
    let mut peak = 0.0_f64;
    for k in 0..points {
        let omega = -std::f64::consts::PI + 2.0 * std::f64::consts::PI * k as f64 / points as f64;
        let mut acc = Complex::new(0.0, 0.0);
        for (n, &h) in taps.iter().enumerate() {
            acc += h * Complex::from_polar(1.0, -omega * n as f64);
        }
        peak = peak.max(acc.norm());
    }
    peak
}

/// Frequency response of a designed filter at one frequency. Used by the
/// test suite and the design-time diagnostics.
pub fn response_at(taps: &FilterTaps, freq_hz: f64, sample_rate: f64) -> f64 {
    let omega = 2.0 * std::f64::consts::PI * freq_hz / sample_rate;
    let complex = taps.to_complex();
    let mut acc = Complex::new(0.0_f64, 0.0);
    for (n, &h) in complex.iter().enumerate() {
        acc += Complex::new(h.re as f64, h.im as f64) * Complex::from_polar(1.0, -omega * n as f64);
    }
    acc.norm()
}

/// Design the combined filter for one side of the pipeline.
///
/// `compensate_shift_hz` is the frequency-shift compensation: the side's
/// NCO shift for the pre-resample chain (so requests read in the
/// post-shift spectrum), zero for the post-resample chain.
///
/// Returns `None` when the side has no requests.
pub fn design_chain(
    options: &FilterOptions,
    sample_rate: f64,
    compensate_shift_hz: f64,
) -> DspResult<Option<DesignedFilter>> {
    if options.requests.is_empty() {
        return Ok(None);
    }

    let attenuation_db = options
        .attenuation_db
        .unwrap_or(FILTER_DEFAULT_ATTENUATION_DB);
    let beta = kaiser_beta(attenuation_db);

    let mut combined: Option<Vec<Complex<f64>>> = None;
    let mut any_complex = false;
    let mut any_reject = false;

    for request in &options.requests {
        let band = canonicalize(request, compensate_shift_hz);
        if band.half_width_hz <= 0.0 || band.half_width_hz * 2.0 >= sample_rate {
            return Err(DspError::FilterDesign(format!(
                "band width {} Hz is outside (0, {}) for this rate",
                band.half_width_hz * 2.0,
                sample_rate
            )));
        }

        let num_taps = match options.num_taps {
            Some(n) => force_odd(n.max(FILTER_MINIMUM_TAPS)),
            None => {
                let transition = options
                    .transition_width_hz
                    .unwrap_or(request.reference_hz().abs() * DEFAULT_FILTER_TRANSITION_FACTOR);
                kaiser_tap_count(attenuation_db, transition, sample_rate)
            }
        };

        let stage = design_stage(&band, sample_rate, num_taps, beta);
        any_complex |= matches!(stage, StageTaps::Complex(_));
        any_reject |= band.reject;

        let stage64 = to_complex64(&stage);
        combined = Some(match combined {
            None => stage64,
            Some(acc) => convolve_complex(&acc, &stage64),
        });
    }

    let mut master = combined.unwrap_or_default();

    // Normalization: peak magnitude on the unit circle whenever the chain
    // rejects or is one-sided, otherwise plain DC sum.
    let divisor = if any_reject || any_complex {
        peak_response(&master)
    } else {
        master.iter().map(|h| h.re).sum::<f64>().abs()
    };
    if divisor < FILTER_GAIN_ZERO_THRESHOLD {
        return Err(DspError::FilterDesign(
            "combined filter has no usable gain to normalize against".into(),
        ));
    }
    for tap in &mut master {
        *tap /= divisor;
    }

    let taps = if any_complex {
        FilterTaps::Complex(
            master
                .iter()
                .map(|h| Complex::new(h.re as f32, h.im as f32))
                .collect(),
        )
    } else {
        FilterTaps::Real(master.iter().map(|h| h.re as f32).collect())
    };

    let use_fft = match options.implementation {
        FilterImpl::Fir => false,
        FilterImpl::Fft => true,
        FilterImpl::Auto => any_complex,
    };

    let fft_block = if use_fft {
        Some(resolve_fft_block(options.fft_size, taps.len())?)
    } else {
        None
    };

    log::debug!(
        "designed {}-tap {} filter ({} stage(s), {})",
        taps.len(),
        if any_complex { "complex" } else { "real" },
        options.requests.len(),
        match fft_block {
            Some(block) => format!("overlap-save block {block}"),
            None => "time-domain".to_string(),
        }
    );

    Ok(Some(DesignedFilter {
        taps,
        is_asymmetric: any_complex,
        fft_block,
    }))
}

/// Overlap-save block size: half the user FFT length when given, otherwise
/// the smallest power of two covering the taps, doubled while it does not
/// exceed them.
fn resolve_fft_block(user_fft_size: Option<usize>, taps_len: usize) -> DspResult<usize> {
    let block = match user_fft_size {
        Some(fft_size) => fft_size / 2,
        None => {
            let mut block = (taps_len.saturating_sub(1)).max(2).next_power_of_two();
            while block <= taps_len {
                block *= 2;
            }
            block
        }
    };
    if block < taps_len {
        return Err(DspError::FilterDesign(format!(
            "FFT block of {block} cannot hold {taps_len} taps; raise the FFT size"
        )));
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lowpass_options(cutoff: f64) -> FilterOptions {
        FilterOptions {
            requests: vec![FilterRequest::lowpass(cutoff)],
            ..Default::default()
        }
    }

    #[test]
    fn test_lowpass_unity_dc_gain() {
        let designed = design_chain(&lowpass_options(200e3), 2e6, 0.0)
            .unwrap()
            .unwrap();
        assert!(!designed.taps.is_complex());
        assert!(designed.taps.len() >= FILTER_MINIMUM_TAPS);
        assert_eq!(designed.taps.len() % 2, 1);
        assert_relative_eq!(response_at(&designed.taps, 0.0, 2e6), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_lowpass_stopband_attenuation() {
        let designed = design_chain(&lowpass_options(200e3), 2e6, 0.0)
            .unwrap()
            .unwrap();
        // Well past the derived transition band the response must sit below
        // the 60 dB design attenuation (with a little implementation slack).
        let rejection = response_at(&designed.taps, 320e3, 2e6);
        assert!(
            20.0 * rejection.log10() < -55.0,
            "stopband only {} dB down",
            20.0 * rejection.log10()
        );
        // And the passband is flat.
        let passband = response_at(&designed.taps, 100e3, 2e6);
        assert!((20.0 * passband.log10()).abs() < 0.5);
    }

    #[test]
    fn test_highpass_rejects_dc() {
        let options = FilterOptions {
            requests: vec![FilterRequest::highpass(100e3)],
            ..Default::default()
        };
        let designed = design_chain(&options, 2e6, 0.0).unwrap().unwrap();
        assert!(!designed.taps.is_complex());
        let dc = response_at(&designed.taps, 0.0, 2e6);
        assert!(20.0 * dc.log10() < -50.0, "DC leaks: {dc}");
        // Peak-normalized passband.
        let high = response_at(&designed.taps, 600e3, 2e6);
        assert!((20.0 * high.log10()).abs() < 1.0);
    }

    #[test]
    fn test_offset_passband_is_complex_and_one_sided() {
        let options = FilterOptions {
            requests: vec![FilterRequest::passband(50e3, 150e3)],
            ..Default::default()
        };
        let designed = design_chain(&options, 2e6, 0.0).unwrap().unwrap();
        assert!(designed.taps.is_complex());
        assert!(designed.is_asymmetric);
        assert!(designed.fft_block.is_some());

        let wanted = response_at(&designed.taps, 100e3, 2e6);
        let image = response_at(&designed.taps, -100e3, 2e6);
        assert!((20.0 * wanted.log10()).abs() < 1.0);
        assert!(20.0 * image.log10() < -50.0, "image side leaks: {image}");
    }

    #[test]
    fn test_explicit_taps_win_and_round_odd() {
        let options = FilterOptions {
            requests: vec![FilterRequest::lowpass(200e3)],
            num_taps: Some(64),
            ..Default::default()
        };
        let designed = design_chain(&options, 2e6, 0.0).unwrap().unwrap();
        assert_eq!(designed.taps.len(), 65);
    }

    #[test]
    fn test_chain_convolves_lengths() {
        let options = FilterOptions {
            requests: vec![
                FilterRequest::lowpass(300e3),
                FilterRequest::highpass(50e3),
            ],
            num_taps: Some(129),
            ..Default::default()
        };
        let designed = design_chain(&options, 2e6, 0.0).unwrap().unwrap();
        assert_eq!(designed.taps.len(), 129 + 129 - 1);
        // Band between the two cutoffs passes.
        let mid = response_at(&designed.taps, 175e3, 2e6);
        assert!((20.0 * mid.log10()).abs() < 1.0);
    }

    #[test]
    fn test_shift_compensation_recenters_design() {
        // A lowpass specified in the post-shift world, with a -100 kHz NCO
        // shift pending, must pass the band around +100 kHz pre-shift.
        let designed = design_chain(&lowpass_options(50e3), 2e6, -100e3)
            .unwrap()
            .unwrap();
        assert!(designed.taps.is_complex());
        let station = response_at(&designed.taps, 100e3, 2e6);
        let dc = response_at(&designed.taps, 0.0, 2e6);
        assert!((20.0 * station.log10()).abs() < 1.0);
        assert!(20.0 * dc.log10() < -40.0);
    }

    #[test]
    fn test_empty_chain_designs_nothing() {
        assert!(design_chain(&FilterOptions::default(), 2e6, 0.0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_fft_block_policy() {
        assert_eq!(resolve_fft_block(Some(8192), 100).unwrap(), 4096);
        // 65 taps: next power of two over 64 is 64, still <= 65, so doubled.
        assert_eq!(resolve_fft_block(None, 65).unwrap(), 128);
        assert_eq!(resolve_fft_block(None, 21).unwrap(), 32);
        assert!(resolve_fft_block(Some(64), 100).is_err());
    }

    #[test]
    fn test_forced_fir_keeps_time_domain() {
        let options = FilterOptions {
            requests: vec![FilterRequest::passband(50e3, 150e3)],
            implementation: FilterImpl::Fir,
            ..Default::default()
        };
        let designed = design_chain(&options, 2e6, 0.0).unwrap().unwrap();
        assert!(designed.taps.is_complex());
        assert!(designed.fft_block.is_none());
    }

    #[test]
    fn test_degenerate_band_rejected() {
        let options = FilterOptions {
            requests: vec![FilterRequest::lowpass(2e6)],
            ..Default::default()
        };
        assert!(design_chain(&options, 2e6, 0.0).is_err());
    }
}
