//! Numerically-controlled oscillator
//!
//! A persistent complex exponential used for frequency shifting. The
//! rotator form (one complex multiply per sample) drifts in magnitude, so
//! the phasor is renormalized on a fixed cadence; accumulation runs in f64
//! and only the per-sample product touches f32.

use num_complex::Complex;

/// Samples between phasor renormalizations.
const RENORM_INTERVAL: usize = 512;

/// Persistent complex oscillator at a fixed frequency.
pub struct Nco {
    /// Per-sample rotation.
    step: Complex<f64>,
    /// Current phasor.
    phasor: Complex<f64>,
    /// Samples since the last renormalization.
    since_renorm: usize,
}

impl Nco {
    /// Oscillator producing `e^{j 2 pi shift_hz / sample_rate * n}`.
    pub fn new(shift_hz: f64, sample_rate: f64) -> Self {
        let theta = 2.0 * std::f64::consts::PI * shift_hz / sample_rate;
        Self {
            step: Complex::from_polar(1.0, theta),
            phasor: Complex::new(1.0, 0.0),
            since_renorm: 0,
        }
    }

    /// Multiply the block by the oscillator in place, advancing the phase.
    pub fn mix(&mut self, data: &mut [Complex<f32>]) {
        for sample in data.iter_mut() {
            let rot = Complex::new(self.phasor.re as f32, self.phasor.im as f32);
            *sample *= rot;

            self.phasor *= self.step;
            self.since_renorm += 1;
            if self.since_renorm >= RENORM_INTERVAL {
                let norm = self.phasor.norm();
                if norm > 0.0 {
                    self.phasor /= norm;
                }
                self.since_renorm = 0;
            }
        }
    }

    /// Reset the phase to zero. The frequency is untouched; a stream
    /// discontinuity restarts the exponential, it does not retune it.
    pub fn reset_phase(&mut self) {
        self.phasor = Complex::new(1.0, 0.0);
        self.since_renorm = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tone(freq_hz: f64, rate: f64, n: usize) -> Vec<Complex<f32>> {
        (0..n)
            .map(|i| {
                let theta = 2.0 * std::f64::consts::PI * freq_hz * i as f64 / rate;
                Complex::new(theta.cos() as f32, theta.sin() as f32)
            })
            .collect()
    }

    #[test]
    fn test_shift_moves_tone_to_dc() {
        let rate = 1_000_000.0;
        let mut samples = tone(100_000.0, rate, 4096);
        let mut nco = Nco::new(-100_000.0, rate);
        nco.mix(&mut samples);

        for sample in &samples {
            assert_relative_eq!(sample.re, 1.0, epsilon = 1e-3);
            assert_relative_eq!(sample.im, 0.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_phase_continuous_across_blocks() {
        let rate = 48_000.0;
        let n = 1024;
        let mut whole = tone(1000.0, rate, n);
        let mut split = tone(1000.0, rate, n);

        let mut nco_a = Nco::new(-1000.0, rate);
        nco_a.mix(&mut whole);

        let mut nco_b = Nco::new(-1000.0, rate);
        let (head, tail) = split.split_at_mut(n / 3);
        nco_b.mix(head);
        nco_b.mix(tail);

        for (a, b) in whole.iter().zip(split.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-6);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_reset_restarts_phase() {
        let rate = 48_000.0;
        let mut nco = Nco::new(1234.0, rate);
        let mut first = vec![Complex::new(1.0_f32, 0.0); 100];
        nco.mix(&mut first);

        nco.reset_phase();
        let mut second = vec![Complex::new(1.0_f32, 0.0); 100];
        nco.mix(&mut second);

        for (a, b) in first.iter().zip(second.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-6);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_magnitude_stays_unit_over_long_runs() {
        let rate = 2_000_000.0;
        let mut nco = Nco::new(777_777.0, rate);
        let mut block = vec![Complex::new(1.0_f32, 0.0); 1 << 16];
        nco.mix(&mut block);
        let last = block.last().unwrap();
        assert_relative_eq!(last.norm(), 1.0, epsilon = 1e-4);
    }
}
