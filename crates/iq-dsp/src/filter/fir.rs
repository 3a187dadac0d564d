//! Time-domain FIR engine
//!
//! Direct convolution with a persistent history tail so block boundaries
//! are seamless. Real and complex tap sets share the streaming machinery;
//! the inner product is specialized per tap type.

use num_complex::Complex;

use super::design::FilterTaps;

/// Streaming FIR filter. Produces exactly one output per input sample.
pub struct FirFilter {
    taps: FilterTaps,
    /// Last `taps.len() - 1` input samples.
    history: Vec<Complex<f32>>,
    /// history + current block, reused across calls.
    extended: Vec<Complex<f32>>,
    /// Output scratch, reused across calls.
    output: Vec<Complex<f32>>,
}

impl FirFilter {
    pub fn new(taps: FilterTaps) -> Self {
        let overlap = taps.len().saturating_sub(1);
        Self {
            taps,
            history: vec![Complex::new(0.0, 0.0); overlap],
            extended: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Filter a block. The returned slice is valid until the next call.
    pub fn filter(&mut self, input: &[Complex<f32>]) -> &[Complex<f32>] {
        let overlap = self.history.len();

        self.extended.clear();
        self.extended.extend_from_slice(&self.history);
        self.extended.extend_from_slice(input);

        self.output.clear();
        self.output.resize(input.len(), Complex::new(0.0, 0.0));

        match &self.taps {
            FilterTaps::Real(taps) => {
                for (n, out) in self.output.iter_mut().enumerate() {
                    let mut acc = Complex::new(0.0_f32, 0.0);
                    // extended[n + overlap - k] walks the newest sample back
                    // through the history for each tap.
                    for (k, &h) in taps.iter().enumerate() {
                        acc += self.extended[n + overlap - k] * h;
                    }
                    *out = acc;
                }
            }
            FilterTaps::Complex(taps) => {
                for (n, out) in self.output.iter_mut().enumerate() {
                    let mut acc = Complex::new(0.0_f32, 0.0);
                    for (k, &h) in taps.iter().enumerate() {
                        acc += self.extended[n + overlap - k] * h;
                    }
                    *out = acc;
                }
            }
        }

        if overlap > 0 {
            let start = self.extended.len() - overlap;
            self.history.copy_from_slice(&self.extended[start..]);
        }

        &self.output
    }

    pub fn reset(&mut self) {
        self.history.fill(Complex::new(0.0, 0.0));
    }
}
