//! DC-blocking highpass
//!
//! The one fixed IIR in the pipeline: a single-pole highpass with a 10 Hz
//! cutoff designed against the input rate, applied independently to the I
//! and Q rails. State persists across chunks and is cleared on a stream
//! discontinuity.

use num_complex::Complex;

/// Single-pole DC blocker: `y[n] = x[n] - x[n-1] + r * y[n-1]`.
pub struct DcBlocker {
    r: f32,
    prev_input: Complex<f32>,
    prev_output: Complex<f32>,
}

impl DcBlocker {
    pub fn new(cutoff_hz: f64, sample_rate: f64) -> Self {
        // Pole placement for a first-order highpass at the given cutoff.
        let r = 1.0 - 2.0 * std::f64::consts::PI * cutoff_hz / sample_rate;
        Self {
            r: r.clamp(0.0, 1.0) as f32,
            prev_input: Complex::new(0.0, 0.0),
            prev_output: Complex::new(0.0, 0.0),
        }
    }

    pub fn process(&mut self, data: &mut [Complex<f32>]) {
        let r = self.r;
        let mut x1 = self.prev_input;
        let mut y1 = self.prev_output;
        for sample in data.iter_mut() {
            let x = *sample;
            let y = x - x1 + y1 * r;
            *sample = y;
            x1 = x;
            y1 = y;
        }
        self.prev_input = x1;
        self.prev_output = y1;
    }

    pub fn reset(&mut self) {
        self.prev_input = Complex::new(0.0, 0.0);
        self.prev_output = Complex::new(0.0, 0.0);
    }
}
