//! FFT overlap-save engine
//!
//! Block convolution for long or complex tap sets. Each pass transforms
//! `[previous block | new block]`, multiplies by the precomputed tap
//! spectrum, and keeps the second half of the inverse transform - the
//! region free of circular-wrap contamination because the block size never
//! goes below the tap count. Input that does not fill a whole block waits
//! in a remainder buffer for the next call.

use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::design::FilterTaps;

/// Streaming overlap-save filter. Emits whole blocks only.
pub struct FftFilter {
    block: usize,
    fft_len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    /// FFT of the zero-padded taps.
    taps_spectrum: Vec<Complex<f32>>,
    /// Previous input block (the saved overlap).
    tail: Vec<Complex<f32>>,
    /// Input carried over until a whole block accumulates.
    remainder: Vec<Complex<f32>>,
    /// Transform workspace.
    frame: Vec<Complex<f32>>,
    /// Output of the current call.
    output: Vec<Complex<f32>>,
}

impl FftFilter {
    /// Build the engine for a tap set and block size. The block must be at
    /// least the tap count; the design layer guarantees that.
    pub fn new(taps: &FilterTaps, block: usize) -> Self {
        debug_assert!(block >= taps.len());
        let fft_len = block * 2;
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_len);
        let inverse = planner.plan_fft_inverse(fft_len);

        let mut taps_spectrum = vec![Complex::new(0.0, 0.0); fft_len];
        for (slot, tap) in taps_spectrum.iter_mut().zip(taps.to_complex()) {
            *slot = tap;
        }
        forward.process(&mut taps_spectrum);

        Self {
            block,
            fft_len,
            forward,
            inverse,
            taps_spectrum,
            tail: vec![Complex::new(0.0, 0.0); block],
            remainder: Vec::with_capacity(block),
            frame: vec![Complex::new(0.0, 0.0); fft_len],
            output: Vec::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block
    }

    /// Filter a block. Returns every whole processing block the combined
    /// remainder-plus-input covers; the rest waits for the next call.
    pub fn filter(&mut self, input: &[Complex<f32>]) -> &[Complex<f32>] {
        self.output.clear();

        let total = self.remainder.len() + input.len();
        let whole_blocks = total / self.block;

        if whole_blocks == 0 {
            self.remainder.extend_from_slice(input);
            return &self.output;
        }

        // Stitch remainder and input into per-block views without one big
        // intermediate copy: consume remainder first, then input.
        let mut consumed_input = 0;
        let scale = 1.0 / self.fft_len as f32;
        for _ in 0..whole_blocks {
            // frame = [tail | next block]
            self.frame[..self.block].copy_from_slice(&self.tail);

            let from_remainder = self.remainder.len().min(self.block);
            self.frame[self.block..self.block + from_remainder]
                .copy_from_slice(&self.remainder[..from_remainder]);
            let from_input = self.block - from_remainder;
            self.frame[self.block + from_remainder..]
                .copy_from_slice(&input[consumed_input..consumed_input + from_input]);

            self.remainder.drain(..from_remainder);
            consumed_input += from_input;

            // Save this block as the next overlap before transforming.
            self.tail.copy_from_slice(&self.frame[self.block..]);

            self.forward.process(&mut self.frame);
            for (bin, h) in self.frame.iter_mut().zip(self.taps_spectrum.iter()) {
                *bin *= h;
            }
            self.inverse.process(&mut self.frame);

            self.output
                .extend(self.frame[self.block..].iter().map(|s| s * scale));
        }

        self.remainder.extend_from_slice(&input[consumed_input..]);
        &self.output
    }

    /// Most samples one call can return for a given input length.
    pub fn max_output_len(&self, input_len: usize) -> usize {
        ((self.block - 1) + input_len) / self.block * self.block
    }

    pub fn reset(&mut self) {
        self.tail.fill(Complex::new(0.0, 0.0));
        self.remainder.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::fir::FirFilter;
    use approx::assert_relative_eq;

    fn noise(n: usize) -> Vec<Complex<f32>> {
        // Deterministic pseudo-noise keeps the comparison reproducible.
        let mut state = 0x2545_f491_u64;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let a = ((state >> 33) as f32 / (1u64 << 31) as f32) - 1.0;
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let b = ((state >> 33) as f32 / (1u64 << 31) as f32) - 1.0;
                Complex::new(a, b)
            })
            .collect()
    }

    fn real_taps() -> Vec<f32> {
        (0..21)
            .map(|i| {
                let t = (i as f32 - 10.0) / 10.0;
                (1.0 - t * t) * 0.1
            })
            .collect()
    }

    #[test]
    fn test_matches_time_domain_fir() {
        let taps = real_taps();
        let input = noise(1000);

        let mut fir = FirFilter::new(FilterTaps::Real(taps.clone()));
        let expected = fir.filter(&input).to_vec();

        let mut ols = FftFilter::new(&FilterTaps::Real(taps), 64);
        let mut got: Vec<Complex<f32>> = Vec::new();
        for piece in input.chunks(173) {
            got.extend_from_slice(ols.filter(piece));
        }

        // The engine holds back the final partial block.
        assert_eq!(got.len(), input.len() / 64 * 64);
        for (a, b) in expected.iter().zip(got.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-4);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_complex_taps_match_fir() {
        let taps: Vec<Complex<f32>> = (0..33)
            .map(|i| Complex::from_polar(0.05, i as f32 * 0.21))
            .collect();
        let input = noise(512);

        let mut fir = FirFilter::new(FilterTaps::Complex(taps.clone()));
        let expected = fir.filter(&input).to_vec();

        let mut ols = FftFilter::new(&FilterTaps::Complex(taps), 64);
        let got = ols.filter(&input).to_vec();

        assert_eq!(got.len(), 512);
        for (a, b) in expected.iter().zip(got.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-4);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_small_inputs_accumulate() {
        let taps = real_taps();
        let mut ols = FftFilter::new(&FilterTaps::Real(taps), 64);

        // 40 + 40 samples: first call yields nothing, second yields a block.
        let input = noise(80);
        assert!(ols.filter(&input[..40]).is_empty());
        let out = ols.filter(&input[40..]).to_vec();
        assert_eq!(out.len(), 64);
    }

    #[test]
    fn test_reset_clears_carryover() {
        let taps = real_taps();
        let input = noise(100);

        let mut ols = FftFilter::new(&FilterTaps::Real(taps.clone()), 64);
        ols.filter(&input);
        ols.reset();

        // After reset, behavior is identical to a fresh engine.
        let mut fresh = FftFilter::new(&FilterTaps::Real(taps), 64);
        let a = ols.filter(&input).to_vec();
        let b = fresh.filter(&input).to_vec();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-6);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_max_output_len_bound() {
        let ols = FftFilter::new(&FilterTaps::Real(real_taps()), 64);
        assert_eq!(ols.max_output_len(64), 64);
        assert_eq!(ols.max_output_len(65), 128);
        assert_eq!(ols.max_output_len(1), 64);
    }
}
