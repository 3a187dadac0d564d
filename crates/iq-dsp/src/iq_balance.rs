//! I/Q imbalance correction
//!
//! Three cooperating pieces:
//! - `IqFactors` / `IqFactorsCell` - the published correction pair and its
//!   two-slot atomic-index cell: readers get a consistent pair wait-free,
//!   the single writer mutates only the inactive slot under a lock and then
//!   flips the index.
//! - `apply_correction` - the per-sample corrector used by the hot path.
//! - `IqOptimizer` - a randomized hill climb over a 1024-point spectrum
//!   that rewards image suppression (a clean one-sided signal maximizes the
//!   power difference between each bin and its mirror).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use num_complex::Complex;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::{Fft, FftPlanner};

use iq_core::tunables::{
    IQ_BASE_INCREMENT, IQ_CORRECTION_FFT_SIZE, IQ_CORRECTION_POWER_THRESHOLD_DB,
    IQ_CORRECTION_SMOOTHING_FACTOR, IQ_MAX_PASSES,
};

/// Fraction of the spectrum (centered, excluding DC) the estimator scores.
const SPECTRUM_CENTRAL_FRACTION: f64 = 0.90;

/// One published correction pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IqFactors {
    pub mag_adj: f32,
    pub phase_adj: f32,
}

impl IqFactors {
    fn pack(self) -> u64 {
        ((self.mag_adj.to_bits() as u64) << 32) | self.phase_adj.to_bits() as u64
    }

    fn unpack(bits: u64) -> Self {
        Self {
            mag_adj: f32::from_bits((bits >> 32) as u32),
            phase_adj: f32::from_bits(bits as u32),
        }
    }
}

/// Two-slot cell: an atomic active index over a pair of packed slots.
///
/// Readers load the index and then the slot; because the writer only ever
/// stores to the inactive slot before flipping the index, a reader can
/// never observe a torn pair.
pub struct IqFactorsCell {
    slots: [AtomicU64; 2],
    active: AtomicUsize,
    write_lock: Mutex<()>,
}

impl Default for IqFactorsCell {
    fn default() -> Self {
        Self::new()
    }
}

impl IqFactorsCell {
    pub fn new() -> Self {
        Self {
            slots: [AtomicU64::new(0), AtomicU64::new(0)],
            active: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Wait-free consistent read of the current pair.
    pub fn load(&self) -> IqFactors {
        let index = self.active.load(Ordering::Acquire);
        IqFactors::unpack(self.slots[index].load(Ordering::Acquire))
    }

    /// Publish a new pair: write the inactive slot, then flip the index.
    pub fn publish(&self, factors: IqFactors) {
        let _guard = self.write_lock.lock();
        let inactive = 1 - self.active.load(Ordering::Relaxed);
        self.slots[inactive].store(factors.pack(), Ordering::Release);
        self.active.store(inactive, Ordering::Release);
    }
}

/// Apply a correction pair in place:
/// `re' = re * (1 + mag), im' = im + phase * re`.
pub fn apply_correction(factors: IqFactors, data: &mut [Complex<f32>]) {
    let mag = 1.0 + factors.mag_adj;
    let phase = factors.phase_adj;
    for sample in data.iter_mut() {
        let re = sample.re;
        sample.re = re * mag;
        sample.im += phase * re;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIMIZER
// ═══════════════════════════════════════════════════════════════════════════════

/// Randomized hill-climb estimator for the correction pair.
pub struct IqOptimizer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    work: Vec<Complex<f32>>,
    power: Vec<f32>,
    rng: StdRng,
    /// Current smoothed estimate (what the pipeline applies).
    current: IqFactors,
}

impl IqOptimizer {
    pub fn new() -> Self {
        Self::with_seed(rand::rng().random())
    }

    /// Seeded construction for reproducible tests.
    pub fn with_seed(seed: u64) -> Self {
        let size = IQ_CORRECTION_FFT_SIZE;
        let mut planner = FftPlanner::new();
        let window = (0..size)
            .map(|n| {
                // Hamming window.
                let t = 2.0 * std::f64::consts::PI * n as f64 / (size - 1) as f64;
                (0.54 - 0.46 * t.cos()) as f32
            })
            .collect();
        Self {
            fft: planner.plan_fft_forward(size),
            window,
            work: vec![Complex::new(0.0, 0.0); size],
            power: vec![0.0; size],
            rng: StdRng::seed_from_u64(seed),
            current: IqFactors::default(),
        }
    }

    pub fn current(&self) -> IqFactors {
        self.current
    }

    /// Run one optimization pass over a training block.
    ///
    /// Returns the new smoothed pair to publish, or `None` when the block
    /// lacks the spectral contrast to optimize against (peak power less
    /// than the threshold above average).
    pub fn optimize(&mut self, samples: &[Complex<f32>]) -> Option<IqFactors> {
        if samples.len() < IQ_CORRECTION_FFT_SIZE {
            return None;
        }
        let samples = &samples[..IQ_CORRECTION_FFT_SIZE];

        // Gate on spectral contrast measured with the current correction.
        self.spectrum(self.current, samples);
        let (average_db, peak_db) = self.power_stats();
        if peak_db - average_db < IQ_CORRECTION_POWER_THRESHOLD_DB {
            return None;
        }

        let mut best = self.current;
        let mut best_score = self.score(best, samples);

        for _ in 0..IQ_MAX_PASSES {
            let mag_step = if self.rng.random::<bool>() {
                IQ_BASE_INCREMENT
            } else {
                -IQ_BASE_INCREMENT
            };
            let phase_step = if self.rng.random::<bool>() {
                IQ_BASE_INCREMENT
            } else {
                -IQ_BASE_INCREMENT
            };
            let candidate = IqFactors {
                mag_adj: best.mag_adj + mag_step,
                phase_adj: best.phase_adj + phase_step,
            };
            let candidate_score = self.score(candidate, samples);
            if candidate_score > best_score {
                best = candidate;
                best_score = candidate_score;
            }
        }

        let alpha = IQ_CORRECTION_SMOOTHING_FACTOR;
        self.current = IqFactors {
            mag_adj: (1.0 - alpha) * self.current.mag_adj + alpha * best.mag_adj,
            phase_adj: (1.0 - alpha) * self.current.phase_adj + alpha * best.phase_adj,
        };
        Some(self.current)
    }

    /// FFT-shifted power spectrum of the corrected, windowed block.
    fn spectrum(&mut self, factors: IqFactors, samples: &[Complex<f32>]) {
        let size = IQ_CORRECTION_FFT_SIZE;
        self.work.copy_from_slice(samples);
        apply_correction(factors, &mut self.work);
        for (sample, &w) in self.work.iter_mut().zip(self.window.iter()) {
            *sample *= w;
        }
        self.fft.process(&mut self.work);
        // In-place FFT shift so negative frequencies sit left of center.
        for k in 0..size {
            self.power[k] = self.work[(k + size / 2) % size].norm_sqr();
        }
    }

    /// Average and peak power over the central band, in dB.
    fn power_stats(&self) -> (f64, f64) {
        let size = IQ_CORRECTION_FFT_SIZE;
        let center = size / 2;
        let span = ((size as f64 * SPECTRUM_CENTRAL_FRACTION) / 2.0) as usize;

        let mut sum = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut count = 0usize;
        for k in 1..=span {
            for bin in [self.power[center + k] as f64, self.power[center - k] as f64] {
                sum += bin;
                peak = peak.max(bin);
                count += 1;
            }
        }
        let average = sum / count.max(1) as f64;
        (
            10.0 * (average + 1e-20).log10(),
            10.0 * (peak + 1e-20).log10(),
        )
    }

    /// Image-suppression score: sum of squared power differences between
    /// mirrored bins across the central band.
    fn score(&mut self, factors: IqFactors, samples: &[Complex<f32>]) -> f64 {
        self.spectrum(factors, samples);
        let size = IQ_CORRECTION_FFT_SIZE;
        let center = size / 2;
        let span = ((size as f64 * SPECTRUM_CENTRAL_FRACTION) / 2.0) as usize;

        let mut score = 0.0_f64;
        for k in 1..=span {
            let diff = self.power[center + k] as f64 - self.power[center - k] as f64;
            score += diff * diff;
        }
        score
    }
}

impl Default for IqOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_round_trip() {
        let cell = IqFactorsCell::new();
        assert_eq!(cell.load(), IqFactors::default());

        let factors = IqFactors {
            mag_adj: 0.011,
            phase_adj: -0.003,
        };
        cell.publish(factors);
        assert_eq!(cell.load(), factors);

        // A second publish lands in the other slot.
        let newer = IqFactors {
            mag_adj: -0.5,
            phase_adj: 0.25,
        };
        cell.publish(newer);
        assert_eq!(cell.load(), newer);
    }

    #[test]
    fn test_correction_formula() {
        let factors = IqFactors {
            mag_adj: 0.1,
            phase_adj: 0.02,
        };
        let mut data = [Complex::new(0.5_f32, 0.25)];
        apply_correction(factors, &mut data);
        assert!((data[0].re - 0.55).abs() < 1e-6);
        assert!((data[0].im - (0.25 + 0.02 * 0.5)).abs() < 1e-6);
    }

    /// A tone with deliberate gain/phase skew between rails.
    fn imbalanced_tone(mag_err: f32, phase_err: f32, n: usize) -> Vec<Complex<f32>> {
        (0..n)
            .map(|i| {
                let theta = 2.0 * std::f64::consts::PI * 0.11 * i as f64;
                let re = theta.cos() as f32 * (1.0 + mag_err);
                let im = theta.sin() as f32 + phase_err * theta.cos() as f32;
                Complex::new(re, im)
            })
            .collect()
    }

    #[test]
    fn test_optimizer_improves_image_suppression() {
        let samples = imbalanced_tone(-0.02, 0.015, IQ_CORRECTION_FFT_SIZE);
        let mut optimizer = IqOptimizer::with_seed(7);

        let initial = optimizer.score(IqFactors::default(), &samples);
        // Many passes stand in for the 500 ms cadence of the live worker.
        for _ in 0..200 {
            optimizer.optimize(&samples);
        }
        let tuned = optimizer.score(optimizer.current(), &samples);
        assert!(
            tuned > initial,
            "score did not improve: {initial} -> {tuned}"
        );
        // The drift direction must oppose the injected error.
        assert!(optimizer.current().mag_adj > 0.0);
        assert!(optimizer.current().phase_adj < 0.0);
    }

    #[test]
    fn test_optimizer_skips_flat_noise() {
        // Pseudo-noise has no dominant tone, so contrast stays under 20 dB.
        let mut state = 0x1234_5678_u64;
        let samples: Vec<Complex<f32>> = (0..IQ_CORRECTION_FFT_SIZE)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                let a = ((state >> 33) as f32 / (1u64 << 31) as f32) - 1.0;
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                let b = ((state >> 33) as f32 / (1u64 << 31) as f32) - 1.0;
                Complex::new(a, b)
            })
            .collect();

        let mut optimizer = IqOptimizer::with_seed(3);
        assert!(optimizer.optimize(&samples).is_none());
        assert_eq!(optimizer.current(), IqFactors::default());
    }

    #[test]
    fn test_optimizer_requires_full_block() {
        let mut optimizer = IqOptimizer::with_seed(1);
        let short = vec![Complex::new(1.0_f32, 0.0); IQ_CORRECTION_FFT_SIZE - 1];
        assert!(optimizer.optimize(&short).is_none());
    }

    #[test]
    fn test_smoothing_limits_step_size() {
        let samples = imbalanced_tone(-0.05, 0.0, IQ_CORRECTION_FFT_SIZE);
        let mut optimizer = IqOptimizer::with_seed(11);
        if let Some(published) = optimizer.optimize(&samples) {
            // One pass moves at most alpha * passes * increment per axis.
            let bound = IQ_CORRECTION_SMOOTHING_FACTOR
                * IQ_MAX_PASSES as f32
                * IQ_BASE_INCREMENT
                + 1e-9;
            assert!(published.mag_adj.abs() <= bound);
            assert!(published.phase_adj.abs() <= bound);
        }
    }
}
