//! Filter design and application
//!
//! A side's 0..5 user requests each become a windowed-sinc tap set; the
//! sets are convolved into one master array, normalized, and handed to
//! either the time-domain FIR engine or the FFT overlap-save engine.

mod design;
mod fir;
mod overlap_save;

pub use design::{design_chain, response_at, DesignedFilter, FilterTaps};
pub use fir::FirFilter;
pub use overlap_save::FftFilter;

use num_complex::Complex;

/// A constructed filter ready to stream samples.
pub enum FilterEngine {
    Fir(FirFilter),
    Fft(FftFilter),
}

impl FilterEngine {
    pub fn new(designed: &DesignedFilter) -> Self {
        match designed.fft_block {
            Some(block) => FilterEngine::Fft(FftFilter::new(&designed.taps, block)),
            None => FilterEngine::Fir(FirFilter::new(designed.taps.clone())),
        }
    }

    /// Filter a block, returning the produced samples.
    ///
    /// The FIR engine returns exactly `input.len()` samples; the FFT engine
    /// returns whole blocks and carries the remainder to the next call.
    pub fn filter(&mut self, input: &[Complex<f32>]) -> &[Complex<f32>] {
        match self {
            FilterEngine::Fir(f) => f.filter(input),
            FilterEngine::Fft(f) => f.filter(input),
        }
    }

    /// Clear all streaming state (history, remainder, saved overlap).
    pub fn reset(&mut self) {
        match self {
            FilterEngine::Fir(f) => f.reset(),
            FilterEngine::Fft(f) => f.reset(),
        }
    }

    /// Most samples one `filter` call can return for a given input length.
    pub fn max_output_len(&self, input_len: usize) -> usize {
        match self {
            FilterEngine::Fir(_) => input_len,
            FilterEngine::Fft(f) => f.max_output_len(input_len),
        }
    }
}
