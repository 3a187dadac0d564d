//! Rational sample-rate conversion
//!
//! Wraps a polyphase sinc resampler with the plumbing a complex stream
//! needs: the I and Q rails ride as two planar channels, and an input FIFO
//! absorbs the difference between chunk sizes and the converter's fixed
//! block, so a short chunk never gets zero-padded mid-stream. Output is
//! produced in whole converter blocks; the remainder carries over.

use num_complex::Complex;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use iq_core::tunables::RESAMPLER_BLOCK_FRAMES;

use crate::error::{DspError, DspResult};

/// Sinc kernel length; with the Blackman-Harris window this comfortably
/// clears the 60 dB stopband baseline.
const SINC_LEN: usize = 128;
/// Kernel oversampling for the interpolation table.
const OVERSAMPLING_FACTOR: usize = 256;

/// Streaming rational rate converter for complex samples.
pub struct RateConverter {
    inner: SincFixedIn<f32>,
    ratio: f64,
    /// Accumulated input rails awaiting a whole converter block.
    fifo: [Vec<f32>; 2],
    /// Planar output scratch for one converter call.
    out_planes: [Vec<f32>; 2],
}

impl RateConverter {
    pub fn new(input_rate: f64, output_rate: f64) -> DspResult<Self> {
        let ratio = output_rate / input_rate;
        let params = SincInterpolationParameters {
            sinc_len: SINC_LEN,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: OVERSAMPLING_FACTOR,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(ratio, 1.1, params, RESAMPLER_BLOCK_FRAMES, 2)?;
        let max_out = inner.output_frames_max();
        Ok(Self {
            inner,
            ratio,
            fifo: [Vec::new(), Vec::new()],
            out_planes: [vec![0.0; max_out], vec![0.0; max_out]],
        })
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Upper bound on frames one `process` call can emit for `input_len`
    /// input frames. The FIFO can hold almost a whole block, hence the
    /// extra block in the numerator.
    pub fn max_output_frames(&self, input_len: usize) -> usize {
        let worst_input = input_len + RESAMPLER_BLOCK_FRAMES;
        (worst_input as f64 * self.ratio).ceil() as usize + RESAMPLER_BLOCK_FRAMES
    }

    /// Convert a block. Returns the number of output frames written.
    pub fn process(
        &mut self,
        input: &[Complex<f32>],
        output: &mut [Complex<f32>],
    ) -> DspResult<usize> {
        for sample in input {
            self.fifo[0].push(sample.re);
            self.fifo[1].push(sample.im);
        }

        let mut written = 0usize;
        loop {
            let needed = self.inner.input_frames_next();
            if self.fifo[0].len() < needed {
                break;
            }

            let input_planes = [&self.fifo[0][..needed], &self.fifo[1][..needed]];
            let (consumed, produced) = self
                .inner
                .process_into_buffer(&input_planes, &mut self.out_planes, None)?;

            written = self.interleave(produced, output, written)?;
            self.fifo[0].drain(..consumed);
            self.fifo[1].drain(..consumed);
        }
        Ok(written)
    }

    /// Flush whatever the FIFO still holds at end of stream. Returns the
    /// number of output frames written.
    pub fn flush(&mut self, output: &mut [Complex<f32>]) -> DspResult<usize> {
        if self.fifo[0].is_empty() {
            return Ok(0);
        }
        let input_planes = [&self.fifo[0][..], &self.fifo[1][..]];
        let (_, produced) = self.inner.process_partial_into_buffer(
            Some(&input_planes[..]),
            &mut self.out_planes,
            None,
        )?;
        self.fifo[0].clear();
        self.fifo[1].clear();
        self.interleave(produced, output, 0)
    }

    /// Drop FIFO contents and internal converter history.
    pub fn reset(&mut self) {
        self.fifo[0].clear();
        self.fifo[1].clear();
        self.inner.reset();
    }

    fn interleave(
        &self,
        produced: usize,
        output: &mut [Complex<f32>],
        offset: usize,
    ) -> DspResult<usize> {
        let end = offset + produced;
        if end > output.len() {
            return Err(DspError::OutputTooSmall {
                needed: end,
                available: output.len(),
            });
        }
        for (i, slot) in output[offset..end].iter_mut().enumerate() {
            slot.re = self.out_planes[0][i];
            slot.im = self.out_planes[1][i];
        }
        Ok(end)
    }
}
