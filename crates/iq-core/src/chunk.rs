//! Pipeline work unit
//!
//! A `Chunk` owns every buffer a sample block needs on its trip from raw
//! source bytes to final output bytes. All capacities are fixed when the
//! pool is built; stages only ever move data between the buffers they own
//! for the moment.

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::formats::SampleFormat;

/// Buffer capacities shared by every chunk in a pool.
///
/// The orchestrator computes these once, after filter design and resampler
/// construction, so block-carryover from the FFT filter engines and the
/// rate converter always fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkCapacities {
    /// Complex frames per source read.
    pub base_samples: usize,
    /// `base_samples * max_input_bytes_per_sample_pair`.
    pub raw_input_bytes: usize,
    /// `base_samples` plus pre-filter block headroom.
    pub pre_resample_frames: usize,
    /// Post-resample frame capacity including safety margin and post-filter
    /// block headroom.
    pub resampled_frames: usize,
    /// `resampled_frames * max_output_bytes_per_sample_pair`.
    pub final_output_bytes: usize,
}

impl ChunkCapacities {
    /// Capacity set for a unity-ratio pipeline with no filter headroom.
    /// Primarily for tests; the orchestrator derives real values.
    pub fn identity(base_samples: usize, in_pair: usize, out_pair: usize) -> Self {
        Self {
            base_samples,
            raw_input_bytes: base_samples * in_pair,
            pre_resample_frames: base_samples,
            resampled_frames: base_samples,
            final_output_bytes: base_samples * out_pair,
        }
    }
}

/// The unit of work flowing through the pipeline.
///
/// Exactly one stage or queue references a chunk at any instant. The
/// terminal chunk (`is_last`) carries no frames and is the final message on
/// its queue; a discontinuity chunk carries no samples either and exists
/// only to flush downstream state.
pub struct Chunk {
    /// Source bytes as delivered by the driver or file.
    pub raw_input: Vec<u8>,
    /// Converted complex frames before rate conversion.
    pub pre_resample: Vec<Complex<f32>>,
    /// Complex frames after rate conversion.
    pub resampled: Vec<Complex<f32>>,
    /// Stage-local workspace (same capacity as `resampled`).
    pub scratch: Vec<Complex<f32>>,
    /// Complex frames after post-resample processing.
    pub post_resample: Vec<Complex<f32>>,
    /// Output bytes in the destination format.
    pub final_output: Vec<u8>,

    /// Valid frames in `raw_input` / `pre_resample`.
    pub frames_read: usize,
    /// Valid frames in `resampled` / `post_resample`.
    pub frames_to_write: usize,
    /// Valid bytes in `final_output`.
    pub final_output_len: usize,
    /// Format of the bytes actually present in `raw_input`; adaptive
    /// drivers may change it between chunks.
    pub packet_format: SampleFormat,
    /// Terminal marker: no frames, final message on its queue.
    pub is_last: bool,
    /// Control token marking a stream discontinuity; carries no samples.
    pub discontinuity: bool,
}

impl Chunk {
    /// Allocate a chunk with the pool's shared capacities. Buffers are
    /// zero-filled so length always equals capacity and stages index freely.
    pub fn allocate(caps: &ChunkCapacities, initial_format: SampleFormat) -> Self {
        Self {
            raw_input: vec![0u8; caps.raw_input_bytes],
            pre_resample: vec![Complex::new(0.0, 0.0); caps.pre_resample_frames],
            resampled: vec![Complex::new(0.0, 0.0); caps.resampled_frames],
            scratch: vec![Complex::new(0.0, 0.0); caps.resampled_frames],
            post_resample: vec![Complex::new(0.0, 0.0); caps.resampled_frames],
            final_output: vec![0u8; caps.final_output_bytes],
            frames_read: 0,
            frames_to_write: 0,
            final_output_len: 0,
            packet_format: initial_format,
            is_last: false,
            discontinuity: false,
        }
    }

    /// Clear the metadata so a recycled chunk reads as empty. Buffer
    /// contents are left alone; stages overwrite what they use.
    pub fn reset(&mut self) {
        self.frames_read = 0;
        self.frames_to_write = 0;
        self.final_output_len = 0;
        self.is_last = false;
        self.discontinuity = false;
    }

    /// Turn this chunk into the terminal marker.
    pub fn mark_last(&mut self) {
        self.reset();
        self.is_last = true;
    }

    /// Turn this chunk into a discontinuity token.
    pub fn mark_discontinuity(&mut self) {
        self.reset();
        self.discontinuity = true;
    }

    /// True for data chunks (as opposed to control tokens).
    pub fn is_data(&self) -> bool {
        !self.is_last && !self.discontinuity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_sizes_buffers() {
        let caps = ChunkCapacities {
            base_samples: 64,
            raw_input_bytes: 64 * 8,
            pre_resample_frames: 64,
            resampled_frames: 96,
            final_output_bytes: 96 * 8,
        };
        let chunk = Chunk::allocate(&caps, SampleFormat::Cf32);
        assert_eq!(chunk.raw_input.len(), 512);
        assert_eq!(chunk.pre_resample.len(), 64);
        assert_eq!(chunk.resampled.len(), 96);
        assert_eq!(chunk.scratch.len(), 96);
        assert_eq!(chunk.post_resample.len(), 96);
        assert_eq!(chunk.final_output.len(), 768);
        assert!(chunk.is_data());
    }

    #[test]
    fn test_control_tokens_carry_no_frames() {
        let caps = ChunkCapacities::identity(16, 8, 8);
        let mut chunk = Chunk::allocate(&caps, SampleFormat::Cf32);
        chunk.frames_read = 16;

        chunk.mark_discontinuity();
        assert!(chunk.discontinuity);
        assert_eq!(chunk.frames_read, 0);
        assert!(!chunk.is_data());

        chunk.mark_last();
        assert!(chunk.is_last);
        assert!(!chunk.discontinuity);
        assert_eq!(chunk.frames_read, 0);
    }
}
