//! Resampler stage
//!
//! Fixed-ratio rate conversion between the pre- and post-resample worlds.
//! The stage only exists when the ratio differs from one; at unity the
//! orchestrator splices its queues together instead. On the terminal
//! token, the converter tail is flushed into one final data chunk so the
//! stream does not lose its last block.

use std::sync::Arc;

use iq_dsp::RateConverter;

use crate::context::PipelineContext;
use crate::queue::{ChunkQueue, FreeChunkPool};

pub struct ResamplerStage {
    ctx: Arc<PipelineContext>,
    in_queue: Arc<ChunkQueue>,
    out_queue: Arc<ChunkQueue>,
    pool: Arc<FreeChunkPool>,
    converter: RateConverter,
}

impl ResamplerStage {
    pub fn new(
        ctx: Arc<PipelineContext>,
        in_queue: Arc<ChunkQueue>,
        out_queue: Arc<ChunkQueue>,
        pool: Arc<FreeChunkPool>,
        converter: RateConverter,
    ) -> Self {
        Self {
            ctx,
            in_queue,
            out_queue,
            pool,
            converter,
        }
    }

    pub fn run(mut self) {
        log::debug!(
            "resampler: started (ratio {:.6})",
            self.converter.ratio()
        );

        while let Some(mut chunk) = self.in_queue.dequeue() {
            if chunk.is_last {
                self.flush_tail();
                self.forward(chunk);
                break;
            }

            if chunk.discontinuity {
                self.converter.reset();
                if !self.forward(chunk) {
                    break;
                }
                continue;
            }

            let frames = chunk.frames_read;
            let result = {
                let iq_core::chunk::Chunk {
                    pre_resample,
                    resampled,
                    ..
                } = &mut *chunk;
                self.converter.process(&pre_resample[..frames], resampled)
            };
            let produced = match result {
                Ok(n) => n,
                Err(e) => {
                    self.ctx
                        .fatal_error("resampler", &format!("conversion failed: {e}"));
                    self.pool.release(chunk);
                    return;
                }
            };

            if produced == 0 {
                // Whole input absorbed into the converter FIFO.
                self.pool.release(chunk);
                continue;
            }
            chunk.frames_to_write = produced;
            if !self.forward(chunk) {
                break;
            }
        }
        log::debug!("resampler: exited");
    }

    /// Emit the converter's remaining tail as one last data chunk, keeping
    /// the terminal token free of samples.
    fn flush_tail(&mut self) {
        let Some(mut tail_chunk) = self.pool.try_acquire() else {
            return;
        };
        match self.converter.flush(&mut tail_chunk.resampled) {
            Ok(0) => self.pool.release(tail_chunk),
            Ok(produced) => {
                tail_chunk.frames_to_write = produced;
                if let Err(returned) = self.out_queue.enqueue(tail_chunk) {
                    self.pool.release(returned);
                }
            }
            Err(e) => {
                log::debug!("resampler: tail flush failed: {e}");
                self.pool.release(tail_chunk);
            }
        }
    }

    fn forward(&self, chunk: Box<iq_core::chunk::Chunk>) -> bool {
        match self.out_queue.enqueue(chunk) {
            Ok(()) => true,
            Err(chunk) => {
                self.pool.release(chunk);
                false
            }
        }
    }
}
