//! PreProcessor stage
//!
//! Raw bytes become complex floats here, followed by the input-rate DSP:
//! DC block, I/Q correction, the pre-resample filter, and the pre-resample
//! frequency shift. The filter runs before the shift so its band edges,
//! designed with shift compensation, read in the post-shift spectrum.
//!
//! When I/Q correction is live, the first estimator-FFT's worth of
//! uncorrected samples is copied to a spare chunk for the optimizer -
//! best-effort, dropped silently when the pool is dry.

use std::sync::Arc;

use iq_core::chunk::Chunk;
use iq_core::formats::bytes_to_complex;
use iq_core::tunables::IQ_CORRECTION_FFT_SIZE;
use iq_dsp::filter::FilterEngine;
use iq_dsp::iq_balance::apply_correction;
use iq_dsp::{DcBlocker, Nco};

use crate::context::PipelineContext;
use crate::queue::{ChunkQueue, FreeChunkPool};
use crate::thread_priority::{set_current_thread_priority, StagePriority};

pub struct PreProcStage {
    ctx: Arc<PipelineContext>,
    in_queue: Arc<ChunkQueue>,
    out_queue: Arc<ChunkQueue>,
    pool: Arc<FreeChunkPool>,
    optimizer_queue: Option<Arc<ChunkQueue>>,
    dc: Option<DcBlocker>,
    nco: Option<Nco>,
    filter: Option<FilterEngine>,
    iq_enabled: bool,
}

impl PreProcStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<PipelineContext>,
        in_queue: Arc<ChunkQueue>,
        out_queue: Arc<ChunkQueue>,
        pool: Arc<FreeChunkPool>,
        optimizer_queue: Option<Arc<ChunkQueue>>,
        dc: Option<DcBlocker>,
        nco: Option<Nco>,
        filter: Option<FilterEngine>,
    ) -> Self {
        let iq_enabled = ctx.config.iq_correction;
        Self {
            ctx,
            in_queue,
            out_queue,
            pool,
            optimizer_queue,
            dc,
            nco,
            filter,
            iq_enabled,
        }
    }

    pub fn run(mut self) {
        set_current_thread_priority(StagePriority::AboveNormal, "preproc");
        log::debug!("preproc: started");

        while let Some(mut chunk) = self.in_queue.dequeue() {
            if chunk.is_last {
                // The optimizer sees end-of-stream, then the token moves on.
                if let Some(queue) = &self.optimizer_queue {
                    queue.shutdown();
                }
                self.forward(chunk);
                break;
            }

            if chunk.discontinuity {
                self.reset_state();
                if !self.forward(chunk) {
                    break;
                }
                continue;
            }

            self.process_data(&mut chunk);
            if chunk.frames_read == 0 {
                // The FFT filter held everything back; nothing to forward.
                self.pool.release(chunk);
                continue;
            }
            if !self.forward(chunk) {
                break;
            }
        }

        // Wake the optimizer on every exit path, not just a clean one.
        if let Some(queue) = &self.optimizer_queue {
            queue.shutdown();
        }
        log::debug!("preproc: exited");
    }

    fn process_data(&mut self, chunk: &mut Chunk) {
        let frames = chunk.frames_read;
        let format = chunk.packet_format;
        let pair = format.bytes_per_sample_pair();

        {
            let Chunk {
                raw_input,
                pre_resample,
                ..
            } = chunk;
            bytes_to_complex(format, &raw_input[..frames * pair], &mut pre_resample[..frames]);
        }

        self.send_training_copy(chunk);

        if let Some(dc) = &mut self.dc {
            dc.process(&mut chunk.pre_resample[..frames]);
        }

        if self.iq_enabled {
            let factors = self.ctx.iq_factors.load();
            apply_correction(factors, &mut chunk.pre_resample[..frames]);
        }

        if let Some(filter) = &mut self.filter {
            let filtered = filter.filter(&chunk.pre_resample[..frames]);
            let produced = filtered.len();
            chunk.pre_resample[..produced].copy_from_slice(filtered);
            chunk.frames_read = produced;
        }

        if let Some(nco) = &mut self.nco {
            nco.mix(&mut chunk.pre_resample[..chunk.frames_read]);
        }
    }

    /// Hand the optimizer a copy of the uncorrected spectrum to climb on.
    fn send_training_copy(&self, chunk: &Chunk) {
        if !self.iq_enabled || chunk.frames_read < IQ_CORRECTION_FFT_SIZE {
            return;
        }
        let Some(queue) = &self.optimizer_queue else {
            return;
        };
        let Some(mut training) = self.pool.try_acquire() else {
            return;
        };
        training.pre_resample[..IQ_CORRECTION_FFT_SIZE]
            .copy_from_slice(&chunk.pre_resample[..IQ_CORRECTION_FFT_SIZE]);
        training.frames_read = IQ_CORRECTION_FFT_SIZE;
        if let Err(returned) = queue.enqueue(training) {
            self.pool.release(returned);
        }
    }

    fn reset_state(&mut self) {
        if let Some(dc) = &mut self.dc {
            dc.reset();
        }
        if let Some(nco) = &mut self.nco {
            nco.reset_phase();
        }
        if let Some(filter) = &mut self.filter {
            filter.reset();
        }
    }

    fn forward(&self, chunk: Box<Chunk>) -> bool {
        match self.out_queue.enqueue(chunk) {
            Ok(()) => true,
            Err(chunk) => {
                self.pool.release(chunk);
                false
            }
        }
    }
}
