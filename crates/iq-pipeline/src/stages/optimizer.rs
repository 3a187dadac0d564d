//! IqOptimizer stage
//!
//! Low-cadence worker consuming training copies of pre-resample samples.
//! At most one pass per interval; surplus training chunks go straight back
//! to the pool. Publication goes through the two-slot factors cell so the
//! PreProcessor's reads stay wait-free.

use std::sync::Arc;
use std::time::{Duration, Instant};

use iq_core::tunables::{IQ_CORRECTION_FFT_SIZE, IQ_CORRECTION_INTERVAL_MS};
use iq_dsp::IqOptimizer;

use crate::context::PipelineContext;
use crate::queue::{ChunkQueue, FreeChunkPool};

pub struct OptimizerStage {
    ctx: Arc<PipelineContext>,
    in_queue: Arc<ChunkQueue>,
    pool: Arc<FreeChunkPool>,
    optimizer: IqOptimizer,
}

impl OptimizerStage {
    pub fn new(
        ctx: Arc<PipelineContext>,
        in_queue: Arc<ChunkQueue>,
        pool: Arc<FreeChunkPool>,
        optimizer: IqOptimizer,
    ) -> Self {
        Self {
            ctx,
            in_queue,
            pool,
            optimizer,
        }
    }

    pub fn run(mut self) {
        log::debug!("iq-optimizer: started");
        let interval = Duration::from_millis(IQ_CORRECTION_INTERVAL_MS);
        let mut last_pass: Option<Instant> = None;

        while let Some(chunk) = self.in_queue.dequeue() {
            if chunk.is_last || chunk.frames_read < IQ_CORRECTION_FFT_SIZE {
                self.pool.release(chunk);
                continue;
            }

            let due = last_pass.map_or(true, |t| t.elapsed() >= interval);
            if !due {
                self.pool.release(chunk);
                continue;
            }

            if let Some(factors) = self
                .optimizer
                .optimize(&chunk.pre_resample[..IQ_CORRECTION_FFT_SIZE])
            {
                self.ctx.iq_factors.publish(factors);
                log::debug!(
                    "iq-optimizer: published mag {:+.6}, phase {:+.6}",
                    factors.mag_adj,
                    factors.phase_adj
                );
            }
            last_pass = Some(Instant::now());
            self.pool.release(chunk);
        }
        log::debug!("iq-optimizer: exited");
    }
}
