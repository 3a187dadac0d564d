//! PostProcessor stage
//!
//! Output-rate DSP and the trip back to bytes: post-resample filter,
//! post-resample frequency shift, AGC, then complex-to-bytes conversion
//! into `final_output`. Two delivery paths exist and exactly one is wired:
//! container sinks get bytes through the writer ring (this stage recycles
//! the chunk), chunk sinks such as stdout get the chunk itself on the
//! writer queue.

use std::sync::Arc;

use num_complex::Complex;

use iq_core::chunk::Chunk;
use iq_core::formats::{complex_to_bytes, SampleFormat};
use iq_dsp::filter::FilterEngine;
use iq_dsp::{Agc, Nco};

use crate::byte_ring::ByteRing;
use crate::context::PipelineContext;
use crate::queue::{ChunkQueue, FreeChunkPool};
use crate::thread_priority::{set_current_thread_priority, StagePriority};

/// Where the processed bytes leave this stage.
pub enum PostProcOutput {
    /// Byte-ring path: bytes stream to the writer ring, chunks recycle here.
    Ring(Arc<ByteRing>),
    /// Chunk-queue path: whole chunks travel to the Writer.
    Queue(Arc<ChunkQueue>),
}

pub struct PostProcStage {
    ctx: Arc<PipelineContext>,
    in_queue: Arc<ChunkQueue>,
    output: PostProcOutput,
    pool: Arc<FreeChunkPool>,
    filter: Option<FilterEngine>,
    nco: Option<Nco>,
    agc: Option<Agc>,
    output_format: SampleFormat,
    /// True when a Resampler stage feeds us (data sits in `resampled`);
    /// false when the queues were spliced at unity ratio (data still sits
    /// in `pre_resample`).
    input_resampled: bool,
}

impl PostProcStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<PipelineContext>,
        in_queue: Arc<ChunkQueue>,
        output: PostProcOutput,
        pool: Arc<FreeChunkPool>,
        filter: Option<FilterEngine>,
        nco: Option<Nco>,
        agc: Option<Agc>,
        input_resampled: bool,
    ) -> Self {
        let output_format = ctx.config.output_format;
        Self {
            ctx,
            in_queue,
            output,
            pool,
            filter,
            nco,
            agc,
            output_format,
            input_resampled,
        }
    }

    pub fn run(mut self) {
        set_current_thread_priority(StagePriority::AboveNormal, "postproc");
        log::debug!("postproc: started");

        while let Some(mut chunk) = self.in_queue.dequeue() {
            if chunk.is_last {
                match &self.output {
                    PostProcOutput::Ring(ring) => {
                        ring.end_of_stream();
                        self.pool.release(chunk);
                    }
                    PostProcOutput::Queue(queue) => {
                        if let Err(returned) = queue.enqueue(chunk) {
                            self.pool.release(returned);
                        }
                    }
                }
                break;
            }

            if chunk.discontinuity {
                self.reset_state();
                match &self.output {
                    // The byte stream has no discontinuity representation;
                    // the token dies here.
                    PostProcOutput::Ring(_) => self.pool.release(chunk),
                    PostProcOutput::Queue(queue) => {
                        if let Err(returned) = queue.enqueue(chunk) {
                            self.pool.release(returned);
                            break;
                        }
                    }
                }
                continue;
            }

            let produced = self.process_data(&mut chunk);
            if produced == 0 {
                self.pool.release(chunk);
                continue;
            }

            match &self.output {
                PostProcOutput::Ring(ring) => {
                    let ok = ring.write(&chunk.final_output[..chunk.final_output_len]);
                    self.pool.release(chunk);
                    if !ok {
                        break;
                    }
                }
                PostProcOutput::Queue(queue) => {
                    if let Err(returned) = queue.enqueue(chunk) {
                        self.pool.release(returned);
                        break;
                    }
                }
            }
        }

        // A cancelled run must still let the Writer finalize.
        if let PostProcOutput::Ring(ring) = &self.output {
            ring.end_of_stream();
        }
        log::debug!("postproc: exited");
    }

    /// Run the post-resample chain; returns frames produced.
    fn process_data(&mut self, chunk: &mut Chunk) -> usize {
        let frames = if self.input_resampled {
            chunk.frames_to_write
        } else {
            chunk.frames_read
        };

        // Move the working set into `post_resample`, filtering on the way
        // when a post filter exists.
        let produced = {
            let Chunk {
                pre_resample,
                resampled,
                post_resample,
                ..
            } = &mut *chunk;
            let source: &[Complex<f32>] = if self.input_resampled {
                &resampled[..frames]
            } else {
                &pre_resample[..frames]
            };

            match &mut self.filter {
                Some(filter) => {
                    let filtered = filter.filter(source);
                    post_resample[..filtered.len()].copy_from_slice(filtered);
                    filtered.len()
                }
                None => {
                    post_resample[..frames].copy_from_slice(source);
                    frames
                }
            }
        };
        if produced == 0 {
            return 0;
        }

        if let Some(nco) = &mut self.nco {
            nco.mix(&mut chunk.post_resample[..produced]);
        }
        if let Some(agc) = &mut self.agc {
            agc.process(&mut chunk.post_resample[..produced]);
        }

        let bytes = {
            let Chunk {
                post_resample,
                final_output,
                ..
            } = &mut *chunk;
            complex_to_bytes(self.output_format, &post_resample[..produced], final_output)
        };
        chunk.frames_to_write = produced;
        chunk.final_output_len = bytes;
        produced
    }

    fn reset_state(&mut self) {
        if let Some(filter) = &mut self.filter {
            filter.reset();
        }
        if let Some(nco) = &mut self.nco {
            nco.reset_phase();
        }
        if let Some(agc) = &mut self.agc {
            agc.reset();
        }
    }
}
