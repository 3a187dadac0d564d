//! Writer stage
//!
//! Terminal drain of the pipeline. Container sinks run their blocking
//! `run_writer` loop against the byte ring; chunk sinks (stdout) consume
//! the writer queue directly. Either way this stage owns progress
//! accounting and finalizes the sink exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use iq_io::sink::OutputSink;

use crate::byte_ring::ByteRing;
use crate::context::PipelineContext;
use crate::events::PipelineEvent;
use crate::queue::{ChunkQueue, FreeChunkPool};
use crate::thread_priority::{set_current_thread_priority, StagePriority};

/// Cadence of progress events.
const PROGRESS_TICK: Duration = Duration::from_millis(500);

/// How this Writer receives its bytes.
pub enum WriterMode {
    Ring(Arc<ByteRing>),
    Chunks {
        in_queue: Arc<ChunkQueue>,
        pool: Arc<FreeChunkPool>,
    },
}

pub struct WriterStage {
    ctx: Arc<PipelineContext>,
    sink: Box<dyn OutputSink>,
    mode: WriterMode,
    output_pair_bytes: usize,
}

impl WriterStage {
    pub fn new(ctx: Arc<PipelineContext>, sink: Box<dyn OutputSink>, mode: WriterMode) -> Self {
        let output_pair_bytes = ctx.config.output_format.bytes_per_sample_pair();
        Self {
            ctx,
            sink,
            mode,
            output_pair_bytes,
        }
    }

    pub fn run(mut self) {
        set_current_thread_priority(StagePriority::High, "writer");
        log::debug!("writer: started ({})", self.sink.summary());

        match std::mem::replace(&mut self.mode, WriterMode::Ring(Arc::new(ByteRing::new(1)))) {
            WriterMode::Ring(ring) => self.run_ring(&ring),
            WriterMode::Chunks { in_queue, pool } => self.run_chunks(&in_queue, &pool),
        }

        if let Err(e) = self.sink.finalize() {
            self.ctx
                .fatal_error("writer", &format!("finalize failed: {e}"));
        }

        let progress = self.ctx.progress.lock();
        log::info!(
            "writer: finished, {} frames / {} bytes to {}",
            progress.total_output_frames,
            progress.total_output_bytes,
            self.sink.summary()
        );
        drop(progress);
        self.ctx.events.send(PipelineEvent::Finished);
        log::debug!("writer: exited");
    }

    fn run_ring(&mut self, ring: &Arc<ByteRing>) {
        let ctx = Arc::clone(&self.ctx);
        let pair = self.output_pair_bytes;
        let ring_for_fill = Arc::clone(ring);
        let mut last_tick = Instant::now();

        let result = self.sink.run_writer(&**ring, &mut |bytes| {
            ctx.add_output((bytes / pair) as u64, bytes as u64);
            if last_tick.elapsed() >= PROGRESS_TICK {
                last_tick = Instant::now();
                send_progress(&ctx, ring_for_fill.fill_ratio());
            }
        });
        if let Err(e) = result {
            self.ctx
                .fatal_error("writer", &format!("sink drain failed: {e}"));
        }
    }

    fn run_chunks(&mut self, in_queue: &ChunkQueue, pool: &FreeChunkPool) {
        let mut last_tick = Instant::now();

        while let Some(chunk) = in_queue.dequeue() {
            if chunk.is_last {
                pool.release(chunk);
                break;
            }
            if chunk.discontinuity {
                pool.release(chunk);
                continue;
            }

            let payload = &chunk.final_output[..chunk.final_output_len];
            let mut offset = 0;
            while offset < payload.len() {
                match self.sink.write_chunk(&payload[offset..]) {
                    Ok(0) => {
                        self.ctx
                            .fatal_error("writer", "sink accepted zero bytes");
                        pool.release(chunk);
                        return;
                    }
                    Ok(n) => offset += n,
                    Err(e) => {
                        self.ctx
                            .fatal_error("writer", &format!("sink write failed: {e}"));
                        pool.release(chunk);
                        return;
                    }
                }
            }

            self.ctx
                .add_output(chunk.frames_to_write as u64, payload.len() as u64);
            pool.release(chunk);

            if last_tick.elapsed() >= PROGRESS_TICK {
                last_tick = Instant::now();
                send_progress(&self.ctx, 0.0);
            }
        }
    }
}

fn send_progress(ctx: &PipelineContext, ring_fill: f64) {
    let progress = ctx.progress.lock();
    ctx.events.send(PipelineEvent::Progress {
        frames_read: progress.total_frames_read,
        frames_written: progress.total_output_frames,
        bytes_written: progress.total_output_bytes,
        ring_fill,
    });
}
