//! Reader stage: the source of chunks
//!
//! Three operating modes, fixed at startup. File mode pulls whole blocks
//! and honors writer-ring backpressure; buffered SDR mode drains the
//! framed ring buffer; realtime SDR mode lets the driver fill chunks
//! directly through a pump. In raw passthrough the source bytes land in
//! `final_output` untouched and every DSP stage is absent.

use std::sync::Arc;
use std::time::Duration;

use iq_core::tunables::{IO_READER_BACKPRESSURE_PAUSE_MS, IO_WRITER_BUFFER_HIGH_WATER_MARK};
use iq_io::source::{ChunkPump, SampleSource};
use iq_core::chunk::Chunk;
use iq_core::formats::SampleFormat;

use crate::byte_ring::ByteRing;
use crate::context::PipelineContext;
use crate::events::PipelineEvent;
use crate::framed::{FrameEvent, FramedRingBuffer};
use crate::queue::{ChunkQueue, FreeChunkPool};

/// Where this Reader gets its bytes.
pub enum ReaderMode {
    File { source: Box<dyn SampleSource> },
    Buffered { framed: Arc<FramedRingBuffer> },
    Realtime { source: Box<dyn SampleSource> },
}

pub struct ReaderStage {
    ctx: Arc<PipelineContext>,
    pool: Arc<FreeChunkPool>,
    out: Arc<ChunkQueue>,
    /// Present in file mode for the high-water backpressure poll.
    writer_ring: Option<Arc<ByteRing>>,
    passthrough: bool,
    mode: ReaderMode,
}

impl ReaderStage {
    pub fn new(
        ctx: Arc<PipelineContext>,
        pool: Arc<FreeChunkPool>,
        out: Arc<ChunkQueue>,
        writer_ring: Option<Arc<ByteRing>>,
        mode: ReaderMode,
    ) -> Self {
        let passthrough = ctx.config.raw_passthrough;
        Self {
            ctx,
            pool,
            out,
            writer_ring,
            passthrough,
            mode,
        }
    }

    pub fn run(mut self) {
        log::debug!("reader: started");
        match std::mem::replace(
            &mut self.mode,
            ReaderMode::Buffered {
                framed: Arc::new(FramedRingBuffer::new(0, 0)),
            },
        ) {
            ReaderMode::File { source } => self.run_file(source),
            ReaderMode::Buffered { framed } => self.run_buffered(&framed),
            ReaderMode::Realtime { source } => self.run_realtime(source),
        }
        log::debug!("reader: exited");
    }

    // ── file mode ────────────────────────────────────────────────────────

    fn run_file(&mut self, mut source: Box<dyn SampleSource>) {
        let format = self.ctx.config.input_format;
        let pair = format.bytes_per_sample_pair();
        let target = self.ctx.config.base_samples * pair;

        loop {
            if self.ctx.is_shutdown() {
                break;
            }
            self.wait_for_writer_headroom();

            let Some(mut chunk) = self.pool.acquire() else {
                break;
            };

            let read = match source.read_block(&mut chunk.raw_input[..target]) {
                Ok(n) => n,
                Err(e) => {
                    self.ctx.fatal_error("reader", &format!("source read failed: {e}"));
                    self.pool.release(chunk);
                    break;
                }
            };

            let frames = read / pair;
            if frames == 0 {
                log::debug!("reader: end of file");
                chunk.mark_last();
                self.forward(chunk);
                break;
            }

            self.fill_data_chunk(&mut chunk, format, frames, read);
            self.ctx.add_frames_read(frames as u64);
            if !self.forward(chunk) {
                break;
            }
        }
        source.cleanup();
    }

    /// File-mode backpressure: pause while the writer ring sits above the
    /// high-water mark so a file reader cannot outrun a stalled sink.
    fn wait_for_writer_headroom(&self) {
        if let Some(ring) = &self.writer_ring {
            while ring.fill_ratio() > IO_WRITER_BUFFER_HIGH_WATER_MARK && !self.ctx.is_shutdown() {
                std::thread::sleep(Duration::from_millis(IO_READER_BACKPRESSURE_PAUSE_MS));
            }
        }
    }

    // ── buffered SDR mode ────────────────────────────────────────────────

    fn run_buffered(&mut self, framed: &FramedRingBuffer) {
        loop {
            if self.ctx.is_shutdown() {
                break;
            }
            let Some(mut chunk) = self.pool.acquire() else {
                break;
            };

            match framed.read_frame(&mut chunk.raw_input) {
                None => {
                    chunk.mark_last();
                    self.forward(chunk);
                    break;
                }
                Some(FrameEvent::Reset) => {
                    log::info!("reader: stream discontinuity signalled by driver");
                    self.ctx.events.send(PipelineEvent::Discontinuity);
                    chunk.mark_discontinuity();
                    if !self.forward(chunk) {
                        break;
                    }
                }
                Some(FrameEvent::Data {
                    format,
                    payload_len,
                }) => {
                    let pair = format.bytes_per_sample_pair();
                    let frames = payload_len / pair;
                    if frames == 0 {
                        self.pool.release(chunk);
                        continue;
                    }
                    self.fill_data_chunk(&mut chunk, format, frames, frames * pair);
                    self.ctx.add_frames_read(frames as u64);
                    if !self.forward(chunk) {
                        break;
                    }
                }
            }
        }
    }

    // ── realtime SDR mode ────────────────────────────────────────────────

    fn run_realtime(&mut self, mut source: Box<dyn SampleSource>) {
        let result = {
            let mut pump = RealtimePump { reader: self };
            source.run_realtime(&mut pump)
        };
        if let Err(e) = result {
            self.ctx
                .fatal_error("reader", &format!("realtime driver loop failed: {e}"));
        }

        if let Some(mut chunk) = self.pool.acquire() {
            chunk.mark_last();
            self.forward(chunk);
        }
        source.stop_stream();
        source.cleanup();
    }

    // ── shared ───────────────────────────────────────────────────────────

    fn fill_data_chunk(
        &self,
        chunk: &mut Chunk,
        format: SampleFormat,
        frames: usize,
        bytes: usize,
    ) {
        chunk.packet_format = format;
        chunk.frames_read = frames;
        if self.passthrough {
            // Raw passthrough: bytes go straight to the output buffer; the
            // chunk reaches the Writer without conversion.
            let (raw, out) = (&chunk.raw_input[..bytes], &mut chunk.final_output[..bytes]);
            out.copy_from_slice(raw);
            chunk.final_output_len = bytes;
            chunk.frames_to_write = frames;
        }
    }

    /// Enqueue downstream; on shutdown the chunk goes back to the pool and
    /// the caller unwinds.
    fn forward(&self, chunk: Box<Chunk>) -> bool {
        match self.out.enqueue(chunk) {
            Ok(()) => true,
            Err(chunk) => {
                self.pool.release(chunk);
                false
            }
        }
    }
}

/// Pump handed to a realtime driver loop: fills chunks in the callback.
struct RealtimePump<'a> {
    reader: &'a ReaderStage,
}

impl ChunkPump for RealtimePump<'_> {
    fn push_samples(&mut self, format: SampleFormat, payload: &[u8]) -> bool {
        let reader = self.reader;
        reader.ctx.record_heartbeat();

        let pair = format.bytes_per_sample_pair();
        let max_bytes = reader.ctx.config.base_samples * pair;

        for piece in payload.chunks(max_bytes.max(pair)) {
            if reader.ctx.is_shutdown() {
                return false;
            }
            let Some(mut chunk) = reader.pool.acquire() else {
                return false;
            };
            let frames = piece.len() / pair;
            let bytes = frames * pair;
            if frames == 0 {
                reader.pool.release(chunk);
                continue;
            }
            chunk.raw_input[..bytes].copy_from_slice(&piece[..bytes]);
            reader.fill_data_chunk(&mut chunk, format, frames, bytes);
            reader.ctx.add_frames_read(frames as u64);
            if !reader.forward(chunk) {
                return false;
            }
        }
        true
    }

    fn push_reset(&mut self) -> bool {
        let reader = self.reader;
        reader.ctx.record_heartbeat();
        log::info!("reader: stream discontinuity signalled by driver");
        reader.ctx.events.send(PipelineEvent::Discontinuity);

        let Some(mut chunk) = reader.pool.acquire() else {
            return false;
        };
        chunk.mark_discontinuity();
        reader.forward(chunk)
    }
}
