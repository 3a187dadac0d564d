//! Pipeline orchestrator
//!
//! Decides which stages exist, designs the DSP up front, sizes the chunk
//! pool so every stage's worst-case carryover fits, wires the queue graph
//! (splicing around absent stages), spawns the threads in dependency
//! order, and joins them. Cooperative shutdown broadcasts through the
//! context to every queue and both rings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use iq_core::chunk::ChunkCapacities;
use iq_core::config::PipelineConfig;
use iq_core::formats::bytes_to_complex;
use iq_core::tunables::{IQ_CORRECTION_FFT_SIZE, RESAMPLER_OUTPUT_SAFETY_MARGIN};
use iq_dsp::filter::{design_chain, DesignedFilter, FilterEngine};
use iq_dsp::{Agc, DcBlocker, IqOptimizer, Nco, RateConverter};
use iq_io::sink::OutputSink;
use iq_io::source::{SampleSource, SourceInfo, SourceMode};

use crate::byte_ring::ByteRing;
use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::events::EventSender;
use crate::framed::FramedRingBuffer;
use crate::queue::{ChunkQueue, FreeChunkPool, ShutdownNotify};
use crate::stages::{
    CaptureStage, OptimizerStage, PostProcOutput, PostProcStage, PreProcStage, ReaderMode,
    ReaderStage, ResamplerStage, WatchdogStage, WriterMode, WriterStage,
};

/// What a finished run looked like.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub frames_read: u64,
    pub frames_written: u64,
    pub bytes_written: u64,
    pub error_occurred: bool,
    /// Chunks not back in the pool after teardown. Zero on a clean run;
    /// a cancelled run may intentionally drop in-flight chunks.
    pub chunks_leaked: usize,
    /// Frames dropped to input-buffer overruns.
    pub input_overruns: u64,
}

/// A fully wired pipeline, ready to run once.
pub struct Pipeline {
    ctx: Arc<PipelineContext>,
    pool: Arc<FreeChunkPool>,
    framed: Option<Arc<FramedRingBuffer>>,
    watchdog_stop: Arc<AtomicBool>,
    stages: StageSet,
}

/// The stage structs waiting for their threads.
struct StageSet {
    watchdog: Option<WatchdogStage>,
    capture: Option<CaptureStage>,
    reader: ReaderStage,
    preproc: Option<PreProcStage>,
    resampler: Option<ResamplerStage>,
    postproc: Option<PostProcStage>,
    optimizer: Option<OptimizerStage>,
    writer: WriterStage,
}

impl Pipeline {
    /// Validate, design, size, and wire. Nothing runs yet.
    pub fn new(
        config: PipelineConfig,
        mut source: Box<dyn SampleSource>,
        mut sink: Box<dyn OutputSink>,
        events: EventSender,
    ) -> PipelineResult<Self> {
        config.validate()?;
        source.validate(&config)?;
        let info = source.initialize()?;
        let mode = source.mode();

        // ── DSP design ───────────────────────────────────────────────────
        let passthrough = config.raw_passthrough;
        let (pre_filter, post_filter, converter) = if passthrough {
            (None, None, None)
        } else {
            let pre = design_chain(&config.pre_filter, config.input_rate, config.pre_shift_hz)?;
            let post = design_chain(&config.post_filter, config.output_rate, 0.0)?;
            let converter = if config.no_resample() {
                None
            } else {
                Some(RateConverter::new(config.input_rate, config.output_rate)?)
            };
            (pre, post, converter)
        };

        // ── pool sizing ──────────────────────────────────────────────────
        let caps = chunk_capacities(&config, &info, &pre_filter, &post_filter, &converter);
        log::debug!(
            "chunk geometry: raw {} B, pre {} frames, resampled {} frames, out {} B, {} chunks",
            caps.raw_input_bytes,
            caps.pre_resample_frames,
            caps.resampled_frames,
            caps.final_output_bytes,
            config.num_chunks
        );

        // ── context ──────────────────────────────────────────────────────
        let mut ctx = PipelineContext::new(config.clone(), events);
        ctx.expected_output_frames = info
            .total_frames
            .map(|frames| (frames as f64 * config.resample_ratio()) as u64);
        let ctx = Arc::new(ctx);

        // ── optimizer (plus optional pre-stream calibration) ─────────────
        let mut optimizer_engine = if config.iq_correction && !passthrough {
            Some(IqOptimizer::new())
        } else {
            None
        };
        if let Some(engine) = &mut optimizer_engine {
            if config.iq_calibrate_on_start && mode == SourceMode::File {
                calibrate_from_file(&ctx, engine, source.as_mut(), &info)?;
            }
        }

        // ── queues, rings, pool ──────────────────────────────────────────
        let pool = Arc::new(FreeChunkPool::new(config.num_chunks, &caps, info.format));
        ctx.register_for_shutdown(Arc::clone(&pool) as Arc<dyn ShutdownNotify>);

        let direct_write = sink.direct_write() || passthrough;
        let writer_ring = if direct_write {
            None
        } else {
            let ring = Arc::new(ByteRing::new(config.writer_buffer_bytes));
            ctx.register_for_shutdown(Arc::clone(&ring) as Arc<dyn ShutdownNotify>);
            Some(ring)
        };
        let writer_queue = if direct_write {
            let queue = Arc::new(ChunkQueue::new(config.num_chunks));
            ctx.register_for_shutdown(Arc::clone(&queue) as Arc<dyn ShutdownNotify>);
            Some(queue)
        } else {
            None
        };

        let framed = if mode == SourceMode::BufferedSdr {
            let max_payload = config.base_samples * info.max_bytes_per_sample_pair;
            let ring = Arc::new(FramedRingBuffer::new(config.sdr_buffer_bytes, max_payload));
            ctx.register_for_shutdown(Arc::clone(&ring) as Arc<dyn ShutdownNotify>);
            Some(ring)
        } else {
            None
        };

        let optimizer_queue = optimizer_engine.as_ref().map(|_| {
            let queue = Arc::new(ChunkQueue::new(config.num_chunks));
            ctx.register_for_shutdown(Arc::clone(&queue) as Arc<dyn ShutdownNotify>);
            queue
        });

        let new_queue = |ctx: &PipelineContext| {
            let queue = Arc::new(ChunkQueue::new(config.num_chunks));
            ctx.register_for_shutdown(Arc::clone(&queue) as Arc<dyn ShutdownNotify>);
            queue
        };

        // ── sink init (config errors surface before any thread exists) ───
        sink.initialize()?;

        // ── stage graph ──────────────────────────────────────────────────
        // Reader's downstream is the first live stage; disabled stages are
        // spliced out entirely.
        let reader_out = if passthrough {
            Arc::clone(writer_queue.as_ref().expect("passthrough writes chunks"))
        } else {
            new_queue(&ctx)
        };

        let mut preproc = None;
        let mut resampler = None;
        let mut postproc = None;

        if !passthrough {
            let preproc_out = new_queue(&ctx);
            preproc = Some(PreProcStage::new(
                Arc::clone(&ctx),
                Arc::clone(&reader_out),
                Arc::clone(&preproc_out),
                Arc::clone(&pool),
                optimizer_queue.clone(),
                config
                    .dc_block
                    .then(|| DcBlocker::new(iq_core::tunables::DC_BLOCK_CUTOFF_HZ, config.input_rate)),
                (config.pre_shift_hz != 0.0).then(|| Nco::new(config.pre_shift_hz, config.input_rate)),
                pre_filter.as_ref().map(FilterEngine::new),
            ));

            let postproc_in = if let Some(converter) = converter {
                let resampler_out = new_queue(&ctx);
                resampler = Some(ResamplerStage::new(
                    Arc::clone(&ctx),
                    Arc::clone(&preproc_out),
                    Arc::clone(&resampler_out),
                    Arc::clone(&pool),
                    converter,
                ));
                resampler_out
            } else {
                preproc_out
            };

            let output = match (&writer_ring, &writer_queue) {
                (Some(ring), _) => PostProcOutput::Ring(Arc::clone(ring)),
                (None, Some(queue)) => PostProcOutput::Queue(Arc::clone(queue)),
                (None, None) => unreachable!("writer has either a ring or a queue"),
            };
            postproc = Some(PostProcStage::new(
                Arc::clone(&ctx),
                postproc_in,
                output,
                Arc::clone(&pool),
                post_filter.as_ref().map(FilterEngine::new),
                (config.post_shift_hz != 0.0)
                    .then(|| Nco::new(config.post_shift_hz, config.output_rate)),
                Agc::new(config.agc, config.output_rate),
                resampler.is_some(),
            ));
        }

        let optimizer = match (optimizer_engine, &optimizer_queue) {
            (Some(engine), Some(queue)) => Some(OptimizerStage::new(
                Arc::clone(&ctx),
                Arc::clone(queue),
                Arc::clone(&pool),
                engine,
            )),
            _ => None,
        };

        // Reader wiring by source mode; the capture stage owns the source
        // in buffered mode.
        let mut capture = None;
        let reader_mode = match mode {
            SourceMode::File => ReaderMode::File { source },
            SourceMode::RealtimeSdr => ReaderMode::Realtime { source },
            SourceMode::BufferedSdr => {
                let ring = Arc::clone(framed.as_ref().expect("buffered mode has a framed ring"));
                capture = Some(CaptureStage::new(Arc::clone(&ctx), Arc::clone(&ring), source));
                ReaderMode::Buffered { framed: ring }
            }
        };
        let reader_backpressure = (mode == SourceMode::File)
            .then(|| writer_ring.clone())
            .flatten();
        let reader = ReaderStage::new(
            Arc::clone(&ctx),
            Arc::clone(&pool),
            reader_out,
            reader_backpressure,
            reader_mode,
        );

        let writer_mode = match (&writer_ring, &writer_queue) {
            (Some(ring), _) => WriterMode::Ring(Arc::clone(ring)),
            (None, Some(queue)) => WriterMode::Chunks {
                in_queue: Arc::clone(queue),
                pool: Arc::clone(&pool),
            },
            (None, None) => unreachable!(),
        };
        let writer = WriterStage::new(Arc::clone(&ctx), sink, writer_mode);

        let watchdog_stop = Arc::new(AtomicBool::new(false));
        let watchdog = matches!(mode, SourceMode::BufferedSdr | SourceMode::RealtimeSdr)
            .then(|| WatchdogStage::new(Arc::clone(&ctx), Arc::clone(&watchdog_stop)));

        Ok(Self {
            ctx,
            pool,
            framed,
            watchdog_stop,
            stages: StageSet {
                watchdog,
                capture,
                reader,
                preproc,
                resampler,
                postproc,
                optimizer,
                writer,
            },
        })
    }

    /// The shared context, for signal handlers and external cancellation.
    pub fn context(&self) -> Arc<PipelineContext> {
        Arc::clone(&self.ctx)
    }

    /// Spawn every stage, block until the graph drains, and summarize.
    pub fn run(self) -> PipelineResult<RunSummary> {
        let StageSet {
            watchdog,
            capture,
            reader,
            preproc,
            resampler,
            postproc,
            optimizer,
            writer,
        } = self.stages;

        let mut threads: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
        let mut spawn = |name: &'static str, f: Box<dyn FnOnce() + Send>| -> PipelineResult<()> {
            let handle = std::thread::Builder::new()
                .name(format!("iq-{name}"))
                .spawn(f)
                .map_err(|e| PipelineError::Internal(format!("spawning {name}: {e}")))?;
            threads.push((name, handle));
            Ok(())
        };

        // Dependency order: consumers first would also work; what matters
        // is that every queue's peer exists before data flows.
        let watchdog_handle = match watchdog {
            Some(stage) => Some(
                std::thread::Builder::new()
                    .name("iq-watchdog".into())
                    .spawn(move || stage.run())
                    .map_err(|e| PipelineError::Internal(format!("spawning watchdog: {e}")))?,
            ),
            None => None,
        };

        spawn("writer", Box::new(move || writer.run()))?;
        if let Some(stage) = optimizer {
            spawn("optimizer", Box::new(move || stage.run()))?;
        }
        if let Some(stage) = postproc {
            spawn("postproc", Box::new(move || stage.run()))?;
        }
        if let Some(stage) = resampler {
            spawn("resampler", Box::new(move || stage.run()))?;
        }
        if let Some(stage) = preproc {
            spawn("preproc", Box::new(move || stage.run()))?;
        }
        spawn("reader", Box::new(move || reader.run()))?;
        if let Some(stage) = capture {
            spawn("capture", Box::new(move || stage.run()))?;
        }

        let mut panicked: Option<&'static str> = None;
        for (name, handle) in threads {
            if handle.join().is_err() {
                log::error!("{name}: stage thread panicked");
                self.ctx.fatal_error(name, "stage thread panicked");
                panicked.get_or_insert(name);
            }
        }

        // Stream stages are down; release the watchdog.
        self.watchdog_stop.store(true, Ordering::Release);
        if let Some(handle) = watchdog_handle {
            let _ = handle.join();
        }

        if let Some(name) = panicked {
            return Err(PipelineError::StagePanic(name));
        }

        let progress = self.ctx.progress.lock();
        Ok(RunSummary {
            frames_read: progress.total_frames_read,
            frames_written: progress.total_output_frames,
            bytes_written: progress.total_output_bytes,
            error_occurred: progress.error_occurred,
            chunks_leaked: self.pool.total() - self.pool.available(),
            input_overruns: self.framed.as_ref().map_or(0, |f| f.overrun_count()),
        })
    }
}

/// Size the chunk buffers so every stage's worst-case output fits:
/// FFT-filter carryover on both sides, plus the rate converter's block
/// granularity, plus the fixed safety margin.
fn chunk_capacities(
    config: &PipelineConfig,
    info: &SourceInfo,
    pre_filter: &Option<DesignedFilter>,
    post_filter: &Option<DesignedFilter>,
    converter: &Option<RateConverter>,
) -> ChunkCapacities {
    let base = config.base_samples;
    let pre_block = pre_filter
        .as_ref()
        .and_then(|f| f.fft_block)
        .unwrap_or(0);
    let post_block = post_filter
        .as_ref()
        .and_then(|f| f.fft_block)
        .unwrap_or(0);

    let pre_frames = base + pre_block;
    let resampled_frames = match converter {
        Some(converter) => converter.max_output_frames(pre_frames),
        None => pre_frames,
    } + post_block
        + RESAMPLER_OUTPUT_SAFETY_MARGIN;

    let in_pair = info
        .max_bytes_per_sample_pair
        .max(config.input_format.bytes_per_sample_pair());
    let out_pair = config.output_format.bytes_per_sample_pair();

    ChunkCapacities {
        base_samples: base,
        raw_input_bytes: base * in_pair,
        pre_resample_frames: pre_frames,
        resampled_frames,
        final_output_bytes: resampled_frames * out_pair,
    }
}

/// One synchronous optimizer pass against the head of a file, then rewind.
fn calibrate_from_file(
    ctx: &PipelineContext,
    engine: &mut IqOptimizer,
    source: &mut dyn SampleSource,
    info: &SourceInfo,
) -> PipelineResult<()> {
    let pair = info.format.bytes_per_sample_pair();
    let Some(block) = source.pre_stream_samples(IQ_CORRECTION_FFT_SIZE * pair)? else {
        log::debug!("pre-stream calibration skipped: source too short");
        return Ok(());
    };

    let mut samples = vec![num_complex::Complex::new(0.0_f32, 0.0); IQ_CORRECTION_FFT_SIZE];
    bytes_to_complex(info.format, &block, &mut samples);
    match engine.optimize(&samples) {
        Some(factors) => {
            ctx.iq_factors.publish(factors);
            log::info!(
                "pre-stream calibration: mag {:+.6}, phase {:+.6}",
                factors.mag_adj,
                factors.phase_adj
            );
        }
        None => log::debug!("pre-stream calibration skipped: insufficient spectral contrast"),
    }
    Ok(())
}
