//! Shared pipeline context
//!
//! The one structure every stage holds an `Arc` to. There is no process
//! global state: the cooperative shutdown flag, the progress counters, the
//! published I/Q factors, and the shutdown fan-out all live here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use iq_core::config::PipelineConfig;
use iq_dsp::iq_balance::IqFactorsCell;
use iq_io::source::StreamHooks;

use crate::events::EventSender;
use crate::queue::ShutdownNotify;

/// Counters kept behind the progress lock.
pub struct Progress {
    pub total_frames_read: u64,
    pub total_output_frames: u64,
    pub total_output_bytes: u64,
    /// Last time the driver proved it was alive.
    pub last_heartbeat: Instant,
    /// True once a fatal error has been recorded.
    pub error_occurred: bool,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            total_frames_read: 0,
            total_output_frames: 0,
            total_output_bytes: 0,
            last_heartbeat: Instant::now(),
            error_occurred: false,
        }
    }
}

/// Everything the stages share.
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub progress: Mutex<Progress>,
    pub iq_factors: IqFactorsCell,
    pub events: EventSender,
    /// Frames the run should produce, when the source length is known.
    pub expected_output_frames: Option<u64>,

    shutdown: AtomicBool,
    /// First-fatal-error-wins guard.
    error_reported: AtomicBool,
    /// Components woken by a shutdown broadcast.
    shutdown_targets: Mutex<Vec<Arc<dyn ShutdownNotify>>>,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig, events: EventSender) -> Self {
        Self {
            config,
            progress: Mutex::new(Progress::default()),
            iq_factors: IqFactorsCell::new(),
            events,
            expected_output_frames: None,
            shutdown: AtomicBool::new(false),
            error_reported: AtomicBool::new(false),
            shutdown_targets: Mutex::new(Vec::new()),
        }
    }

    /// Register a queue or ring for the shutdown broadcast.
    pub fn register_for_shutdown(&self, target: Arc<dyn ShutdownNotify>) {
        self.shutdown_targets.lock().push(target);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Cooperative cancel: broadcast to every registered component. Safe to
    /// call from any thread, any number of times.
    pub fn request_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("shutdown requested; broadcasting to all queues");
        for target in self.shutdown_targets.lock().iter() {
            target.notify_shutdown();
        }
    }

    /// Record a fatal error. The first report logs at `error`, marks
    /// `error_occurred`, and triggers shutdown; the rest log at `debug`.
    pub fn fatal_error(&self, stage: &str, message: &str) {
        if self.error_reported.swap(true, Ordering::AcqRel) {
            log::debug!("{stage}: subsequent error suppressed: {message}");
            return;
        }
        log::error!("{stage}: {message}");
        self.progress.lock().error_occurred = true;
        self.request_shutdown();
    }

    pub fn record_heartbeat(&self) {
        self.progress.lock().last_heartbeat = Instant::now();
    }

    pub fn add_frames_read(&self, frames: u64) {
        self.progress.lock().total_frames_read += frames;
    }

    pub fn add_output(&self, frames: u64, bytes: u64) {
        let mut progress = self.progress.lock();
        progress.total_output_frames += frames;
        progress.total_output_bytes += bytes;
    }
}

/// Hooks handed to a buffered-mode driver loop.
pub struct ContextHooks {
    ctx: Arc<PipelineContext>,
}

impl ContextHooks {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

impl StreamHooks for ContextHooks {
    fn heartbeat(&self) {
        self.ctx.record_heartbeat();
    }

    fn should_stop(&self) -> bool {
        self.ctx.is_shutdown()
    }
}
