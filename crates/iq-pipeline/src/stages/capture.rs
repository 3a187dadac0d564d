//! Capture stage
//!
//! Hosts a buffered-mode driver's blocking read loop on a time-critical
//! thread. The loop pushes framed packets and heartbeats; this stage only
//! brackets it: priority up front, end-of-stream on the way out, fatal
//! errors routed to the context. Driver-reported fatal conditions are not
//! retried.

use std::sync::Arc;

use iq_io::source::SampleSource;

use crate::context::{ContextHooks, PipelineContext};
use crate::framed::FramedRingBuffer;
use crate::thread_priority::{set_current_thread_priority, StagePriority};

pub struct CaptureStage {
    ctx: Arc<PipelineContext>,
    framed: Arc<FramedRingBuffer>,
    source: Box<dyn SampleSource>,
}

impl CaptureStage {
    pub fn new(
        ctx: Arc<PipelineContext>,
        framed: Arc<FramedRingBuffer>,
        source: Box<dyn SampleSource>,
    ) -> Self {
        Self {
            ctx,
            framed,
            source,
        }
    }

    pub fn run(mut self) {
        set_current_thread_priority(StagePriority::TimeCritical, "capture");
        log::debug!("capture: started ({})", self.source.summary());

        // Mark the stream live so the watchdog clock starts now, not at
        // process launch.
        self.ctx.record_heartbeat();

        let hooks = ContextHooks::new(Arc::clone(&self.ctx));
        match self.source.start_stream(&*self.framed, &hooks) {
            Ok(()) => log::debug!("capture: driver loop ended"),
            Err(e) => {
                self.ctx
                    .fatal_error("capture", &format!("driver loop failed: {e}"));
            }
        }
        self.framed.signal_end_of_stream();

        self.source.stop_stream();
        self.source.cleanup();

        let overruns = self.framed.overrun_count();
        if overruns > 0 {
            log::warn!("capture: {overruns} frame(s) dropped to input-buffer overruns");
        }
        log::debug!("capture: exited");
    }
}
