//! Watchdog stage
//!
//! SDR inputs only. Compares monotonic time against the last driver
//! heartbeat and, after prolonged silence, kills the process outright.
//! Deliberately uncooperative: the working assumption is a deadlocked
//! driver thread that can never be joined, so no cleanup is attempted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use iq_core::tunables::{WATCHDOG_INTERVAL_MS, WATCHDOG_TIMEOUT_MS};

use crate::context::PipelineContext;

/// Poll slice; short so a finished pipeline releases the thread promptly.
const POLL_MS: u64 = 100;

pub struct WatchdogStage {
    ctx: Arc<PipelineContext>,
    /// Raised by the orchestrator once the stream stages have joined.
    stop: Arc<AtomicBool>,
}

impl WatchdogStage {
    pub fn new(ctx: Arc<PipelineContext>, stop: Arc<AtomicBool>) -> Self {
        Self { ctx, stop }
    }

    pub fn run(self) {
        log::debug!("watchdog: started");
        let timeout = Duration::from_millis(WATCHDOG_TIMEOUT_MS);
        let mut since_check = Duration::ZERO;

        loop {
            std::thread::sleep(Duration::from_millis(POLL_MS));
            if self.stop.load(Ordering::Acquire) || self.ctx.is_shutdown() {
                break;
            }

            since_check += Duration::from_millis(POLL_MS);
            if since_check < Duration::from_millis(WATCHDOG_INTERVAL_MS) {
                continue;
            }
            since_check = Duration::ZERO;

            let silence = self.ctx.progress.lock().last_heartbeat.elapsed();
            if silence >= timeout {
                // Last gasp: the driver is presumed deadlocked, the thread
                // cannot be joined, so terminate the process now.
                log::error!(
                    "watchdog: no driver heartbeat for {:.1} s; terminating",
                    silence.as_secs_f64()
                );
                std::process::exit(2);
            }
        }
        log::debug!("watchdog: exited");
    }
}
