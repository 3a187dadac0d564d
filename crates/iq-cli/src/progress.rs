//! Progress reporting
//!
//! A low-priority thread drains the pipeline event feed and turns writer
//! ticks into periodic log lines. With a known-length source the line
//! carries a percentage; live sources get counts and throughput only.

use std::time::Instant;

use crossbeam_channel::Receiver;

use iq_pipeline::PipelineEvent;

pub struct ProgressReporter {
    receiver: Receiver<PipelineEvent>,
    expected_output_frames: Option<u64>,
}

impl ProgressReporter {
    pub fn new(receiver: Receiver<PipelineEvent>, expected_output_frames: Option<u64>) -> Self {
        Self {
            receiver,
            expected_output_frames,
        }
    }

    /// Consume events until the channel closes. Runs on its own thread.
    pub fn run(self) {
        let started = Instant::now();
        let mut discontinuities = 0u64;

        while let Ok(event) = self.receiver.recv() {
            match event {
                PipelineEvent::Progress {
                    frames_read,
                    frames_written,
                    bytes_written,
                    ring_fill,
                } => {
                    let elapsed = started.elapsed().as_secs_f64();
                    let rate = if elapsed > 0.0 {
                        bytes_written as f64 / elapsed / (1024.0 * 1024.0)
                    } else {
                        0.0
                    };
                    match self.expected_output_frames {
                        Some(expected) if expected > 0 => {
                            let percent = 100.0 * frames_written as f64 / expected as f64;
                            log::info!(
                                "progress: {percent:.1}% ({frames_written} frames, \
                                 {rate:.1} MiB/s, ring {:.0}%)",
                                ring_fill * 100.0
                            );
                        }
                        _ => {
                            log::info!(
                                "progress: {frames_read} frames in, {frames_written} out, \
                                 {rate:.1} MiB/s, ring {:.0}%",
                                ring_fill * 100.0
                            );
                        }
                    }
                }
                PipelineEvent::Discontinuity => {
                    discontinuities += 1;
                    log::info!("stream discontinuity #{discontinuities}");
                }
                PipelineEvent::Finished => {
                    log::debug!("progress: writer finished");
                }
            }
        }

        if discontinuities > 0 {
            log::info!("run saw {discontinuities} stream discontinuity(ies)");
        }
    }
}
