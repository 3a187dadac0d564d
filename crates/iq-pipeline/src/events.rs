//! Pipeline event feed
//!
//! Low-rate notifications from the stages to the front-end (progress
//! reporting, discontinuity accounting). Delivery is best-effort: sends
//! never block and a missing receiver is not an error.

use crossbeam_channel::Sender;

/// One notification from the running pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipelineEvent {
    /// Periodic writer-side progress tick.
    Progress {
        frames_read: u64,
        frames_written: u64,
        bytes_written: u64,
        /// Fill ratio of the writer ring, when one exists.
        ring_fill: f64,
    },
    /// A stream discontinuity passed the Reader.
    Discontinuity,
    /// The Writer finalized its output.
    Finished,
}

/// Fire-and-forget sender wrapper.
#[derive(Clone)]
pub struct EventSender {
    inner: Option<Sender<PipelineEvent>>,
}

impl EventSender {
    pub fn new(sender: Sender<PipelineEvent>) -> Self {
        Self {
            inner: Some(sender),
        }
    }

    /// An event feed nobody listens to.
    pub fn disconnected() -> Self {
        Self { inner: None }
    }

    pub fn send(&self, event: PipelineEvent) {
        if let Some(sender) = &self.inner {
            let _ = sender.try_send(event);
        }
    }
}
