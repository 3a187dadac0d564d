//! iq-pipeline: the streaming DSP pipeline
//!
//! A linear producer-consumer graph of OS threads exchanging ownership of
//! fixed-capacity chunks through bounded queues:
//!
//! ```text
//! [Capture?]--framed-->[Reader]-->[PreProc?]-->[Resampler?]-->[PostProc?]-->[Writer]
//!                                     |
//!                                     +-- sample copy -->[IqOptimizer?]
//! [Watchdog?] observes the Reader heartbeat
//! ```
//!
//! Stages disabled by configuration are omitted and their queues spliced
//! together. Shutdown is cooperative everywhere except the watchdog, which
//! assumes a deadlocked driver and kills the process.

pub mod byte_ring;
pub mod context;
pub mod error;
pub mod events;
pub mod framed;
pub mod orchestrator;
pub mod queue;
pub mod stages;
pub mod thread_priority;

pub use byte_ring::ByteRing;
pub use context::{PipelineContext, Progress};
pub use error::{PipelineError, PipelineResult};
pub use events::PipelineEvent;
pub use framed::{FrameEvent, FramedRingBuffer};
pub use orchestrator::{Pipeline, RunSummary};
pub use queue::{ChunkQueue, FreeChunkPool, PipelineQueue};
