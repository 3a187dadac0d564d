//! iq-io: source and sink adapters
//!
//! The pipeline never talks to a device or file directly; it speaks the
//! two contracts defined here:
//! - `source` - where samples come from: the `SampleSource` trait, its
//!   three operating modes, and the file implementation
//! - `sink` - where bytes go: the `OutputSink` trait plus raw-file, WAV,
//!   RF64, and stdout implementations
//! - `container` - streaming WAV/RF64 headers with finalize-time patching
//!
//! Hook traits (`FrameSink`, `ChunkPump`, `ByteStream`) are defined on this
//! side of the boundary so a driver adapter depends only on iq-io, never on
//! the pipeline internals.

pub mod container;
pub mod error;
pub mod sink;
pub mod source;

pub use error::{IoModError, IoModResult};
pub use sink::{FileSink, OutputSink, StdoutSink};
pub use source::{
    ByteStream, ChunkPump, FileSource, FrameSink, SampleSource, SourceInfo, SourceMode,
    StreamHooks,
};
