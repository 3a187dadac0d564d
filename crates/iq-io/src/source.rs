//! Source adapter contract and the file implementation
//!
//! A source runs in exactly one of three modes, fixed at startup:
//! - **File**: the Reader pulls whole blocks with `read_block`.
//! - **Buffered SDR**: the adapter's blocking loop pushes framed packets
//!   into a `FrameSink` (the pipeline's framed ring buffer) from a capture
//!   thread, issuing heartbeats through `StreamHooks`.
//! - **Realtime SDR**: the adapter fills chunks directly through a
//!   `ChunkPump` on the Reader's own thread.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use iq_core::config::PipelineConfig;
use iq_core::formats::SampleFormat;

use crate::error::{IoModError, IoModResult};

/// What a source learned about itself during initialization.
#[derive(Debug, Clone, Copy)]
pub struct SourceInfo {
    /// Format the source emits by default.
    pub format: SampleFormat,
    /// Native sample rate in Hz.
    pub sample_rate: f64,
    /// Total complex frames when knowable (files), `None` for live devices.
    pub total_frames: Option<u64>,
    /// Largest bytes-per-pair this source can ever emit; adaptive devices
    /// may switch formats mid-stream but never past this bound.
    pub max_bytes_per_sample_pair: usize,
}

/// The source's operating mode, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    File,
    BufferedSdr,
    RealtimeSdr,
}

/// Receiver for framed packets produced by a buffered-mode capture loop.
/// Writes are non-blocking; a `false` return means the frame was dropped
/// whole because the buffer lacked space.
pub trait FrameSink: Sync {
    fn write_interleaved_chunk(&self, format: SampleFormat, payload: &[u8]) -> bool;
    fn write_deinterleaved_chunk(&self, format: SampleFormat, i: &[u8], q: &[u8]) -> bool;
    fn write_reset_event(&self);
    fn end_of_stream(&self);
}

/// Receiver for samples delivered by a realtime-mode driver callback.
pub trait ChunkPump {
    /// Deliver interleaved payload bytes. Returns `false` once the pipeline
    /// is shutting down and the driver loop should exit.
    fn push_samples(&mut self, format: SampleFormat, payload: &[u8]) -> bool;
    /// Deliver a stream-discontinuity event.
    fn push_reset(&mut self) -> bool;
}

/// Callbacks a blocking capture loop uses to stay honest.
pub trait StreamHooks: Sync {
    /// Record driver liveness; feeds the watchdog.
    fn heartbeat(&self);
    /// True once shutdown has been requested.
    fn should_stop(&self) -> bool;
}

/// Blocking byte reader a sink's writer loop drains. Implemented by the
/// pipeline's writer ring; `None` means end of stream.
pub trait ByteStream {
    fn read_block(&self, buf: &mut [u8]) -> Option<usize>;
}

/// Contract every input module satisfies.
pub trait SampleSource: Send {
    /// Reject configurations this source cannot serve. Runs pre-stream.
    fn validate(&self, _config: &PipelineConfig) -> IoModResult<()> {
        Ok(())
    }

    /// Open the device or file and report its parameters.
    fn initialize(&mut self) -> IoModResult<SourceInfo>;

    fn mode(&self) -> SourceMode;

    /// File mode: read up to `buf.len()` bytes. Zero means end of stream.
    fn read_block(&mut self, _buf: &mut [u8]) -> IoModResult<usize> {
        Err(IoModError::Unsupported("read_block"))
    }

    /// Buffered SDR mode: run the blocking driver loop until end of stream
    /// or `hooks.should_stop()`.
    fn start_stream(&mut self, _frames: &dyn FrameSink, _hooks: &dyn StreamHooks) -> IoModResult<()> {
        Err(IoModError::Unsupported("start_stream"))
    }

    /// Realtime SDR mode: run the driver loop, filling chunks directly.
    fn run_realtime(&mut self, _pump: &mut dyn ChunkPump) -> IoModResult<()> {
        Err(IoModError::Unsupported("run_realtime"))
    }

    /// Interrupt a running `start_stream`. Idempotent.
    fn stop_stream(&mut self) {}

    fn has_known_length(&self) -> bool {
        false
    }

    /// One-line description for the run summary.
    fn summary(&self) -> String;

    /// File sources may hand out a calibration block (enough bytes for one
    /// estimator FFT) and rewind; live sources return `None`.
    fn pre_stream_samples(&mut self, _bytes: usize) -> IoModResult<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Release the device or file. Idempotent.
    fn cleanup(&mut self) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE SOURCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Raw sample file read in whole blocks.
pub struct FileSource {
    path: PathBuf,
    format: SampleFormat,
    sample_rate: f64,
    reader: Option<BufReader<File>>,
    total_frames: Option<u64>,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>, format: SampleFormat, sample_rate: f64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            format,
            sample_rate,
            reader: None,
            total_frames: None,
        }
    }
}

impl SampleSource for FileSource {
    fn initialize(&mut self) -> IoModResult<SourceInfo> {
        let file = File::open(&self.path)
            .map_err(|_| IoModError::InputNotFound(self.path.display().to_string()))?;

        let pair = self.format.bytes_per_sample_pair() as u64;
        let len = file.metadata()?.len();
        if len % pair != 0 {
            log::warn!(
                "{}: size {} is not a whole number of {} frames; trailing bytes ignored",
                self.path.display(),
                len,
                self.format
            );
        }
        self.total_frames = Some(len / pair);
        self.reader = Some(BufReader::with_capacity(1 << 20, file));

        Ok(SourceInfo {
            format: self.format,
            sample_rate: self.sample_rate,
            total_frames: self.total_frames,
            max_bytes_per_sample_pair: self.format.bytes_per_sample_pair(),
        })
    }

    fn mode(&self) -> SourceMode {
        SourceMode::File
    }

    fn read_block(&mut self, buf: &mut [u8]) -> IoModResult<usize> {
        let reader = self
            .reader
            .as_mut()
            .ok_or(IoModError::Unsupported("read before initialize"))?;

        // Fill as much of the block as the file allows; short reads happen
        // only at end of file.
        let mut filled = 0;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        // Truncate a trailing partial frame.
        let pair = self.format.bytes_per_sample_pair();
        Ok(filled - filled % pair)
    }

    fn has_known_length(&self) -> bool {
        true
    }

    fn summary(&self) -> String {
        format!(
            "file {} ({} at {} Hz, {} frames)",
            self.path.display(),
            self.format,
            self.sample_rate,
            self.total_frames
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".into()),
        )
    }

    fn pre_stream_samples(&mut self, bytes: usize) -> IoModResult<Option<Vec<u8>>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or(IoModError::Unsupported("read before initialize"))?;

        let mut block = vec![0u8; bytes];
        let mut filled = 0;
        while filled < block.len() {
            let n = reader.read(&mut block[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        reader.seek(SeekFrom::Start(0))?;

        if filled < bytes {
            // Too short for a calibration block; stream it normally.
            return Ok(None);
        }
        Ok(Some(block))
    }

    fn cleanup(&mut self) {
        self.reader = None;
    }
}
