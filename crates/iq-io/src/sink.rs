//! Sink adapter contract and the file/stdout implementations
//!
//! A sink either drains the pipeline's byte ring from its own writer
//! thread (`run_writer`, the default for files) or takes chunks directly
//! off the writer queue (`direct_write`, the stdout path).

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use iq_core::formats::SampleFormat;
use iq_core::tunables::IO_FILE_WRITER_CHUNK_SIZE;

use crate::container::{self, ContainerKind, WavParams};
use crate::error::{IoModError, IoModResult};
use crate::source::ByteStream;

/// Contract every output module satisfies.
pub trait OutputSink: Send {
    /// Open the destination and write any container preamble.
    fn initialize(&mut self) -> IoModResult<()>;

    /// Write bytes, returning how many were accepted (short writes allowed).
    fn write_chunk(&mut self, bytes: &[u8]) -> IoModResult<usize>;

    /// Close the container (patch sizes, flush). Idempotent.
    fn finalize(&mut self) -> IoModResult<()>;

    fn summary(&self) -> String;

    /// True when the sink wants whole chunks from the writer queue instead
    /// of a byte-ring drain loop.
    fn direct_write(&self) -> bool {
        false
    }

    /// Blocking drain loop: read ring slices, push them to the sink, report
    /// progress. Runs on the Writer thread until end of stream.
    fn run_writer(
        &mut self,
        stream: &dyn ByteStream,
        progress: &mut dyn FnMut(usize),
    ) -> IoModResult<()> {
        let mut buf = vec![0u8; IO_FILE_WRITER_CHUNK_SIZE];
        while let Some(n) = stream.read_block(&mut buf) {
            let mut offset = 0;
            while offset < n {
                let written = self.write_chunk(&buf[offset..n])?;
                if written == 0 {
                    return Err(IoModError::Sink("sink accepted zero bytes".into()));
                }
                offset += written;
            }
            progress(n);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE SINK (raw / WAV / RF64)
// ═══════════════════════════════════════════════════════════════════════════════

/// File destination in any of the three container flavors.
pub struct FileSink {
    path: PathBuf,
    kind: ContainerKind,
    format: SampleFormat,
    sample_rate: f64,
    params: Option<WavParams>,
    writer: Option<BufWriter<File>>,
    data_bytes: u64,
    finalized: bool,
}

impl FileSink {
    pub fn new(
        path: impl AsRef<Path>,
        kind: ContainerKind,
        format: SampleFormat,
        sample_rate: f64,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            kind,
            format,
            sample_rate,
            params: None,
            writer: None,
            data_bytes: 0,
            finalized: false,
        }
    }

    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }
}

impl OutputSink for FileSink {
    fn initialize(&mut self) -> IoModResult<()> {
        let params = match self.kind {
            ContainerKind::Raw => WavParams {
                format_code: 0,
                channels: 0,
                sample_rate: 0,
                bits_per_sample: 0,
            },
            _ => container::wav_params_for(self.format, self.sample_rate)?,
        };

        let file = File::create(&self.path)?;
        let mut writer = BufWriter::with_capacity(1 << 20, file);
        container::write_header(&mut writer, self.kind, &params)?;

        self.params = Some(params);
        self.writer = Some(writer);
        self.data_bytes = 0;
        self.finalized = false;
        Ok(())
    }

    fn write_chunk(&mut self, bytes: &[u8]) -> IoModResult<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(IoModError::Unsupported("write before initialize"))?;
        writer.write_all(bytes)?;
        self.data_bytes += bytes.len() as u64;
        Ok(bytes.len())
    }

    fn finalize(&mut self) -> IoModResult<()> {
        if self.finalized {
            return Ok(());
        }
        if let (Some(mut writer), Some(params)) = (self.writer.take(), self.params) {
            writer.flush()?;
            let mut file = writer
                .into_inner()
                .map_err(|e| IoModError::Sink(e.to_string()))?;
            container::patch_sizes(&mut file, self.kind, &params, self.data_bytes)?;
            file.flush()?;
            file.seek(std::io::SeekFrom::End(0))?;
        }
        self.finalized = true;
        Ok(())
    }

    fn summary(&self) -> String {
        format!(
            "{} {} ({} at {} Hz)",
            match self.kind {
                ContainerKind::Raw => "raw file",
                ContainerKind::Wav => "wav file",
                ContainerKind::Rf64 => "rf64 file",
            },
            self.path.display(),
            self.format,
            self.sample_rate,
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STDOUT SINK
// ═══════════════════════════════════════════════════════════════════════════════

/// Stream straight to standard output; takes the chunk-queue path so no
/// gigabyte ring sits between the PostProcessor and the pipe.
pub struct StdoutSink {
    format: SampleFormat,
    bytes_written: u64,
}

impl StdoutSink {
    pub fn new(format: SampleFormat) -> Self {
        Self {
            format,
            bytes_written: 0,
        }
    }
}

impl OutputSink for StdoutSink {
    fn initialize(&mut self) -> IoModResult<()> {
        Ok(())
    }

    fn write_chunk(&mut self, bytes: &[u8]) -> IoModResult<usize> {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        lock.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(bytes.len())
    }

    fn finalize(&mut self) -> IoModResult<()> {
        std::io::stdout().lock().flush()?;
        Ok(())
    }

    fn summary(&self) -> String {
        format!("stdout ({})", self.format)
    }

    fn direct_write(&self) -> bool {
        true
    }
}
