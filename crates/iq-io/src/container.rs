//! Streaming WAV and RF64 containers
//!
//! Headers are written before the first sample with placeholder sizes and
//! patched on finalize. RF64 keeps its sizes in a ds64 chunk so streams
//! past 4 GiB stay well-formed; plain WAV saturates its 32-bit fields and
//! warns.

use std::io::{Seek, SeekFrom, Write};

use iq_core::formats::SampleFormat;

use crate::error::{IoModError, IoModResult};

/// Container flavor of a file sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Headerless sample dump.
    Raw,
    Wav,
    Rf64,
}

/// WAVE `fmt ` fields derived from a sample format.
#[derive(Debug, Clone, Copy)]
pub struct WavParams {
    pub format_code: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;

/// Total header bytes before sample data.
pub fn header_len(kind: ContainerKind) -> u64 {
    match kind {
        ContainerKind::Raw => 0,
        // RIFF(12) + fmt(24) + data(8)
        ContainerKind::Wav => 44,
        // RF64(12) + ds64(36) + fmt(24) + data(8)
        ContainerKind::Rf64 => 80,
    }
}

/// Map a sample format onto WAVE fields.
///
/// WAVE constrains the encodings: 8-bit data is unsigned, wider integers
/// are signed, and 32-bit may be float. Formats outside that set are
/// refused before streaming starts.
pub fn wav_params_for(format: SampleFormat, sample_rate: f64) -> IoModResult<WavParams> {
    let format_code = match format {
        SampleFormat::U8 | SampleFormat::Cu8 => WAVE_FORMAT_PCM,
        SampleFormat::S16 | SampleFormat::Cs16 | SampleFormat::Sc16Q11 => WAVE_FORMAT_PCM,
        SampleFormat::S32 | SampleFormat::Cs32 => WAVE_FORMAT_PCM,
        SampleFormat::F32 | SampleFormat::Cf32 => WAVE_FORMAT_IEEE_FLOAT,
        _ => {
            return Err(IoModError::UnsupportedContainerFormat(format!(
                "{format} cannot be expressed in a WAVE container"
            )))
        }
    };
    Ok(WavParams {
        format_code,
        channels: if format.is_complex() { 2 } else { 1 },
        sample_rate: sample_rate as u32,
        bits_per_sample: (format.bytes_per_component() * 8) as u16,
    })
}

/// Write the container preamble with placeholder sizes.
pub fn write_header<W: Write>(
    writer: &mut W,
    kind: ContainerKind,
    params: &WavParams,
) -> IoModResult<()> {
    match kind {
        ContainerKind::Raw => Ok(()),
        ContainerKind::Wav => {
            writer.write_all(b"RIFF")?;
            writer.write_all(&0u32.to_le_bytes())?;
            writer.write_all(b"WAVE")?;
            write_fmt_chunk(writer, params)?;
            writer.write_all(b"data")?;
            writer.write_all(&0u32.to_le_bytes())?;
            Ok(())
        }
        ContainerKind::Rf64 => {
            writer.write_all(b"RF64")?;
            writer.write_all(&0xFFFF_FFFFu32.to_le_bytes())?;
            writer.write_all(b"WAVE")?;
            // ds64 payload: riff size, data size, sample count, table len.
            writer.write_all(b"ds64")?;
            writer.write_all(&28u32.to_le_bytes())?;
            writer.write_all(&0u64.to_le_bytes())?;
            writer.write_all(&0u64.to_le_bytes())?;
            writer.write_all(&0u64.to_le_bytes())?;
            writer.write_all(&0u32.to_le_bytes())?;
            write_fmt_chunk(writer, params)?;
            writer.write_all(b"data")?;
            writer.write_all(&0xFFFF_FFFFu32.to_le_bytes())?;
            Ok(())
        }
    }
}

fn write_fmt_chunk<W: Write>(writer: &mut W, params: &WavParams) -> IoModResult<()> {
    let block_align = params.channels * params.bits_per_sample / 8;
    let byte_rate = params.sample_rate * block_align as u32;
    writer.write_all(b"fmt ")?;
    writer.write_all(&16u32.to_le_bytes())?;
    writer.write_all(&params.format_code.to_le_bytes())?;
    writer.write_all(&params.channels.to_le_bytes())?;
    writer.write_all(&params.sample_rate.to_le_bytes())?;
    writer.write_all(&byte_rate.to_le_bytes())?;
    writer.write_all(&block_align.to_le_bytes())?;
    writer.write_all(&params.bits_per_sample.to_le_bytes())?;
    Ok(())
}

/// Patch the placeholder sizes once the data length is known.
pub fn patch_sizes<W: Write + Seek>(
    writer: &mut W,
    kind: ContainerKind,
    params: &WavParams,
    data_bytes: u64,
) -> IoModResult<()> {
    match kind {
        ContainerKind::Raw => Ok(()),
        ContainerKind::Wav => {
            let riff_size = data_bytes + header_len(ContainerKind::Wav) - 8;
            if riff_size > u32::MAX as u64 {
                log::warn!(
                    "WAV stream of {data_bytes} data bytes exceeds the 4 GiB RIFF limit; \
                     sizes saturate (use rf64 next time)"
                );
            }
            writer.seek(SeekFrom::Start(4))?;
            writer.write_all(&(riff_size.min(u32::MAX as u64) as u32).to_le_bytes())?;
            writer.seek(SeekFrom::Start(40))?;
            writer.write_all(&(data_bytes.min(u32::MAX as u64) as u32).to_le_bytes())?;
            Ok(())
        }
        ContainerKind::Rf64 => {
            let riff_size = data_bytes + header_len(ContainerKind::Rf64) - 8;
            let frame_bytes = (params.channels * params.bits_per_sample / 8) as u64;
            let sample_count = if frame_bytes > 0 {
                data_bytes / frame_bytes
            } else {
                0
            };
            // ds64 payload starts after "RF64____WAVE" + "ds64" + size.
            writer.seek(SeekFrom::Start(20))?;
            writer.write_all(&riff_size.to_le_bytes())?;
            writer.write_all(&data_bytes.to_le_bytes())?;
            writer.write_all(&sample_count.to_le_bytes())?;
            Ok(())
        }
    }
}
