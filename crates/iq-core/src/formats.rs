//! Sample-format catalogue
//!
//! Fifteen wire formats: real and complex variants of the common integer
//! widths, 32-bit float, and the Q4.11 fixed-point layout some front ends
//! emit. Conversion normalizes to `Complex<f32>` on the way in and uses
//! symmetric rounding with saturation on the way out. Real formats carry
//! one value per frame (the imaginary part is zero inbound and discarded
//! outbound); complex formats interleave I, Q, I, Q.
//!
//! All multi-byte layouts are little-endian.

use std::fmt;
use std::str::FromStr;

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Largest SC16Q11 value representable in the underlying i16.
const SC16Q11_FULL_SCALE: f32 = 32767.0 / 2048.0;

/// Wire format of a sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
    F32,
    Cu8,
    Cs8,
    Cu16,
    Cs16,
    Cu32,
    Cs32,
    Cf32,
    Sc16Q11,
}

impl SampleFormat {
    /// Every catalogue entry, in tag order.
    pub const ALL: [SampleFormat; 15] = [
        SampleFormat::U8,
        SampleFormat::S8,
        SampleFormat::U16,
        SampleFormat::S16,
        SampleFormat::U32,
        SampleFormat::S32,
        SampleFormat::F32,
        SampleFormat::Cu8,
        SampleFormat::Cs8,
        SampleFormat::Cu16,
        SampleFormat::Cs16,
        SampleFormat::Cu32,
        SampleFormat::Cs32,
        SampleFormat::Cf32,
        SampleFormat::Sc16Q11,
    ];

    /// True when the format interleaves I and Q components.
    pub fn is_complex(self) -> bool {
        matches!(
            self,
            SampleFormat::Cu8
                | SampleFormat::Cs8
                | SampleFormat::Cu16
                | SampleFormat::Cs16
                | SampleFormat::Cu32
                | SampleFormat::Cs32
                | SampleFormat::Cf32
                | SampleFormat::Sc16Q11
        )
    }

    /// Width of a single component in bytes.
    pub fn bytes_per_component(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::S8 | SampleFormat::Cu8 | SampleFormat::Cs8 => 1,
            SampleFormat::U16
            | SampleFormat::S16
            | SampleFormat::Cu16
            | SampleFormat::Cs16
            | SampleFormat::Sc16Q11 => 2,
            SampleFormat::U32
            | SampleFormat::S32
            | SampleFormat::F32
            | SampleFormat::Cu32
            | SampleFormat::Cs32
            | SampleFormat::Cf32 => 4,
        }
    }

    /// Bytes one complex frame occupies on the wire. Real formats carry a
    /// single component per frame.
    pub fn bytes_per_sample_pair(self) -> usize {
        if self.is_complex() {
            2 * self.bytes_per_component()
        } else {
            self.bytes_per_component()
        }
    }

    /// Wire tag used by framed packets.
    pub fn tag(self) -> u8 {
        SampleFormat::ALL
            .iter()
            .position(|&f| f == self)
            .map(|i| i as u8)
            .unwrap_or(0)
    }

    /// Inverse of [`SampleFormat::tag`].
    pub fn from_tag(tag: u8) -> Result<SampleFormat, CoreError> {
        SampleFormat::ALL
            .get(tag as usize)
            .copied()
            .ok_or(CoreError::UnknownFormatTag(tag))
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S8 => "s8",
            SampleFormat::U16 => "u16",
            SampleFormat::S16 => "s16",
            SampleFormat::U32 => "u32",
            SampleFormat::S32 => "s32",
            SampleFormat::F32 => "f32",
            SampleFormat::Cu8 => "cu8",
            SampleFormat::Cs8 => "cs8",
            SampleFormat::Cu16 => "cu16",
            SampleFormat::Cs16 => "cs16",
            SampleFormat::Cu32 => "cu32",
            SampleFormat::Cs32 => "cs32",
            SampleFormat::Cf32 => "cf32",
            SampleFormat::Sc16Q11 => "sc16q11",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        SampleFormat::ALL
            .iter()
            .copied()
            .find(|f| f.name() == lower)
            .ok_or_else(|| CoreError::UnknownFormat(s.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT CODECS
// ═══════════════════════════════════════════════════════════════════════════════

#[inline]
fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

#[inline]
fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Decode one component to a normalized float. 32-bit widths go through f64
/// so the half-LSB offsets survive the trip.
#[inline]
fn decode_component(format: SampleFormat, bytes: &[u8]) -> f32 {
    match format {
        SampleFormat::U8 | SampleFormat::Cu8 => (bytes[0] as f32 - 127.5) / 127.5,
        SampleFormat::S8 | SampleFormat::Cs8 => bytes[0] as i8 as f32 / 127.0,
        SampleFormat::U16 | SampleFormat::Cu16 => (read_u16(bytes) as f32 - 32767.5) / 32767.5,
        SampleFormat::S16 | SampleFormat::Cs16 => read_u16(bytes) as i16 as f32 / 32767.0,
        SampleFormat::U32 | SampleFormat::Cu32 => {
            ((read_u32(bytes) as f64 - 2147483647.5) / 2147483647.5) as f32
        }
        SampleFormat::S32 | SampleFormat::Cs32 => {
            (read_u32(bytes) as i32 as f64 / 2147483647.0) as f32
        }
        SampleFormat::F32 | SampleFormat::Cf32 => f32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]),
        SampleFormat::Sc16Q11 => read_u16(bytes) as i16 as f32 / 2048.0,
    }
}

/// Symmetric round and saturate into an integer range expressed in f64.
#[inline]
fn round_saturate(value: f64, min: f64, max: f64) -> f64 {
    value.round().clamp(min, max)
}

/// Encode one normalized float into its wire representation.
#[inline]
fn encode_component(format: SampleFormat, value: f32, out: &mut [u8]) {
    match format {
        SampleFormat::U8 | SampleFormat::Cu8 => {
            out[0] = round_saturate(value as f64 * 127.5 + 127.5, 0.0, 255.0) as u8;
        }
        SampleFormat::S8 | SampleFormat::Cs8 => {
            out[0] = round_saturate(value as f64 * 127.0, -128.0, 127.0) as i8 as u8;
        }
        SampleFormat::U16 | SampleFormat::Cu16 => {
            let v = round_saturate(value as f64 * 32767.5 + 32767.5, 0.0, 65535.0) as u16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::S16 | SampleFormat::Cs16 => {
            let v = round_saturate(value as f64 * 32767.0, -32768.0, 32767.0) as i16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::U32 | SampleFormat::Cu32 => {
            let v = round_saturate(
                value as f64 * 2147483647.5 + 2147483647.5,
                0.0,
                4294967295.0,
            ) as u32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::S32 | SampleFormat::Cs32 => {
            let v = round_saturate(value as f64 * 2147483647.0, -2147483648.0, 2147483647.0) as i32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::F32 | SampleFormat::Cf32 => {
            out[..4].copy_from_slice(&value.to_le_bytes());
        }
        SampleFormat::Sc16Q11 => {
            let clamped = value.clamp(-SC16Q11_FULL_SCALE, SC16Q11_FULL_SCALE);
            let v = round_saturate(clamped as f64 * 2048.0, -32768.0, 32767.0) as i16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRAME CONVERSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert interleaved wire bytes to complex frames.
///
/// Returns the number of frames produced. `bytes.len()` must be a whole
/// number of sample pairs and `out` must have room for them.
pub fn bytes_to_complex(format: SampleFormat, bytes: &[u8], out: &mut [Complex<f32>]) -> usize {
    let pair = format.bytes_per_sample_pair();
    let frames = bytes.len() / pair;
    debug_assert!(out.len() >= frames);

    let width = format.bytes_per_component();
    if format.is_complex() {
        for (frame, sample) in bytes.chunks_exact(pair).zip(out.iter_mut()) {
            sample.re = decode_component(format, &frame[..width]);
            sample.im = decode_component(format, &frame[width..]);
        }
    } else {
        for (frame, sample) in bytes.chunks_exact(pair).zip(out.iter_mut()) {
            sample.re = decode_component(format, frame);
            sample.im = 0.0;
        }
    }
    frames
}

/// Convert complex frames to interleaved wire bytes.
///
/// Returns the number of bytes produced. Real formats write the in-phase
/// component only.
pub fn complex_to_bytes(format: SampleFormat, samples: &[Complex<f32>], out: &mut [u8]) -> usize {
    let pair = format.bytes_per_sample_pair();
    let total = samples.len() * pair;
    debug_assert!(out.len() >= total);

    let width = format.bytes_per_component();
    if format.is_complex() {
        for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(pair)) {
            encode_component(format, sample.re, &mut frame[..width]);
            encode_component(format, sample.im, &mut frame[width..]);
        }
    } else {
        for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(pair)) {
            encode_component(format, sample.re, frame);
        }
    }
    total
}
