//! Framed ring buffer between driver callbacks and the Reader
//!
//! A bounded byte FIFO carrying self-describing frames:
//!
//! ```text
//! DATA frame:  [0x00][format_tag:u8][payload_len:u32 LE][payload...]
//! RESET frame: [0x01]
//! ```
//!
//! The writer side never blocks: a frame that does not fit the remaining
//! space is dropped whole and counted as an overrun - a driver callback
//! must not stall on a slow consumer. The reader side blocks until a
//! complete frame is available; partial frames are never observable.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use iq_core::formats::SampleFormat;
use iq_io::source::FrameSink;

use crate::queue::ShutdownNotify;

const TAG_DATA: u8 = 0x00;
const TAG_RESET: u8 = 0x01;
const DATA_HEADER_LEN: usize = 1 + 1 + 4;

/// What the Reader pulled off the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// Stream discontinuity marker.
    Reset,
    /// Sample payload: the declared format and the byte count written to
    /// the destination buffer.
    Data {
        format: SampleFormat,
        payload_len: usize,
    },
}

struct RingState {
    buf: Box<[u8]>,
    /// Read position.
    head: usize,
    /// Bytes currently stored.
    len: usize,
    end_of_stream: bool,
    shutdown: bool,
}

impl RingState {
    fn write_bytes(&mut self, capacity: usize, bytes: &[u8]) {
        let tail = (self.head + self.len) % capacity;
        let first = bytes.len().min(capacity - tail);
        self.buf[tail..tail + first].copy_from_slice(&bytes[..first]);
        if first < bytes.len() {
            self.buf[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        }
        self.len += bytes.len();
    }

    fn read_bytes(&mut self, capacity: usize, out: &mut [u8]) {
        let first = out.len().min(capacity - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        if first < out.len() {
            let rest = out.len() - first;
            out[first..].copy_from_slice(&self.buf[..rest]);
        }
        self.head = (self.head + out.len()) % capacity;
        self.len -= out.len();
    }

    /// Discard bytes without copying them out.
    fn skip_bytes(&mut self, capacity: usize, count: usize) {
        self.head = (self.head + count) % capacity;
        self.len -= count;
    }
}

/// Byte-level SPSC buffer carrying length-prefixed SDR packets.
pub struct FramedRingBuffer {
    state: Mutex<RingState>,
    readable: Condvar,
    capacity: usize,
    /// Largest DATA payload a single frame may carry; longer writes are
    /// split so the Reader's chunk buffers always fit a whole frame.
    max_payload: usize,
    overruns: AtomicU64,
}

impl FramedRingBuffer {
    pub fn new(capacity: usize, max_payload: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                buf: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                len: 0,
                end_of_stream: false,
                shutdown: false,
            }),
            readable: Condvar::new(),
            capacity,
            max_payload,
            overruns: AtomicU64::new(0),
        }
    }

    /// Append one whole frame or drop it. Never blocks.
    fn write_frame(&self, header: &[u8], payload: &[u8]) -> bool {
        let total = header.len() + payload.len();
        let mut state = self.state.lock();
        if state.shutdown || state.end_of_stream {
            return false;
        }
        if self.capacity - state.len < total {
            drop(state);
            let dropped = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!("input buffer overrun: dropped a {total}-byte frame (total {dropped})");
            return false;
        }
        state.write_bytes(self.capacity, header);
        state.write_bytes(self.capacity, payload);
        drop(state);
        self.readable.notify_one();
        true
    }

    fn write_data_frame(&self, format: SampleFormat, payload: &[u8]) -> bool {
        let mut header = [0u8; DATA_HEADER_LEN];
        header[0] = TAG_DATA;
        header[1] = format.tag();
        header[2..6].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        self.write_frame(&header, payload)
    }

    /// Blocking read of the next whole frame. DATA payloads land in `dest`.
    /// Returns `None` on shutdown, or at end-of-stream once drained.
    pub fn read_frame(&self, dest: &mut [u8]) -> Option<FrameEvent> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if state.len > 0 {
                break;
            }
            if state.end_of_stream {
                return None;
            }
            self.readable.wait(&mut state);
        }

        let mut tag = [0u8; 1];
        state.read_bytes(self.capacity, &mut tag);
        match tag[0] {
            TAG_RESET => Some(FrameEvent::Reset),
            TAG_DATA => {
                let mut rest = [0u8; DATA_HEADER_LEN - 1];
                state.read_bytes(self.capacity, &mut rest);
                let format = SampleFormat::from_tag(rest[0]).unwrap_or(SampleFormat::Cu8);
                let payload_len =
                    u32::from_le_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;

                if payload_len > dest.len() {
                    // Cannot happen with a well-behaved producer (payloads
                    // are split against max_payload); drop defensively.
                    state.skip_bytes(self.capacity, payload_len);
                    log::error!(
                        "framed packet of {payload_len} bytes exceeds the chunk buffer ({})",
                        dest.len()
                    );
                    Some(FrameEvent::Data {
                        format,
                        payload_len: 0,
                    })
                } else {
                    state.read_bytes(self.capacity, &mut dest[..payload_len]);
                    Some(FrameEvent::Data {
                        format,
                        payload_len,
                    })
                }
            }
            unknown => {
                // Corrupted stream; there is no way to resynchronize a byte
                // FIFO, so surface end-of-stream.
                log::error!("corrupt frame tag {unknown:#04x} on input buffer");
                state.shutdown = true;
                None
            }
        }
    }

    /// Producer is done; the reader drains what remains.
    pub fn signal_end_of_stream(&self) {
        let mut state = self.state.lock();
        state.end_of_stream = true;
        drop(state);
        self.readable.notify_all();
    }

    /// Abandon the stream immediately.
    pub fn signal_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.readable.notify_all();
    }

    pub fn overrun_count(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Bytes currently buffered.
    pub fn level(&self) -> usize {
        self.state.lock().len
    }
}

impl FrameSink for FramedRingBuffer {
    fn write_interleaved_chunk(&self, format: SampleFormat, payload: &[u8]) -> bool {
        // Split so every frame fits the Reader's chunk buffers. A dropped
        // piece does not abort the rest; each frame stands alone.
        let mut all_ok = true;
        for piece in payload.chunks(self.max_payload.max(1)) {
            all_ok &= self.write_data_frame(format, piece);
        }
        all_ok
    }

    fn write_deinterleaved_chunk(&self, format: SampleFormat, i: &[u8], q: &[u8]) -> bool {
        let width = format.bytes_per_component();
        let frames = (i.len() / width).min(q.len() / width);
        let mut interleaved = Vec::with_capacity(frames * width * 2);
        for f in 0..frames {
            interleaved.extend_from_slice(&i[f * width..(f + 1) * width]);
            interleaved.extend_from_slice(&q[f * width..(f + 1) * width]);
        }
        self.write_interleaved_chunk(format, &interleaved)
    }

    fn write_reset_event(&self) {
        self.write_frame(&[TAG_RESET], &[]);
    }

    fn end_of_stream(&self) {
        self.signal_end_of_stream();
    }
}

impl ShutdownNotify for FramedRingBuffer {
    fn notify_shutdown(&self) {
        self.signal_shutdown();
    }
}
