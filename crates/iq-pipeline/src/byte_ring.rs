//! Writer byte ring
//!
//! The coarse-grained buffer between the PostProcessor and a container
//! sink. Unlike the framed input buffer, the producer side blocks when
//! full - the DSP stages can afford to stall, the sink cannot be allowed
//! to lose bytes. File-mode readers poll `fill_ratio` and pause above the
//! high-water mark so the ring absorbs file-system hiccups instead of
//! growing without bound.

use parking_lot::{Condvar, Mutex};

use iq_io::source::ByteStream;

use crate::queue::ShutdownNotify;

struct RingState {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
    end_of_stream: bool,
    shutdown: bool,
}

/// Bounded blocking byte FIFO.
pub struct ByteRing {
    state: Mutex<RingState>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

impl ByteRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                buf: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                len: 0,
                end_of_stream: false,
                shutdown: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        }
    }

    /// Blocking write of the whole slice. Returns `false` on shutdown.
    pub fn write(&self, mut bytes: &[u8]) -> bool {
        while !bytes.is_empty() {
            let mut state = self.state.lock();
            while self.capacity - state.len == 0 && !state.shutdown {
                self.writable.wait(&mut state);
            }
            if state.shutdown {
                return false;
            }

            let space = self.capacity - state.len;
            let take = bytes.len().min(space);
            let tail = (state.head + state.len) % self.capacity;
            let first = take.min(self.capacity - tail);
            state.buf[tail..tail + first].copy_from_slice(&bytes[..first]);
            if first < take {
                let rest = take - first;
                state.buf[..rest].copy_from_slice(&bytes[first..take]);
            }
            state.len += take;
            drop(state);
            self.readable.notify_one();
            bytes = &bytes[take..];
        }
        true
    }

    /// Blocking read of up to `buf.len()` bytes. Returns `None` on
    /// shutdown, or at end-of-stream once the ring has drained.
    pub fn read(&self, buf: &mut [u8]) -> Option<usize> {
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

        let take = buf.len().min(state.len);
        let first = take.min(self.capacity - state.head);
        buf[..first].copy_from_slice(&state.buf[state.head..state.head + first]);
        if first < take {
            let rest = take - first;
            buf[first..take].copy_from_slice(&state.buf[..rest]);
        }
        state.head = (state.head + take) % self.capacity;
        state.len -= take;
        drop(state);
        self.writable.notify_one();
        Some(take)
    }

    /// Producer is done; the reader drains what remains.
    pub fn end_of_stream(&self) {
        let mut state = self.state.lock();
        state.end_of_stream = true;
        drop(state);
        self.readable.notify_all();
    }

    pub fn signal_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Current fill level as a fraction of capacity.
    pub fn fill_ratio(&self) -> f64 {
        self.state.lock().len as f64 / self.capacity as f64
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl ByteStream for ByteRing {
    fn read_block(&self, buf: &mut [u8]) -> Option<usize> {
        self.read(buf)
    }
}

impl ShutdownNotify for ByteRing {
    fn notify_shutdown(&self) {
        self.signal_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_write_read_round_trip() {
        let ring = ByteRing::new(64);
        assert!(ring.write(&[1, 2, 3, 4, 5]));
        let mut buf = [0u8; 8];
        assert_eq!(ring.read(&mut buf), Some(5));
        assert_eq!(&buf[..5], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_blocking_write_resumes_after_drain() {
        let ring = Arc::new(ByteRing::new(16));
        assert!(ring.write(&[0u8; 16]));
        assert!((ring.fill_ratio() - 1.0).abs() < f64::EPSILON);

        let writer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.write(&[7u8; 8]))
        };
        thread::sleep(Duration::from_millis(50));

        let mut buf = [0u8; 16];
        assert_eq!(ring.read(&mut buf), Some(16));
        assert!(writer.join().unwrap());
        assert_eq!(ring.read(&mut buf), Some(8));
        assert_eq!(&buf[..8], &[7u8; 8]);
    }

    #[test]
    fn test_end_of_stream_after_drain() {
        let ring = ByteRing::new(32);
        ring.write(&[9u8; 4]);
        ring.end_of_stream();

        let mut buf = [0u8; 32];
        assert_eq!(ring.read(&mut buf), Some(4));
        assert_eq!(ring.read(&mut buf), None);
    }

    #[test]
    fn test_shutdown_unblocks_both_sides() {
        let ring = Arc::new(ByteRing::new(8));
        ring.write(&[0u8; 8]);

        let writer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.write(&[1u8; 4]))
        };
        thread::sleep(Duration::from_millis(50));
        ring.signal_shutdown();
        assert!(!writer.join().unwrap());

        let mut buf = [0u8; 8];
        assert_eq!(ring.read(&mut buf), None);
    }

    #[test]
    fn test_wraparound() {
        let ring = ByteRing::new(8);
        let mut buf = [0u8; 8];
        for round in 0u8..10 {
            assert!(ring.write(&[round; 5]));
            assert_eq!(ring.read(&mut buf), Some(5));
            assert_eq!(&buf[..5], &[round; 5]);
        }
    }

    #[test]
    fn test_fill_ratio_tracks_level() {
        let ring = ByteRing::new(100);
        assert_eq!(ring.fill_ratio(), 0.0);
        ring.write(&[0u8; 95]);
        assert!(ring.fill_ratio() > 0.94);
    }
}
