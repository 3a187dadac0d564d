//! Bounded blocking queues and the free-chunk pool
//!
//! Every inter-stage hop uses the same bounded FIFO. Queues transfer
//! ownership only; backpressure comes from the pool running dry or a queue
//! filling up. Shutdown wakes all waiters: producers fail fast, consumers
//! drain what remains and then see end-of-stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use iq_core::chunk::{Chunk, ChunkCapacities};
use iq_core::formats::SampleFormat;

/// Anything that must be woken when the pipeline shuts down.
pub trait ShutdownNotify: Send + Sync {
    fn notify_shutdown(&self);
}

struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Bounded blocking FIFO with drain-then-end shutdown semantics.
pub struct PipelineQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> PipelineQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Blocking enqueue. Waits while full; after shutdown the element comes
    /// back to the caller so it can be returned to the pool.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.shutdown {
            self.not_full.wait(&mut state);
        }
        if state.shutdown {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocking dequeue. Waits while empty; after shutdown remaining items
    /// drain, then `None` reports end-of-stream.
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.shutdown {
            self.not_empty.wait(&mut state);
        }
        let item = state.items.pop_front();
        drop(state);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Non-blocking dequeue.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.items.pop_front();
        drop(state);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Signal shutdown and wake every waiter.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send> ShutdownNotify for PipelineQueue<T> {
    fn notify_shutdown(&self) {
        self.shutdown();
    }
}

/// Queue of chunk handles; the only element type the pipeline moves.
pub type ChunkQueue = PipelineQueue<Box<Chunk>>;

// ═══════════════════════════════════════════════════════════════════════════════
// FREE CHUNK POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// The sole allocator of pipeline working memory: a bounded FIFO of empty
/// chunks, filled once at startup and recycled until teardown.
pub struct FreeChunkPool {
    queue: ChunkQueue,
    total: usize,
    /// Sticky flag raised whenever a training copy was skipped for lack of
    /// a free chunk; purely diagnostic.
    starved: AtomicBool,
}

impl FreeChunkPool {
    pub fn new(count: usize, caps: &ChunkCapacities, initial_format: SampleFormat) -> Self {
        let queue = ChunkQueue::new(count);
        for _ in 0..count {
            // Freshly built queue with spare capacity; enqueue cannot fail.
            let _ = queue.enqueue(Box::new(Chunk::allocate(caps, initial_format)));
        }
        Self {
            queue,
            total: count,
            starved: AtomicBool::new(false),
        }
    }

    /// Blocking acquire; `None` once shutdown has drained the pool.
    pub fn acquire(&self) -> Option<Box<Chunk>> {
        self.queue.dequeue()
    }

    /// Non-blocking acquire for best-effort users (the training copy).
    pub fn try_acquire(&self) -> Option<Box<Chunk>> {
        let chunk = self.queue.try_dequeue();
        if chunk.is_none() {
            self.starved.store(true, Ordering::Relaxed);
        }
        chunk
    }

    /// Return a chunk, cleared, to the pool.
    pub fn release(&self, mut chunk: Box<Chunk>) {
        chunk.reset();
        // During shutdown the recycle fails and the chunk drops here, which
        // is exactly teardown.
        let _ = self.queue.enqueue(chunk);
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    /// Chunks currently at rest in the pool.
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Chunks the pool was built with.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn was_starved(&self) -> bool {
        self.starved.load(Ordering::Relaxed)
    }
}

impl ShutdownNotify for FreeChunkPool {
    fn notify_shutdown(&self) {
        self.shutdown();
    }
}
