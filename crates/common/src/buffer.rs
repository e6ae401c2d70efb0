//! Pooled byte buffers with release accounting.
//!
//! Every `Frame` and `Chunk` owns exactly one `PooledBuffer`. The buffer
//! returns itself to its pool when dropped, so release happens on every
//! exit path (normal consumption, fault cleanup, abort) and cannot happen
//! twice. The pool keeps acquire/release counters so callers can verify
//! that nothing leaked.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

/// Snapshot of a pool's accounting.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Buffers handed out since the pool was created.
    pub acquired: u64,
    /// Buffers returned since the pool was created.
    pub released: u64,
    /// Buffers currently held by someone.
    pub outstanding: u64,
    /// Highest `outstanding` value observed.
    pub peak_outstanding: u64,
}

impl BufferStats {
    /// Every acquired buffer has been released.
    pub fn is_balanced(&self) -> bool {
        self.acquired == self.released && self.outstanding == 0
    }
}

struct PoolInner {
    name: &'static str,
    max_free: usize,
    free: Mutex<Vec<Vec<u8>>>,
    acquired: AtomicU64,
    released: AtomicU64,
    peak: AtomicU64,
}

impl PoolInner {
    fn give_back(&self, mut data: Vec<u8>) {
        data.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_free {
            free.push(data);
        }
        drop(free);
        self.released.fetch_add(1, Ordering::AcqRel);
    }
}

/// A recycling pool of byte buffers shared between a producer stage and
/// whoever ends up holding its output.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool that keeps at most `max_free` idle buffers for reuse.
    pub fn new(name: &'static str, max_free: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name,
                max_free,
                free: Mutex::new(Vec::new()),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
                peak: AtomicU64::new(0),
            }),
        }
    }

    /// Acquire a zero-filled buffer of exactly `len` bytes.
    pub fn acquire(&self, len: usize) -> PooledBuffer {
        let mut data = self.inner.free.lock().pop().unwrap_or_default();
        data.resize(len, 0);
        self.record_acquire();
        PooledBuffer {
            data,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Acquire a buffer holding a copy of `bytes`.
    pub fn acquire_copy(&self, bytes: &[u8]) -> PooledBuffer {
        let mut data = self.inner.free.lock().pop().unwrap_or_default();
        data.extend_from_slice(bytes);
        self.record_acquire();
        PooledBuffer {
            data,
            pool: Arc::clone(&self.inner),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Number of idle buffers waiting for reuse.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }

    pub fn stats(&self) -> BufferStats {
        let acquired = self.inner.acquired.load(Ordering::Acquire);
        let released = self.inner.released.load(Ordering::Acquire);
        BufferStats {
            acquired,
            released,
            outstanding: acquired.saturating_sub(released),
            peak_outstanding: self.inner.peak.load(Ordering::Acquire),
        }
    }

    fn record_acquire(&self) {
        let acquired = self.inner.acquired.fetch_add(1, Ordering::AcqRel) + 1;
        let released = self.inner.released.load(Ordering::Acquire);
        let outstanding = acquired.saturating_sub(released);
        self.inner.peak.fetch_max(outstanding, Ordering::AcqRel);
        trace!(pool = self.inner.name, outstanding, "Buffer acquired");
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.inner.name)
            .field("max_free", &self.inner.max_free)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A byte buffer on loan from a [`BufferPool`]; returned on drop.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Append bytes, growing the buffer.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Name of the pool this buffer returns to.
    pub fn pool_name(&self) -> &'static str {
        self.pool.name
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.give_back(data);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("pool", &self.pool.name)
            .field("len", &self.data.len())
            .finish()
    }
}
