//! Pooled byte buffers and recyclable scratch collections.
//!
//! Goal: avoid an allocation per datagram on the hot send/receive path.
//! Pools are coarse (one stack of buffers, one stack of sequence scratch
//! vectors) guarded by `parking_lot::Mutex`, which is cheap enough here
//! since buffers are only held long enough to push/pop.

use std::collections::HashSet;

use bytes::BytesMut;
use parking_lot::Mutex;

/// Bounds for the buffer pool. Mirrors the `allocator_*` fields of
/// [`crate::config::HostConfig`].
#[derive(Debug, Clone, Copy)]
pub struct AllocatorConfig {
    /// Number of buffers kept warm in the pool.
    pub pooled_count: usize,
    /// Initial capacity of a pooled buffer.
    pub pooled_length: usize,
    /// Amount a pooled buffer is allowed to grow before being recycled.
    pub pooled_expand_length: usize,
    /// Amount a freshly allocated (non-pooled) buffer grows by when too small.
    pub expand_length: usize,
    /// Hard cap on any single buffer's capacity; oversized buffers are dropped
    /// instead of returned to the pool.
    pub max_length: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            pooled_count: 64,
            pooled_length: 1200,
            pooled_expand_length: 4096,
            expand_length: 1200,
            max_length: 1 << 20,
        }
    }
}

/// Thread-safe recycler for byte buffers and scratch collections used by the
/// send/receive pipelines.
pub struct Allocator {
    cfg: AllocatorConfig,
    buffers: Mutex<Vec<BytesMut>>,
    unique_sets: Mutex<Vec<HashSet<(u8, u16)>>>,
}

impl Allocator {
    pub fn new(cfg: AllocatorConfig) -> Self {
        Self {
            cfg,
            buffers: Mutex::new(Vec::with_capacity(cfg.pooled_count)),
            unique_sets: Mutex::new(Vec::new()),
        }
    }

    /// Borrows a buffer with at least `min_len` spare capacity, reusing a
    /// pooled one if available.
    pub fn buffer(&self, min_len: usize) -> BytesMut {
        let mut pool = self.buffers.lock();
        if let Some(mut buf) = pool.pop() {
            buf.clear();
            if buf.capacity() < min_len {
                buf.reserve(min_len - buf.capacity());
            }
            return buf;
        }
        drop(pool);
        BytesMut::with_capacity(min_len.max(self.cfg.pooled_length))
    }

    /// Returns a buffer to the pool unless it has grown past the configured
    /// cap, in which case it is simply dropped.
    pub fn recycle(&self, buf: BytesMut) {
        if buf.capacity() > self.cfg.max_length {
            return;
        }
        let mut pool = self.buffers.lock();
        if pool.len() < self.cfg.pooled_count {
            pool.push(buf);
        }
    }

    /// Borrows a scratch `(channel, sequence)` set, used transiently while
    /// sweeping the duplicate-suppression table.
    pub fn unique_scratch(&self) -> HashSet<(u8, u16)> {
        self.unique_sets.lock().pop().unwrap_or_default()
    }

    pub fn recycle_unique_scratch(&self, mut set: HashSet<(u8, u16)>) {
        set.clear();
        let mut pool = self.unique_sets.lock();
        if pool.len() < self.cfg.pooled_count {
            pool.push(set);
        }
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(AllocatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_round_trips_through_pool() {
        let alloc = Allocator::default();
        let buf = alloc.buffer(64);
        assert!(buf.capacity() >= 64);
        alloc.recycle(buf);
        let buf2 = alloc.buffer(32);
        assert!(buf2.capacity() >= 32);
    }

    #[test]
    fn oversized_buffer_is_not_pooled() {
        let alloc = Allocator::new(AllocatorConfig {
            max_length: 16,
            ..Default::default()
        });
        let buf = BytesMut::with_capacity(1024);
        alloc.recycle(buf);
        assert_eq!(alloc.buffers.lock().len(), 0);
    }
}
