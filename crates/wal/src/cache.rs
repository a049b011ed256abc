//! Shared LRU cache of segment blocks.
//!
//! Cached values are always full 32 KiB blocks; partial tail blocks are
//! never inserted because the active segment may still append into them.
//! The cache is shared by every segment of a WAL and keyed by
//! `(segment_id << 32) | block_index`.

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::{SegmentId, BLOCK_SIZE};

/// Bounded, thread-safe LRU of segment blocks.
pub struct BlockCache {
    inner: Mutex<LruCache<u64, Bytes>>,
}

impl BlockCache {
    /// Creates a cache bounded by `capacity_bytes`, rounded down to whole
    /// blocks (at least one).
    pub fn new(capacity_bytes: u64) -> BlockCache {
        let entries = (capacity_bytes as usize / BLOCK_SIZE).max(1);
        let entries = NonZeroUsize::new(entries).expect("at least one entry");
        BlockCache {
            inner: Mutex::new(LruCache::new(entries)),
        }
    }

    pub fn get(&self, key: u64) -> Option<Bytes> {
        self.inner.lock().get(&key).cloned()
    }

    pub fn insert(&self, key: u64, block: Bytes) {
        debug_assert_eq!(block.len(), BLOCK_SIZE);
        self.inner.lock().put(key, block);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache key for a block: segment id in the high 32 bits, block index in
/// the low 32 bits.
pub(crate) fn cache_key(segment_id: SegmentId, block_index: u32) -> u64 {
    (segment_id as u64) << 32 | block_index as u64
}
