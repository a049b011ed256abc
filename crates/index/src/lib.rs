//! # Index — in-memory key directory
//!
//! Maps every live key to the [`ChunkLoc`] of its newest record in the WAL.
//! The index is rebuilt on every restart (from the hint file and the log),
//! so all variants are purely in-memory.
//!
//! Three interchangeable implementations satisfy the same [`Indexer`]
//! contract and are selected once at open time:
//!
//! | Variant                  | Structure                                  |
//! |--------------------------|--------------------------------------------|
//! | [`BTreeIndex`]           | `RwLock<BTreeMap>`                         |
//! | [`ArtIndex`]             | adaptive radix tree (Node4/16/48/256)      |
//! | [`SkipListIndex`]        | lock-free `crossbeam_skiplist::SkipMap`    |
//!
//! Iterators take a stable snapshot of the matching entries at construction
//! time; mutations made afterwards are not observed. Locations in a snapshot
//! stay readable because segments are append-only while the store runs.

mod art;
mod btree;
mod skiplist;

pub use art::ArtIndex;
pub use btree::BTreeIndex;
pub use skiplist::SkipListIndex;

use wal::ChunkLoc;

/// Which index implementation the engine should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    #[default]
    BTree,
    Art,
    SkipList,
}

/// Constructs the index variant selected by `index_type`.
pub fn new_indexer(index_type: IndexType) -> Box<dyn Indexer> {
    match index_type {
        IndexType::BTree => Box::new(BTreeIndex::new()),
        IndexType::Art => Box::new(ArtIndex::new()),
        IndexType::SkipList => Box::new(SkipListIndex::new()),
    }
}

/// Options for index iteration.
#[derive(Debug, Clone, Default)]
pub struct IterOptions {
    /// Only yield keys starting with this prefix (empty = no filter).
    pub prefix: Vec<u8>,
    /// Iterate from the largest key down.
    pub reverse: bool,
}

/// The capability set every index variant provides.
///
/// `put` and `delete` exclude each other inside each variant; concurrent
/// `get`s are always permitted.
pub trait Indexer: Send + Sync {
    /// Inserts or replaces the location for `key`, returning the prior one.
    fn put(&self, key: Vec<u8>, loc: ChunkLoc) -> Option<ChunkLoc>;

    /// Looks up the location for `key`.
    fn get(&self, key: &[u8]) -> Option<ChunkLoc>;

    /// Removes `key`, returning the location it pointed to, if any.
    fn delete(&self, key: &[u8]) -> Option<ChunkLoc>;

    /// Number of keys currently indexed.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot iterator over the entries matching `options`.
    fn iter(&self, options: IterOptions) -> IndexIter;
}

/// Snapshot iterator over `(key, location)` pairs.
///
/// Entries are materialized in iteration order at construction; `rewind`
/// and `seek` reposition the cursor within the snapshot.
pub struct IndexIter {
    entries: Vec<(Vec<u8>, ChunkLoc)>,
    position: usize,
    reverse: bool,
}

impl IndexIter {
    /// Builds an iterator from entries sorted in ascending key order.
    pub(crate) fn from_sorted(mut entries: Vec<(Vec<u8>, ChunkLoc)>, reverse: bool) -> IndexIter {
        if reverse {
            entries.reverse();
        }
        IndexIter {
            entries,
            position: 0,
            reverse,
        }
    }

    /// Moves the cursor back to the first entry.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Positions the cursor at the first entry whose key is `>= key`
    /// (`<= key` for reverse iterators).
    pub fn seek(&mut self, key: &[u8]) {
        self.position = if self.reverse {
            self.entries.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.entries.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    /// Number of entries in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Iterator for IndexIter {
    type Item = (Vec<u8>, ChunkLoc);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, loc) = self.entries.get(self.position)?;
        self.position += 1;
        Some((key.clone(), *loc))
    }
}

/// Smallest byte string strictly greater than every key starting with
/// `prefix`, or `None` when no such bound exists (prefix is all `0xff`).
pub(crate) fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.last_mut() {
        if *last < u8::MAX {
            *last += 1;
            return Some(bound);
        }
        bound.pop();
    }
    None
}
