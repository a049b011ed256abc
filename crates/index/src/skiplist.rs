use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use wal::ChunkLoc;

use crate::{prefix_upper_bound, IndexIter, Indexer, IterOptions};

/// Lock-free skiplist index.
///
/// The skiplist handles concurrent readers internally; the prior-location
/// lookup in `put` relies on the engine serializing mutations, which the
/// batch protocol guarantees.
#[derive(Default)]
pub struct SkipListIndex {
    map: SkipMap<Vec<u8>, ChunkLoc>,
}

impl SkipListIndex {
    pub fn new() -> SkipListIndex {
        SkipListIndex::default()
    }
}

impl Indexer for SkipListIndex {
    fn put(&self, key: Vec<u8>, loc: ChunkLoc) -> Option<ChunkLoc> {
        let prior = self.map.get(&key).map(|entry| *entry.value());
        self.map.insert(key, loc);
        prior
    }

    fn get(&self, key: &[u8]) -> Option<ChunkLoc> {
        self.map.get(key).map(|entry| *entry.value())
    }

    fn delete(&self, key: &[u8]) -> Option<ChunkLoc> {
        self.map.remove(key).map(|entry| *entry.value())
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn iter(&self, options: IterOptions) -> IndexIter {
        let entries: Vec<(Vec<u8>, ChunkLoc)> = if options.prefix.is_empty() {
            self.map
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect()
        } else {
            let lower = Bound::Included(options.prefix.clone());
            let upper = match prefix_upper_bound(&options.prefix) {
                Some(bound) => Bound::Excluded(bound),
                None => Bound::Unbounded,
            };
            self.map
                .range((lower, upper))
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect()
        };
        IndexIter::from_sorted(entries, options.reverse)
    }
}
