use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use wal::ChunkLoc;

use crate::{prefix_upper_bound, IndexIter, Indexer, IterOptions};

/// Ordered-map index backed by the standard B-tree.
#[derive(Default)]
pub struct BTreeIndex {
    map: RwLock<BTreeMap<Vec<u8>, ChunkLoc>>,
}

impl BTreeIndex {
    pub fn new() -> BTreeIndex {
        BTreeIndex::default()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, loc: ChunkLoc) -> Option<ChunkLoc> {
        self.map.write().insert(key, loc)
    }

    fn get(&self, key: &[u8]) -> Option<ChunkLoc> {
        self.map.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Option<ChunkLoc> {
        self.map.write().remove(key)
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }

    fn iter(&self, options: IterOptions) -> IndexIter {
        let map = self.map.read();
        let entries: Vec<(Vec<u8>, ChunkLoc)> = if options.prefix.is_empty() {
            map.iter().map(|(k, v)| (k.clone(), *v)).collect()
        } else {
            let upper = match prefix_upper_bound(&options.prefix) {
                Some(bound) => Bound::Excluded(bound),
                None => Bound::Unbounded,
            };
            map.range((Bound::Included(options.prefix.clone()), upper))
                .map(|(k, v)| (k.clone(), *v))
                .collect()
        };
        IndexIter::from_sorted(entries, options.reverse)
    }
}
