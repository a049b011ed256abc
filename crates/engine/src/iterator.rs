//! Ordered iteration over live key-value pairs.
//!
//! An engine iterator composes a stable index snapshot with segment reads:
//! keys and locations come from the index, values are fetched from the WAL
//! on demand. Snapshots stay readable while the engine runs because
//! segments are append-only and merge output is only adopted at the next
//! open.

use crate::{Engine, IteratorOptions, Result};

impl Engine {
    /// Returns an iterator over live keys, optionally bounded to a prefix
    /// and/or reversed.
    pub fn iter(&self, options: IteratorOptions) -> Iter<'_> {
        Iter {
            engine: self,
            index_iter: self.index.iter(index::IterOptions {
                prefix: options.prefix,
                reverse: options.reverse,
            }),
        }
    }
}

/// Iterator over `(key, value)` pairs in key order.
pub struct Iter<'a> {
    engine: &'a Engine,
    index_iter: index::IndexIter,
}

impl Iter<'_> {
    /// Moves the cursor back to the first entry of the snapshot.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
    }

    /// Positions the cursor at the first key `>= key` (`<=` when reversed).
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
    }
}

impl Iterator for Iter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, loc) = self.index_iter.next()?;
        Some(self.engine.value_at(&loc).map(|value| (key, value)))
    }
}
