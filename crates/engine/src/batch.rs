//! Atomic write batches.
//!
//! A batch buffers mutations and commits them as one durable group: every
//! pending record is appended to the WAL under a fresh batch id, followed by
//! a terminator chunk. Replay only applies records whose terminator made it
//! to disk, which is what makes the group all-or-nothing across crashes.
//!
//! A batch holds the engine's mutation lock (shared for read-only batches)
//! from construction until commit, rollback, or drop, so writers are fully
//! serialized. Dropping a batch without committing discards its pending
//! writes and releases the lock — the drop is the rollback.

use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::record::{LogRecord, RecordType};
use crate::{BatchOptions, Engine, Error, Result};

/// One staged mutation. Tombstones carry no value.
struct PendingWrite {
    rec_type: RecordType,
    value: Vec<u8>,
}

enum EngineGuard<'a> {
    Write(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
    Read(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
}

/// A group of mutations that commits atomically.
pub struct Batch<'a> {
    engine: &'a Engine,
    options: BatchOptions,
    /// Staged writes, keyed (and later committed) in sorted key order.
    pending: BTreeMap<Vec<u8>, PendingWrite>,
    _guard: EngineGuard<'a>,
}

impl Engine {
    /// Starts a new batch, taking the engine's mutation lock until the
    /// batch commits, rolls back, or is dropped.
    pub fn new_batch(&self, options: BatchOptions) -> Result<Batch<'_>> {
        self.ensure_open()?;
        let guard = if options.read_only {
            EngineGuard::Read(self.mutation_lock.read())
        } else {
            EngineGuard::Write(self.mutation_lock.write())
        };
        Ok(Batch {
            engine: self,
            options,
            pending: BTreeMap::new(),
            _guard: guard,
        })
    }
}

impl Batch<'_> {
    /// Stages a put. Overwrites any earlier staged write for the same key.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if self.options.read_only {
            return Err(Error::ReadOnlyBatch);
        }
        self.pending.insert(
            key,
            PendingWrite {
                rec_type: RecordType::Normal,
                value,
            },
        );
        Ok(())
    }

    /// Stages a delete.
    ///
    /// Deleting a key that exists neither in the committed index nor in
    /// this batch is a no-op; deleting a key only staged in this batch
    /// simply un-stages it (there is nothing durable to tombstone).
    pub fn delete(&mut self, key: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if self.options.read_only {
            return Err(Error::ReadOnlyBatch);
        }
        if self.engine.index.get(&key).is_none() {
            self.pending.remove(&key);
            return Ok(());
        }
        self.pending.insert(
            key,
            PendingWrite {
                rec_type: RecordType::Deleted,
                value: Vec::new(),
            },
        );
        Ok(())
    }

    /// Reads a key, observing this batch's own uncommitted writes first.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        self.engine.ensure_open()?;
        if let Some(write) = self.pending.get(key) {
            return Ok(match write.rec_type {
                RecordType::Normal => Some(write.value.clone()),
                _ => None,
            });
        }
        self.engine.get_indexed(key)
    }

    /// Membership test; an index hit suffices, no segment read happens.
    pub fn exist(&self, key: &[u8]) -> Result<bool> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        self.engine.ensure_open()?;
        if let Some(write) = self.pending.get(key) {
            return Ok(write.rec_type == RecordType::Normal);
        }
        Ok(self.engine.index.get(key).is_some())
    }

    /// Commits every staged write atomically, then releases the lock.
    ///
    /// Records are appended in sorted key order, terminated by a BatchFin
    /// chunk. Only after everything (optionally synced) is on disk does the
    /// in-memory index absorb the batch; a crash before the terminator
    /// leaves replay to discard the whole group.
    pub fn commit(mut self) -> Result<()> {
        self.engine.ensure_open()?;
        if self.options.read_only || self.pending.is_empty() {
            return Ok(());
        }

        let batch_id = self.engine.batch_ids.next();
        let pending = std::mem::take(&mut self.pending);

        let mut applied = Vec::with_capacity(pending.len());
        for (key, write) in pending {
            let record = LogRecord {
                rec_type: write.rec_type,
                batch_id,
                key,
                value: write.value,
            };
            let loc = self.engine.wal.write(&record.encode())?;
            applied.push((record.key, record.rec_type, loc));
        }

        self.engine
            .wal
            .write(&LogRecord::batch_fin(batch_id).encode())?;

        if self.options.sync && !self.engine.options.sync {
            self.engine.wal.sync()?;
        }

        // Durable now; make the batch visible and account the bytes that a
        // merge could reclaim (superseded records and all tombstones).
        let mut reclaimed = 0i64;
        for (key, rec_type, loc) in applied {
            match rec_type {
                RecordType::Normal => {
                    if let Some(prev) = self.engine.index.put(key, loc) {
                        reclaimed += prev.chunk_size as i64;
                    }
                }
                RecordType::Deleted => {
                    if let Some(prev) = self.engine.index.delete(&key) {
                        reclaimed += prev.chunk_size as i64;
                    }
                    reclaimed += loc.chunk_size as i64;
                }
                RecordType::BatchFin => unreachable!("terminators are never staged"),
            }
        }
        self.engine
            .reclaim_size
            .fetch_add(reclaimed, Ordering::Relaxed);

        Ok(())
    }

    /// Discards every staged write and releases the lock.
    pub fn rollback(self) {
        // Dropping does all the work.
    }
}

const SEQUENCE_BITS: u32 = 20;

/// Monotonic 64-bit batch-id generator: milliseconds since the epoch in the
/// high bits, a per-millisecond sequence in the low 20. Ids stay unique and
/// increasing across restarts as long as the clock does not regress by more
/// than the sequence can absorb, and id 0 is never produced (it is reserved
/// for merge-rewritten records).
pub(crate) struct BatchIdGen {
    /// Last used (millis, sequence) pair.
    state: Mutex<(u64, u64)>,
}

impl BatchIdGen {
    pub(crate) fn new() -> BatchIdGen {
        BatchIdGen {
            state: Mutex::new((0, 0)),
        }
    }

    pub(crate) fn next(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(1);

        let mut state = self.state.lock();
        if now > state.0 {
            *state = (now, 0);
        } else {
            state.1 += 1;
            if state.1 >= 1 << SEQUENCE_BITS {
                // Sequence exhausted within one tick; borrow from the next.
                *state = (state.0 + 1, 0);
            }
        }
        (state.0 << SEQUENCE_BITS) | state.1
    }
}
