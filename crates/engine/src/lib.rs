//! # Engine — BasaltKV storage engine
//!
//! An embedded, single-process, persistent key-value store on the Bitcask
//! model: every mutation is appended to a block-aligned WAL of segment
//! files, and an in-memory index maps each live key to the location of its
//! newest record. The index is rebuilt on every open, accelerated by the
//! hint file a merge leaves behind.
//!
//! ## Architecture
//!
//! ```text
//! Batch.commit ──► WAL append (records + BatchFin) ──► index update
//!                        │
//! Engine.get ──► index lookup ──► WAL read ──► decode ──► value
//!                        │
//! Engine.merge ──► rewrite live records into <dir>-merge ──► hint file
//!                        └──► MERGE_FIN marker ──► adopted at next open
//! ```
//!
//! ## Module responsibilities
//!
//! | Module       | Purpose                                             |
//! |--------------|-----------------------------------------------------|
//! | `lib.rs`     | `Engine`: open/recovery, single-key API, close      |
//! | [`batch`]    | pending-write buffer, commit protocol, batch ids    |
//! | [`merge`]    | concurrent compaction and crash-safe adoption       |
//! | [`iterator`] | ordered iteration over live keys                    |
//! | [`record`]   | log/hint/merge-marker codecs                        |
//! | [`options`]  | engine, batch, and iterator configuration           |
//!
//! ## Directory layout
//!
//! ```text
//! <dir>/FLOCK                 advisory cross-process lock
//! <dir>/000000001.SEG ...     data segments
//! <dir>/000000001.HINT        hint file (written by merge)
//! <dir>/000000001.MERGE_FIN   merge-finished marker
//! <dir>-merge/                transient merge staging directory
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use engine::{Engine, Options};
//!
//! let engine = Engine::open(Options {
//!     dir_path: "/tmp/basalt".into(),
//!     ..Default::default()
//! }).unwrap();
//! engine.put(b"name".to_vec(), b"basalt".to_vec()).unwrap();
//! assert_eq!(engine.get(b"name").unwrap(), Some(b"basalt".to_vec()));
//! ```

mod batch;
mod error;
mod flock;
mod iterator;
mod merge;
mod options;
mod record;

pub use batch::Batch;
pub use error::{Error, Result};
pub use iterator::Iter;
pub use options::{BatchOptions, IndexType, IteratorOptions, Options};

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use batch::BatchIdGen;
use flock::FileLock;
use index::Indexer;
use record::{LogRecord, RecordType, MERGE_RECORD_BATCH_ID};
use wal::{ChunkLoc, Wal};

/// Name of the advisory lock file inside the database directory.
pub const FILE_LOCK_NAME: &str = "FLOCK";
/// Extension of the data segment files.
pub const DATA_FILE_EXT: &str = ".SEG";
/// Extension of the hint file produced by merge.
pub const HINT_FILE_EXT: &str = ".HINT";
/// Extension of the merge-finished marker file.
pub const MERGE_FIN_EXT: &str = ".MERGE_FIN";

/// Segment size for single-file WALs (hint file, merge marker) that must
/// never rotate.
pub(crate) const UNBOUNDED_SEGMENT_SIZE: u64 = i64::MAX as u64;

/// Point-in-time statistics about a store.
#[derive(Debug, Clone)]
pub struct Stat {
    /// Number of live keys.
    pub key_num: usize,
    /// Number of data segment files.
    pub segment_num: usize,
    /// Bytes a merge could reclaim (superseded records and tombstones).
    pub reclaimable_size: i64,
    /// Total size of the database directory on disk.
    pub disk_size: u64,
}

/// The storage engine. Cheap to share behind an `Arc`; all methods take
/// `&self`.
pub struct Engine {
    pub(crate) wal: Wal,
    pub(crate) index: Box<dyn Indexer>,
    pub(crate) options: Options,
    /// Serializes batches: writers exclusive, read-only batches shared.
    pub(crate) mutation_lock: RwLock<()>,
    /// Held for the engine's lifetime; released on close.
    file_lock: Mutex<Option<FileLock>>,
    closed: AtomicBool,
    pub(crate) merge_running: AtomicBool,
    pub(crate) reclaim_size: AtomicI64,
    pub(crate) batch_ids: BatchIdGen,
}

impl Engine {
    /// Opens the store in `options.dir_path`, performing full recovery:
    ///
    /// 1. Validate options and create the directory.
    /// 2. Take the advisory `FLOCK` (fails if another process holds it).
    /// 3. Absorb any completed merge output from the sibling staging dir.
    /// 4. Open the data WAL and build the configured index.
    /// 5. Replay the hint file, then the log segments the last merge did
    ///    not cover.
    ///
    /// Every step is RAII-scoped: a failure releases whatever was already
    /// acquired, in reverse order.
    pub fn open(options: Options) -> Result<Engine> {
        check_options(&options)?;
        fs::create_dir_all(&options.dir_path)?;

        let file_lock = FileLock::try_acquire(options.dir_path.join(FILE_LOCK_NAME))?
            .ok_or(Error::DatabaseInUse)?;

        merge::load_merge_files(&options.dir_path, &options.segment_file_ext)?;

        let wal = Wal::open(wal::Options {
            dir_path: options.dir_path.clone(),
            segment_size: options.segment_size,
            segment_file_ext: options.segment_file_ext.clone(),
            block_cache_size: options.block_cache_size,
            sync: options.sync,
            bytes_per_sync: options.bytes_per_sync,
        })?;

        let engine = Engine {
            wal,
            index: index::new_indexer(options.index_type),
            options,
            mutation_lock: RwLock::new(()),
            file_lock: Mutex::new(Some(file_lock)),
            closed: AtomicBool::new(false),
            merge_running: AtomicBool::new(false),
            reclaim_size: AtomicI64::new(0),
            batch_ids: BatchIdGen::new(),
        };

        engine.load_index_from_hint()?;
        engine.load_index_from_wal()?;

        Ok(engine)
    }

    // ---------------- single-key API ----------------
    //
    // Sugar over one-entry batches, so every durable record group ends with
    // a BatchFin terminator and replay treats all writes uniformly.

    /// Stores `value` under `key`.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let mut batch = self.new_batch(BatchOptions::default())?;
        batch.put(key, value)?;
        batch.commit()
    }

    /// Returns the value for `key`, or `None` when absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let batch = self.new_batch(BatchOptions {
            read_only: true,
            sync: false,
        })?;
        batch.get(key)
    }

    /// Removes `key`. Deleting an absent key is a no-op.
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        let mut batch = self.new_batch(BatchOptions::default())?;
        batch.delete(key)?;
        batch.commit()
    }

    /// Whether `key` currently has a value.
    pub fn exist(&self, key: &[u8]) -> Result<bool> {
        let batch = self.new_batch(BatchOptions {
            read_only: true,
            sync: false,
        })?;
        batch.exist(key)
    }

    // ---------------- maintenance ----------------

    /// Fsyncs the active segment.
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        self.wal.sync()?;
        Ok(())
    }

    /// Current statistics.
    pub fn stat(&self) -> Result<Stat> {
        self.ensure_open()?;
        Ok(Stat {
            key_num: self.index.len(),
            segment_num: self.wal.segment_count(),
            reclaimable_size: self.reclaim_size.load(Ordering::Relaxed),
            disk_size: dir_size(&self.options.dir_path)?,
        })
    }

    /// All live keys in ascending order.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        self.index
            .iter(index::IterOptions::default())
            .map(|(key, _)| key)
            .collect()
    }

    /// Calls `f` for every live key-value pair in ascending key order,
    /// stopping early when it returns `false`.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        for item in self.iter(IteratorOptions::default()) {
            let (key, value) = item?;
            if !f(&key, &value) {
                break;
            }
        }
        Ok(())
    }

    /// Closes the store: syncs and closes the WAL and releases the
    /// directory lock. Further operations fail with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        let _guard = self.mutation_lock.write();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.wal.close()?;
        *self.file_lock.lock() = None;
        Ok(())
    }

    // ---------------- internals ----------------

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Index lookup plus segment read.
    pub(crate) fn get_indexed(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.index.get(key) {
            None => Ok(None),
            Some(loc) => Ok(Some(self.value_at(&loc)?)),
        }
    }

    /// Reads and decodes the record at `loc`, returning its value.
    ///
    /// The index only ever references Normal records; anything else at an
    /// indexed location means the store's on-disk state and index disagree,
    /// which is unrecoverable — abort rather than serve wrong data.
    pub(crate) fn value_at(&self, loc: &ChunkLoc) -> Result<Vec<u8>> {
        let payload = self.wal.read(loc)?;
        let record = LogRecord::decode(&payload)?;
        match record.rec_type {
            RecordType::Normal => Ok(record.value),
            other => panic!("index references a {other:?} record at {loc:?}"),
        }
    }

    /// Pre-populates the index from the hint file, when one exists.
    fn load_index_from_hint(&self) -> Result<()> {
        let hint_path = wal::segment_file_name(&self.options.dir_path, HINT_FILE_EXT, 1);
        if !hint_path.exists() {
            return Ok(());
        }

        let hint = Wal::open(wal::Options {
            dir_path: self.options.dir_path.clone(),
            segment_size: UNBOUNDED_SEGMENT_SIZE,
            segment_file_ext: HINT_FILE_EXT.to_string(),
            block_cache_size: 0,
            sync: false,
            bytes_per_sync: 0,
        })?;

        let mut reader = hint.reader();
        while let Some((payload, _)) = reader.next()? {
            let (key, loc) = record::decode_hint_record(&payload)?;
            self.index.put(key, loc);
        }
        hint.close()?;
        Ok(())
    }

    /// Replays the log into the index, honoring batch atomicity.
    ///
    /// Segments the last merge covered are skipped — the hint file already
    /// described them. Records accumulate per batch id until that batch's
    /// terminator appears; merge-rewritten records (batch id 0) apply
    /// immediately. Batches with no terminator by end of log never
    /// committed and are discarded.
    fn load_index_from_wal(&self) -> Result<()> {
        let merge_fin_id = merge::merge_fin_segment_id(&self.options.dir_path)?;

        let mut pending_by_batch: HashMap<u64, Vec<(Vec<u8>, RecordType, ChunkLoc)>> =
            HashMap::new();
        let mut reclaimed = 0i64;
        let mut reader = self.wal.reader();

        loop {
            while let Some(id) = reader.current_segment_id() {
                if id <= merge_fin_id {
                    reader.skip_segment();
                } else {
                    break;
                }
            }
            let Some((payload, loc)) = reader.next()? else {
                break;
            };
            let record = LogRecord::decode(&payload)?;

            match record.rec_type {
                RecordType::BatchFin => {
                    let batch_id = record.fin_batch_id()?;
                    for (key, rec_type, loc) in
                        pending_by_batch.remove(&batch_id).unwrap_or_default()
                    {
                        reclaimed += self.apply_replayed(key, rec_type, loc);
                    }
                }
                _ if record.batch_id == MERGE_RECORD_BATCH_ID => {
                    reclaimed += self.apply_replayed(record.key, record.rec_type, loc);
                }
                _ => {
                    pending_by_batch.entry(record.batch_id).or_default().push((
                        record.key,
                        record.rec_type,
                        loc,
                    ));
                }
            }
        }

        self.reclaim_size.fetch_add(reclaimed, Ordering::Relaxed);
        Ok(())
    }

    /// Applies one replayed record to the index, returning the bytes it
    /// made reclaimable.
    fn apply_replayed(&self, key: Vec<u8>, rec_type: RecordType, loc: ChunkLoc) -> i64 {
        match rec_type {
            RecordType::Normal => self
                .index
                .put(key, loc)
                .map(|prev| prev.chunk_size as i64)
                .unwrap_or(0),
            RecordType::Deleted => {
                let superseded = self
                    .index
                    .delete(&key)
                    .map(|prev| prev.chunk_size as i64)
                    .unwrap_or(0);
                superseded + loc.chunk_size as i64
            }
            RecordType::BatchFin => 0,
        }
    }
}

/// Best-effort close so an engine dropped without an explicit `close()`
/// still syncs and releases its directory lock.
impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn check_options(options: &Options) -> Result<()> {
    if options.dir_path.as_os_str().is_empty() {
        return Err(Error::DirPathEmpty);
    }
    if options.segment_size == 0 {
        return Err(Error::InvalidSegmentSize);
    }
    Ok(())
}

/// Total size in bytes of the files directly inside `dir`.
fn dir_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests;
