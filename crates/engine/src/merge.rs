//! Compaction: rewrite the live set, emit a hint file, adopt on restart.
//!
//! A merge fences off everything up to the current active segment, then
//! scans those (now immutable) segments while normal traffic continues
//! against a fresh active segment. Records that still match their indexed
//! location are rewritten — with batch id 0, so replay applies them
//! directly — into a staging engine in the sibling `<dir>-merge` directory,
//! and each rewritten key's new location is appended to a hint file.
//!
//! The durable commit point is the `MERGE_FIN` marker: a single record
//! holding the fenced segment id. Staged output without a marker is
//! discarded at the next open; with a marker it replaces segments
//! `1..=fenced` in the main directory. Every adoption step is keyed on the
//! presence of its source file, so the sequence can be re-run from any
//! crash point. Merge stages an (empty) placeholder for each fenced id it
//! produced no data for, which is what lets adoption tell "not yet adopted"
//! apart from "already adopted" per segment.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::record::{self, LogRecord, RecordType, MERGE_RECORD_BATCH_ID};
use crate::{
    Engine, Error, Result, HINT_FILE_EXT, MERGE_FIN_EXT, UNBOUNDED_SEGMENT_SIZE,
};
use wal::{segment_file_name, ChunkLoc, SegmentId, Wal, CHUNK_HEADER_SIZE};

const MERGE_DIR_SUFFIX: &str = "-merge";

/// Clears the merge-running flag when the merge ends, on every path out.
struct MergeFlag<'a>(&'a AtomicBool);

impl Drop for MergeFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Engine {
    /// Compacts the store by rewriting only the live records.
    ///
    /// Runs concurrently with normal traffic: the mutation lock is held
    /// just long enough to fence the log, after which writes proceed
    /// against the new active segment while the merge reads frozen ones.
    /// The result is adopted at the next [`Engine::open`].
    ///
    /// Returns [`Error::MergeRunning`] if another merge is in flight; an
    /// empty store is a no-op.
    pub fn merge(&self) -> Result<()> {
        let _flag;
        let last_active = {
            let _guard = self.mutation_lock.write();
            self.ensure_open()?;
            if self.wal.is_empty() {
                return Ok(());
            }
            if self
                .merge_running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(Error::MergeRunning);
            }
            _flag = MergeFlag(&self.merge_running);

            // Everything through `last_active` is immutable from here on;
            // new writes land in the fresh segment.
            let last_active = self.wal.active_segment_id();
            self.wal.open_new_active_segment()?;
            last_active
        };

        let merge_dir = merge_dir_path(&self.options.dir_path);
        remove_dir_if_exists(&merge_dir)?;

        // Staging engine: same layout, durability off (the marker is what
        // commits the merge, not per-write syncs).
        let mut staging_options = self.options.clone();
        staging_options.dir_path = merge_dir.clone();
        staging_options.sync = false;
        staging_options.bytes_per_sync = 0;
        let staging = Engine::open(staging_options)?;

        let hint_wal = Wal::open(wal::Options {
            dir_path: merge_dir.clone(),
            segment_size: UNBOUNDED_SEGMENT_SIZE,
            segment_file_ext: HINT_FILE_EXT.to_string(),
            block_cache_size: 0,
            sync: false,
            bytes_per_sync: 0,
        })?;

        let mut reader = self.wal.reader_le(last_active);
        while let Some((payload, loc)) = reader.next()? {
            let log_record = LogRecord::decode(&payload)?;
            if log_record.rec_type != RecordType::Normal {
                continue;
            }

            let indexed = {
                let _read = self.mutation_lock.read();
                self.index.get(&log_record.key)
            };
            // Only the record the index points at is the live version;
            // anything else is shadowed and gets dropped here.
            let Some(indexed) = indexed else { continue };
            if !same_location(&indexed, &loc) {
                continue;
            }

            let rewritten = LogRecord {
                rec_type: RecordType::Normal,
                batch_id: MERGE_RECORD_BATCH_ID,
                key: log_record.key,
                value: log_record.value,
            };
            let new_loc = staging.wal.write(&rewritten.encode())?;
            hint_wal.write(&record::encode_hint_record(&rewritten.key, &new_loc))?;
        }

        // Stage empty placeholders for fenced ids the rewrite never
        // reached, so adoption can treat every id uniformly.
        let staged_through = staging.wal.active_segment_id();
        for id in staged_through + 1..=last_active {
            fs::File::create(segment_file_name(
                &merge_dir,
                &self.options.segment_file_ext,
                id,
            ))?;
        }

        // Staged data and hint become durable before the marker certifies
        // them.
        staging.wal.sync()?;
        hint_wal.sync()?;
        hint_wal.close()?;

        let fin_wal = Wal::open(wal::Options {
            dir_path: merge_dir,
            segment_size: UNBOUNDED_SEGMENT_SIZE,
            segment_file_ext: MERGE_FIN_EXT.to_string(),
            block_cache_size: 0,
            sync: false,
            bytes_per_sync: 0,
        })?;
        fin_wal.write(&record::encode_merge_fin_record(last_active))?;
        fin_wal.sync()?;
        fin_wal.close()?;

        staging.close()?;
        Ok(())
    }
}

/// `<dir>-merge`, the sibling staging directory for `dir`.
pub(crate) fn merge_dir_path(dir: &Path) -> PathBuf {
    let base = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!("{base}{MERGE_DIR_SUFFIX}"))
}

/// Absorbs completed merge output into `dir` at open time.
///
/// Without a marker the staging directory is a dead merge and is removed
/// silently. With one, segments `1..=fenced` are replaced by their staged
/// counterparts (a staged empty placeholder just deletes the stale
/// original), then the hint file and finally the marker move over. Each
/// step consumes its source file, so a crash anywhere leaves a sequence
/// that re-runs to completion.
pub(crate) fn load_merge_files(dir: &Path, segment_ext: &str) -> Result<()> {
    let merge_dir = merge_dir_path(dir);
    if !merge_dir.exists() {
        return Ok(());
    }

    let result = adopt_merge_output(&merge_dir, dir, segment_ext);
    let _ = fs::remove_dir_all(&merge_dir);
    result
}

fn adopt_merge_output(merge_dir: &Path, dir: &Path, segment_ext: &str) -> Result<()> {
    let marker = segment_file_name(merge_dir, MERGE_FIN_EXT, 1);
    let Some(last_active) = read_merge_fin(&marker)? else {
        return Ok(());
    };

    for id in 1..=last_active {
        let src = segment_file_name(merge_dir, segment_ext, id);
        let src_len = match fs::metadata(&src) {
            Ok(metadata) => metadata.len(),
            // Already adopted by an interrupted earlier pass.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };

        let dst = segment_file_name(dir, segment_ext, id);
        remove_file_if_exists(&dst)?;
        if src_len > 0 {
            fs::rename(&src, &dst)?;
        } else {
            // Placeholder: the merge dropped every record this segment
            // held; deleting the source completes the step.
            fs::remove_file(&src)?;
        }
    }

    // Hint before marker: if we crash in between, the marker still in the
    // staging dir re-runs the adoption, and the moved hint is simply
    // replaced.
    replace_single_file(merge_dir, dir, HINT_FILE_EXT)?;
    replace_single_file(merge_dir, dir, MERGE_FIN_EXT)?;
    Ok(())
}

/// Moves the single segment-1 file of `ext` from `src_dir` into `dst_dir`,
/// dropping any stale one already there. An empty source only clears the
/// destination (a merge with no live records must erase the old hint).
fn replace_single_file(src_dir: &Path, dst_dir: &Path, ext: &str) -> Result<()> {
    let src = segment_file_name(src_dir, ext, 1);
    let src_len = match fs::metadata(&src) {
        Ok(metadata) => metadata.len(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    let dst = segment_file_name(dst_dir, ext, 1);
    remove_file_if_exists(&dst)?;
    if src_len > 0 {
        fs::rename(&src, &dst)?;
    } else {
        fs::remove_file(&src)?;
    }
    Ok(())
}

/// Reads the fenced segment id out of a merge-finished marker file.
///
/// Returns `None` when the file is missing or torn (the merge never
/// committed).
fn read_merge_fin(path: &Path) -> Result<Option<SegmentId>> {
    let payload = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    // One chunk: 7-byte header, then the 4-byte little-endian id.
    if payload.len() < CHUNK_HEADER_SIZE + 4 {
        return Ok(None);
    }
    let bytes: [u8; 4] = payload[CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + 4]
        .try_into()
        .expect("slice of length 4");
    Ok(Some(SegmentId::from_le_bytes(bytes)))
}

/// Id recorded by the marker in the main directory, or 0 when none exists.
/// Replay skips segments at or below this id — the hint file covers them.
pub(crate) fn merge_fin_segment_id(dir: &Path) -> Result<SegmentId> {
    Ok(read_merge_fin(&segment_file_name(dir, MERGE_FIN_EXT, 1))?.unwrap_or(0))
}

fn same_location(a: &ChunkLoc, b: &ChunkLoc) -> bool {
    a.segment_id == b.segment_id
        && a.block_index == b.block_index
        && a.chunk_offset == b.chunk_offset
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
