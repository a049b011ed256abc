//! The WAL proper: an ordered collection of segments behind one writer.
//!
//! All appends go to the single active segment; when an append would
//! overflow it, the active segment is synced, frozen, and a new one with the
//! next id is opened. Reads address any segment by id. Sequential readers
//! iterate segments in id order and are the backbone of index recovery and
//! merge.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::segment::{Segment, SegmentReader};
use crate::{BlockCache, ChunkLoc, Result, SegmentId, WalError, CHUNK_HEADER_SIZE};

const INITIAL_SEGMENT_ID: SegmentId = 1;

/// Configuration for a [`Wal`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the segment files; created if missing.
    pub dir_path: PathBuf,
    /// Maximum size of one segment file in bytes.
    pub segment_size: u64,
    /// File extension distinguishing this WAL's segments (e.g. `.SEG`).
    /// Must start with a dot.
    pub segment_file_ext: String,
    /// Byte budget for the shared block cache; 0 disables caching.
    pub block_cache_size: u64,
    /// Fsync after every write.
    pub sync: bool,
    /// When `sync` is off and this is non-zero, fsync after this many bytes.
    pub bytes_per_sync: u32,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            dir_path: std::env::temp_dir(),
            segment_size: 1024 * 1024 * 1024,
            segment_file_ext: ".SEG".to_string(),
            block_cache_size: 0,
            sync: false,
            bytes_per_sync: 0,
        }
    }
}

/// Write-ahead log over a directory of segment files.
pub struct Wal {
    inner: RwLock<WalInner>,
    options: Options,
    cache: Option<Arc<BlockCache>>,
}

struct WalInner {
    /// Segment currently accepting appends.
    active: Arc<Segment>,
    /// Frozen segments, read-only, keyed by id.
    older: HashMap<SegmentId, Arc<Segment>>,
    /// Bytes appended since the last sync, for the `bytes_per_sync` policy.
    bytes_written: u32,
}

impl Wal {
    /// Opens the WAL in `options.dir_path`, creating the directory and an
    /// initial segment when empty. The highest-numbered existing segment
    /// becomes active; the rest are frozen.
    pub fn open(options: Options) -> Result<Wal> {
        fs::create_dir_all(&options.dir_path)?;

        let cache = if options.block_cache_size > 0 {
            Some(Arc::new(BlockCache::new(options.block_cache_size)))
        } else {
            None
        };

        // Collect ids of files named <digits><ext>; anything else in the
        // directory (lock file, other WALs' files) is ignored.
        let mut ids: Vec<SegmentId> = Vec::new();
        for entry in fs::read_dir(&options.dir_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(&options.segment_file_ext) else {
                continue;
            };
            if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            if let Ok(id) = stem.parse::<SegmentId>() {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let mut older = HashMap::new();
        let active = if ids.is_empty() {
            Arc::new(Segment::open(
                &options.dir_path,
                &options.segment_file_ext,
                INITIAL_SEGMENT_ID,
                cache.clone(),
            )?)
        } else {
            let mut active = None;
            for (i, id) in ids.iter().enumerate() {
                let seg = Arc::new(Segment::open(
                    &options.dir_path,
                    &options.segment_file_ext,
                    *id,
                    cache.clone(),
                )?);
                if i == ids.len() - 1 {
                    active = Some(seg);
                } else {
                    older.insert(seg.id(), seg);
                }
            }
            active.expect("non-empty id list yields an active segment")
        };

        Ok(Wal {
            inner: RwLock::new(WalInner {
                active,
                older,
                bytes_written: 0,
            }),
            options,
            cache,
        })
    }

    /// Appends `data` to the active segment, rotating first when it would
    /// not fit, then applies the configured sync policy.
    pub fn write(&self, data: &[u8]) -> Result<ChunkLoc> {
        let mut inner = self.inner.write();
        if inner.active.is_closed() {
            return Err(WalError::Closed);
        }

        let size = data.len() as u64;
        if size + CHUNK_HEADER_SIZE as u64 > self.options.segment_size {
            return Err(WalError::RecordTooLarge {
                size,
                max: self.options.segment_size,
            });
        }

        if inner.active.size() + CHUNK_HEADER_SIZE as u64 + size > self.options.segment_size {
            self.rotate(&mut inner)?;
        }

        let loc = inner.active.write(data)?;
        inner.bytes_written = inner.bytes_written.saturating_add(loc.chunk_size);

        let need_sync = self.options.sync
            || (self.options.bytes_per_sync > 0
                && inner.bytes_written >= self.options.bytes_per_sync);
        if need_sync {
            inner.active.sync()?;
            inner.bytes_written = 0;
        }

        Ok(loc)
    }

    /// Reads the payload at `loc` from whichever segment holds it.
    pub fn read(&self, loc: &ChunkLoc) -> Result<Vec<u8>> {
        let segment = {
            let inner = self.inner.read();
            if loc.segment_id == inner.active.id() {
                Arc::clone(&inner.active)
            } else {
                match inner.older.get(&loc.segment_id) {
                    Some(seg) => Arc::clone(seg),
                    None => return Err(WalError::SegmentNotFound(loc.segment_id)),
                }
            }
        };
        segment.read(loc.block_index, loc.chunk_offset)
    }

    /// Syncs and freezes the active segment, then opens a fresh one.
    /// Merge calls this before it starts reading so everything up to the
    /// previous active id is immutable.
    pub fn open_new_active_segment(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.active.sync()?;
        self.rotate(&mut inner)
    }

    fn rotate(&self, inner: &mut WalInner) -> Result<()> {
        inner.active.sync()?;
        inner.bytes_written = 0;
        let segment = Arc::new(Segment::open(
            &self.options.dir_path,
            &self.options.segment_file_ext,
            inner.active.id() + 1,
            self.cache.clone(),
        )?);
        let frozen = std::mem::replace(&mut inner.active, segment);
        inner.older.insert(frozen.id(), frozen);
        Ok(())
    }

    /// Id of the segment currently accepting appends.
    pub fn active_segment_id(&self) -> SegmentId {
        self.inner.read().active.id()
    }

    /// True iff there is exactly one, empty, active segment.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.older.is_empty() && inner.active.size() == 0
    }

    /// Number of segment files (frozen plus active).
    pub fn segment_count(&self) -> usize {
        self.inner.read().older.len() + 1
    }

    /// Fsyncs the active segment.
    pub fn sync(&self) -> Result<()> {
        self.inner.write().active.sync()
    }

    /// Syncs the active segment, then marks every segment closed.
    /// Subsequent reads and writes fail with [`WalError::Closed`].
    pub fn close(&self) -> Result<()> {
        let inner = self.inner.write();
        inner.active.sync()?;
        for segment in inner.older.values() {
            segment.close();
        }
        inner.active.close();
        Ok(())
    }

    /// Deletes every segment file of this WAL.
    pub fn delete(&self) -> Result<()> {
        let mut inner = self.inner.write();
        for segment in inner.older.values() {
            segment.remove()?;
        }
        inner.older.clear();
        inner.active.remove()
    }

    /// Sequential reader over every segment, in id order.
    pub fn reader(&self) -> Reader {
        self.reader_le(0)
    }

    /// Sequential reader over segments with id ≤ `max_id` (0 means all).
    pub fn reader_le(&self, max_id: SegmentId) -> Reader {
        let mut segments: Vec<Arc<Segment>> = {
            let inner = self.inner.read();
            let mut segs: Vec<Arc<Segment>> = inner.older.values().cloned().collect();
            segs.push(Arc::clone(&inner.active));
            segs
        };
        if max_id != 0 {
            segments.retain(|s| s.id() <= max_id);
        }
        segments.sort_unstable_by_key(|s| s.id());

        Reader {
            readers: segments.iter().map(|s| s.reader()).collect(),
            index: 0,
        }
    }

    /// Sequential reader starting at `loc`, skipping everything before it.
    /// Used to resume recovery from a known position.
    pub fn reader_with_loc(&self, loc: ChunkLoc) -> Result<Reader> {
        let mut reader = self.reader();
        loop {
            let Some(id) = reader.current_segment_id() else {
                break;
            };
            if id < loc.segment_id {
                reader.skip_segment();
                continue;
            }
            // Once past loc's segment there is nothing left to skip.
            if id > loc.segment_id {
                break;
            }
            let position = reader
                .position()
                .expect("current segment id implies a current position");
            // Positions order lexicographically: a later block is past loc
            // no matter its offset.
            if (position.block_index, position.chunk_offset)
                >= (loc.block_index, loc.chunk_offset)
            {
                break;
            }
            if reader.next()?.is_none() {
                break;
            }
        }
        Ok(reader)
    }
}

/// Reader over a fixed set of segments, in id order.
pub struct Reader {
    readers: Vec<SegmentReader>,
    index: usize,
}

impl Reader {
    /// Returns the next payload and its location, or `None` at end of log.
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, ChunkLoc)>> {
        while self.index < self.readers.len() {
            match self.readers[self.index].next()? {
                Some(item) => return Ok(Some(item)),
                None => self.index += 1,
            }
        }
        Ok(None)
    }

    /// Advances to the next segment without reading the rest of this one.
    pub fn skip_segment(&mut self) {
        self.index += 1;
    }

    /// Id of the segment the reader currently points into, or `None` when
    /// every segment has been consumed.
    pub fn current_segment_id(&self) -> Option<SegmentId> {
        self.readers.get(self.index).map(|r| r.segment_id())
    }

    /// Location of the chunk the reader would yield next.
    pub fn position(&self) -> Option<ChunkLoc> {
        self.readers.get(self.index).map(|r| r.position())
    }
}
