//! Append-only, block-structured segment files.
//!
//! A segment owns one file descriptor. Appends go through a mutex-guarded
//! write cursor and are assembled into a pooled buffer so that all chunks of
//! one logical write (padding included) hit the file in a single `write_all`
//! — this bounds the exposure to partial writes. Reads use positioned I/O on
//! the shared descriptor and can run concurrently with the writer.

use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::cache_key;
use crate::{
    BlockCache, ChunkLoc, ChunkType, Result, SegmentId, WalError, BLOCK_SIZE, CHUNK_HEADER_SIZE,
};

const FILE_MODE: u32 = 0o644;

/// How many spare block buffers a segment keeps for readers.
const READ_POOL_LIMIT: usize = 8;

/// A single append-only segment file of the WAL.
pub struct Segment {
    id: SegmentId,
    file: File,
    path: PathBuf,
    write: Mutex<WriteState>,
    /// Pooled scratch blocks for the read path.
    read_pool: Mutex<Vec<Vec<u8>>>,
    cache: Option<Arc<BlockCache>>,
    closed: AtomicBool,
}

/// Writer-side cursor plus the reusable chunk-assembly buffer.
struct WriteState {
    block_index: u32,
    block_size: u32,
    buf: BytesMut,
}

impl WriteState {
    /// Appends one framed chunk to the assembly buffer and advances the
    /// cursor, rolling over to the next block when this one fills exactly.
    fn append_chunk(&mut self, payload: &[u8], chunk_type: ChunkType) {
        let mut header = [0u8; CHUNK_HEADER_SIZE];
        LittleEndian::write_u16(&mut header[4..6], payload.len() as u16);
        header[6] = chunk_type as u8;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header[4..CHUNK_HEADER_SIZE]);
        hasher.update(payload);
        LittleEndian::write_u32(&mut header[..4], hasher.finalize());

        self.buf.put_slice(&header);
        self.buf.put_slice(payload);

        self.block_size += (CHUNK_HEADER_SIZE + payload.len()) as u32;
        debug_assert!(self.block_size <= BLOCK_SIZE as u32);
        if self.block_size == BLOCK_SIZE as u32 {
            self.block_index += 1;
            self.block_size = 0;
        }
    }
}

/// Returns the path of segment `id` in `dir`: `<9-digit id><ext>`.
pub fn segment_file_name(dir: &Path, ext: &str, id: SegmentId) -> PathBuf {
    dir.join(format!("{id:09}{ext}"))
}

impl Segment {
    /// Opens or creates the segment file and positions the write cursor at
    /// its current end.
    pub fn open(
        dir: &Path,
        ext: &str,
        id: SegmentId,
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Segment> {
        let path = segment_file_name(dir, ext, id);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .mode(FILE_MODE)
            .open(&path)?;
        let size = file.metadata()?.len();

        Ok(Segment {
            id,
            file,
            path,
            write: Mutex::new(WriteState {
                block_index: (size / BLOCK_SIZE as u64) as u32,
                block_size: (size % BLOCK_SIZE as u64) as u32,
                buf: BytesMut::with_capacity(4096),
            }),
            read_pool: Mutex::new(Vec::new()),
            cache,
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Current size of the segment in bytes, padding included.
    pub fn size(&self) -> u64 {
        let w = self.write.lock();
        w.block_index as u64 * BLOCK_SIZE as u64 + w.block_size as u64
    }

    /// Appends `data` as one or more CRC-framed chunks and returns the
    /// location needed to read it back.
    pub fn write(&self, data: &[u8]) -> Result<ChunkLoc> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }

        let mut w = self.write.lock();
        w.buf.clear();
        let checkpoint = (w.block_index, w.block_size);

        // Not enough room left in this block for even a chunk header:
        // zero-pad the tail and start at the next block boundary.
        let remaining = BLOCK_SIZE as u32 - w.block_size;
        if remaining < CHUNK_HEADER_SIZE as u32 {
            w.buf.put_bytes(0, remaining as usize);
            w.block_index += 1;
            w.block_size = 0;
        }

        let mut loc = ChunkLoc {
            segment_id: self.id,
            block_index: w.block_index,
            chunk_offset: w.block_size as i64,
            chunk_size: 0,
        };

        if w.block_size as usize + data.len() + CHUNK_HEADER_SIZE <= BLOCK_SIZE {
            w.append_chunk(data, ChunkType::Full);
            loc.chunk_size = (data.len() + CHUNK_HEADER_SIZE) as u32;
        } else {
            // Split across blocks: First, any number of Middles, then Last.
            let mut left = data.len();
            let mut chunks = 0u32;
            while left > 0 {
                let room = BLOCK_SIZE - w.block_size as usize - CHUNK_HEADER_SIZE;
                let take = room.min(left);
                let start = data.len() - left;
                let chunk_type = if chunks == 0 {
                    ChunkType::First
                } else if take == left {
                    ChunkType::Last
                } else {
                    ChunkType::Middle
                };
                w.append_chunk(&data[start..start + take], chunk_type);
                left -= take;
                chunks += 1;
            }
            loc.chunk_size = chunks * CHUNK_HEADER_SIZE as u32 + data.len() as u32;
        }

        if let Err(err) = (&self.file).write_all(&w.buf) {
            // The cursor must keep describing what actually hit the file.
            (w.block_index, w.block_size) = checkpoint;
            return Err(err.into());
        }
        Ok(loc)
    }

    /// Reads back the payload starting at `(block_index, chunk_offset)`.
    ///
    /// Fails with [`WalError::Corrupt`] when the location points past the
    /// written size, and with [`WalError::InvalidCrc`] on checksum mismatch.
    pub fn read(&self, block_index: u32, chunk_offset: i64) -> Result<Vec<u8>> {
        match self.read_internal(block_index, chunk_offset)? {
            Some((payload, _)) => Ok(payload),
            None => Err(WalError::Corrupt(format!(
                "no chunk at segment {} block {block_index} offset {chunk_offset}",
                self.id
            ))),
        }
    }

    /// Core read loop shared by random reads and sequential readers.
    ///
    /// Returns the reassembled payload together with the position of the
    /// chunk that follows it, or `None` when the location is at or past the
    /// end of the written data (including a truncated tail from a crashed
    /// write, which recovery treats as a clean end of log).
    pub(crate) fn read_internal(
        &self,
        mut block_index: u32,
        mut chunk_offset: i64,
    ) -> Result<Option<(Vec<u8>, ChunkLoc)>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }

        let segment_size = self.size();
        let mut payload = Vec::new();
        let mut block = self.block_buffer();

        let result = loop {
            let offset = block_index as u64 * BLOCK_SIZE as u64;
            let size = BLOCK_SIZE.min(segment_size.saturating_sub(offset) as usize);
            let chunk_start = chunk_offset as usize;
            if chunk_start >= size {
                break None;
            }

            self.fetch_block(block_index, size, &mut block)?;

            // A header that does not fit in the written bytes is a torn
            // tail; everything before it has already been returned whole.
            if chunk_start + CHUNK_HEADER_SIZE > size {
                break None;
            }
            let length =
                LittleEndian::read_u16(&block[chunk_start + 4..chunk_start + 6]) as usize;
            let end = chunk_start + CHUNK_HEADER_SIZE + length;
            if end > size {
                break None;
            }

            let stored = LittleEndian::read_u32(&block[chunk_start..chunk_start + 4]);
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&block[chunk_start + 4..end]);
            let actual = hasher.finalize();
            if stored != actual {
                self.recycle_block(block);
                return Err(WalError::InvalidCrc {
                    expected: stored,
                    actual,
                });
            }

            payload.extend_from_slice(&block[chunk_start + CHUNK_HEADER_SIZE..end]);

            let type_byte = block[chunk_start + 6];
            let chunk_type = match ChunkType::from_u8(type_byte) {
                Some(t) => t,
                None => {
                    self.recycle_block(block);
                    return Err(WalError::Corrupt(format!("unknown chunk type {type_byte}")));
                }
            };

            match chunk_type {
                ChunkType::Full | ChunkType::Last => {
                    let mut next = ChunkLoc {
                        segment_id: self.id,
                        block_index,
                        chunk_offset: end as i64,
                        chunk_size: 0,
                    };
                    // If what remains of the block cannot hold a header, the
                    // writer padded it; the next chunk starts a new block.
                    if end + CHUNK_HEADER_SIZE > BLOCK_SIZE {
                        next.block_index += 1;
                        next.chunk_offset = 0;
                    }
                    break Some((payload, next));
                }
                ChunkType::First | ChunkType::Middle => {
                    block_index += 1;
                    chunk_offset = 0;
                }
            }
        };

        self.recycle_block(block);
        Ok(result)
    }

    /// Loads one block into `buf`, going through the cache for full blocks.
    fn fetch_block(&self, block_index: u32, size: usize, buf: &mut [u8]) -> Result<()> {
        let key = cache_key(self.id, block_index);
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(key) {
                buf[..BLOCK_SIZE].copy_from_slice(&cached);
                return Ok(());
            }
        }

        let offset = block_index as u64 * BLOCK_SIZE as u64;
        self.file.read_exact_at(&mut buf[..size], offset)?;
        // Partial tail blocks are still being appended to; caching them
        // would serve stale data.
        if size == BLOCK_SIZE {
            if let Some(cache) = &self.cache {
                cache.insert(key, Bytes::copy_from_slice(&buf[..BLOCK_SIZE]));
            }
        }
        Ok(())
    }

    fn block_buffer(&self) -> Vec<u8> {
        self.read_pool
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; BLOCK_SIZE])
    }

    fn recycle_block(&self, block: Vec<u8>) {
        let mut pool = self.read_pool.lock();
        if pool.len() < READ_POOL_LIMIT {
            pool.push(block);
        }
    }

    /// Flushes the segment file to stable storage.
    pub fn sync(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.file.sync_all()?;
        Ok(())
    }

    /// Marks the segment closed; subsequent reads and writes fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the segment and deletes its file.
    pub fn remove(&self) -> Result<()> {
        self.close();
        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    /// Returns a sequential reader positioned at the start of the segment.
    pub fn reader(self: &Arc<Segment>) -> SegmentReader {
        SegmentReader {
            segment: Arc::clone(self),
            block_index: 0,
            chunk_offset: 0,
        }
    }
}

/// Stateful cursor over a segment's chunks, in write order.
pub struct SegmentReader {
    segment: Arc<Segment>,
    block_index: u32,
    chunk_offset: i64,
}

impl SegmentReader {
    /// Returns the next payload and the location it occupied, or `None` at
    /// the end of the segment's written data.
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, ChunkLoc)>> {
        let start_block = self.block_index;
        let start_offset = self.chunk_offset;

        match self
            .segment
            .read_internal(self.block_index, self.chunk_offset)?
        {
            None => Ok(None),
            Some((payload, next)) => {
                // Distance to the next chunk; covers trailing padding too.
                let begin = start_block as i64 * BLOCK_SIZE as i64 + start_offset;
                let end = next.block_index as i64 * BLOCK_SIZE as i64 + next.chunk_offset;
                let loc = ChunkLoc {
                    segment_id: self.segment.id(),
                    block_index: start_block,
                    chunk_offset: start_offset,
                    chunk_size: (end - begin) as u32,
                };
                self.block_index = next.block_index;
                self.chunk_offset = next.chunk_offset;
                Ok(Some((payload, loc)))
            }
        }
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment.id()
    }

    /// Location the reader will yield next.
    pub fn position(&self) -> ChunkLoc {
        ChunkLoc {
            segment_id: self.segment.id(),
            block_index: self.block_index,
            chunk_offset: self.chunk_offset,
            chunk_size: 0,
        }
    }
}
