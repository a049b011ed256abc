//! # WAL — block-aligned write-ahead log
//!
//! Crash-safe, append-only storage for the BasaltKV engine. The log is an
//! ordered collection of **segment files**; the highest-numbered segment is
//! *active* (accepting appends), the rest are *frozen* (read-only).
//!
//! ## On-disk layout
//!
//! Segment files are named `<nnnnnnnnn><ext>` (zero-padded 9-digit id plus
//! an extension such as `.SEG`) and are divided into fixed 32 KiB blocks.
//! Payloads are framed as **chunks**, and a chunk never crosses a block
//! boundary:
//!
//! ```text
//! offset  size  field
//!   0      4    crc32(length || chunk_type || payload)
//!   4      2    length (payload only, little-endian)
//!   6      1    chunk_type   {0=Full, 1=First, 2=Middle, 3=Last}
//!   7      L    payload
//! ```
//!
//! A payload that fits in the current block is written as a single `Full`
//! chunk. A larger payload is split into `First`, zero or more `Middle`, and
//! a `Last` chunk, each occupying whole-block-aligned regions. If fewer than
//! 7 bytes remain in the current block, the tail is zero-padded and the next
//! chunk starts at the next block boundary.
//!
//! Every append returns a [`ChunkLoc`] — `(segment id, block index, chunk
//! offset, chunk size)` — which is all a reader needs to get the payload
//! back via [`Wal::read`]. Sequential access for recovery and compaction
//! goes through [`Wal::reader`] and friends.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{Options, Wal};
//!
//! let wal = Wal::open(Options {
//!     dir_path: "/tmp/basalt-wal".into(),
//!     ..Default::default()
//! }).unwrap();
//! let loc = wal.write(b"hello").unwrap();
//! assert_eq!(wal.read(&loc).unwrap(), b"hello");
//! ```

mod cache;
mod segment;
pub mod varint;
#[allow(clippy::module_inception)]
mod wal;

pub use cache::BlockCache;
pub use segment::{segment_file_name, Segment, SegmentReader};
pub use wal::{Options, Reader, Wal};

use std::io;
use thiserror::Error;

/// Numeric id of a segment file, taken from its file name.
pub type SegmentId = u32;

/// Fixed size of a block within a segment file.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Size of the chunk header: crc32(4) + length(2) + chunk_type(1).
pub const CHUNK_HEADER_SIZE: usize = 7;

/// How a logical payload maps onto the chunks that carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    /// The payload fits in one chunk.
    Full = 0,
    /// First piece of a payload split across blocks.
    First = 1,
    /// An intermediate piece filling an entire block.
    Middle = 2,
    /// Final piece of a split payload.
    Last = 3,
}

impl ChunkType {
    pub(crate) fn from_u8(v: u8) -> Option<ChunkType> {
        match v {
            0 => Some(ChunkType::Full),
            1 => Some(ChunkType::First),
            2 => Some(ChunkType::Middle),
            3 => Some(ChunkType::Last),
            _ => None,
        }
    }
}

/// Physical location of a chunk inside the WAL.
///
/// Sufficient to locate the first chunk of a record and recover its full
/// payload, even when the record spans several blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkLoc {
    pub segment_id: SegmentId,
    pub block_index: u32,
    pub chunk_offset: i64,
    /// Total encoded size: `#chunks * 7 + payload size` (sequential readers
    /// also fold in any padding skipped before the following chunk).
    pub chunk_size: u32,
}

impl ChunkLoc {
    /// Encodes the location as four unsigned varints.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20);
        varint::encode_uvarint(&mut buf, self.segment_id as u64);
        varint::encode_uvarint(&mut buf, self.block_index as u64);
        varint::encode_uvarint(&mut buf, self.chunk_offset as u64);
        varint::encode_uvarint(&mut buf, self.chunk_size as u64);
        buf
    }

    /// Decodes a location previously produced by [`ChunkLoc::encode`].
    /// Returns `None` if the buffer is truncated.
    pub fn decode(mut buf: &[u8]) -> Option<ChunkLoc> {
        let buf = &mut buf;
        let segment_id = varint::decode_uvarint(buf)?;
        let block_index = varint::decode_uvarint(buf)?;
        let chunk_offset = varint::decode_uvarint(buf)?;
        let chunk_size = varint::decode_uvarint(buf)?;
        Some(ChunkLoc {
            segment_id: segment_id as SegmentId,
            block_index: block_index as u32,
            chunk_offset: chunk_offset as i64,
            chunk_size: chunk_size as u32,
        })
    }
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A chunk failed CRC validation.
    #[error("invalid crc: stored {expected:#010x}, computed {actual:#010x}")]
    InvalidCrc { expected: u32, actual: u32 },

    /// The segment or WAL was closed before the operation.
    #[error("segment file is closed")]
    Closed,

    /// A location referenced a segment the WAL does not know about.
    #[error("segment file {0} not found")]
    SegmentNotFound(SegmentId),

    /// The payload cannot fit in a single segment file.
    #[error("record of {size} bytes exceeds segment size {max}")]
    RecordTooLarge { size: u64, max: u64 },

    /// A structurally invalid chunk (bad type byte, offset past the written
    /// size on a random read, and so on).
    #[error("corrupt chunk: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, WalError>;
