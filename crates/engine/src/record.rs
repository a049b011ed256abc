//! Binary codecs for the payloads the engine stores in the WAL.
//!
//! Three record kinds share the log:
//!
//! ```text
//! log record:   [type: u8][batch_id: uvarint][key_len: varint][val_len: varint][key][value]
//! hint record:  [seg_id: uvarint][block_index: uvarint][chunk_offset: uvarint][chunk_size: uvarint][key]
//! merge-finished record: [last_active_segment_id: u32 LE]
//! ```
//!
//! Key and value lengths use ZigZag varints; the batch id is an unsigned
//! varint. CRC protection lives in the chunk framing underneath, not here.

use wal::varint::{decode_uvarint, decode_varint, encode_uvarint, encode_varint};
use wal::{ChunkLoc, SegmentId};

use crate::{Error, Result};

/// Batch id stamped on records rewritten by merge; replay applies them
/// immediately instead of waiting for a terminator.
pub(crate) const MERGE_RECORD_BATCH_ID: u64 = 0;

/// What a log record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A live key-value pair.
    Normal = 0,
    /// A tombstone for a deleted key.
    Deleted = 1,
    /// Terminator certifying every earlier record of its batch as durable.
    BatchFin = 2,
}

impl RecordType {
    fn from_u8(v: u8) -> Option<RecordType> {
        match v {
            0 => Some(RecordType::Normal),
            1 => Some(RecordType::Deleted),
            2 => Some(RecordType::BatchFin),
            _ => None,
        }
    }
}

/// A decoded log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LogRecord {
    pub rec_type: RecordType,
    pub batch_id: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl LogRecord {
    /// Builds the terminator record for `batch_id`; its key field carries
    /// the id as eight little-endian bytes.
    pub fn batch_fin(batch_id: u64) -> LogRecord {
        LogRecord {
            rec_type: RecordType::BatchFin,
            batch_id,
            key: batch_id.to_le_bytes().to_vec(),
            value: Vec::new(),
        }
    }

    /// Parses the batch id out of a terminator's key field.
    pub fn fin_batch_id(&self) -> Result<u64> {
        let bytes: [u8; 8] = self
            .key
            .as_slice()
            .try_into()
            .map_err(|_| Error::Corrupt("batch terminator with malformed id".to_string()))?;
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 20 + self.key.len() + self.value.len());
        buf.push(self.rec_type as u8);
        encode_uvarint(&mut buf, self.batch_id);
        encode_varint(&mut buf, self.key.len() as i64);
        encode_varint(&mut buf, self.value.len() as i64);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<LogRecord> {
        let corrupt = |what: &str| Error::Corrupt(format!("log record: {what}"));

        let (&type_byte, mut rest) = buf.split_first().ok_or_else(|| corrupt("empty"))?;
        let rec_type =
            RecordType::from_u8(type_byte).ok_or_else(|| corrupt("unknown type byte"))?;
        let batch_id = decode_uvarint(&mut rest).ok_or_else(|| corrupt("batch id"))?;
        let key_len = decode_varint(&mut rest).ok_or_else(|| corrupt("key length"))?;
        let val_len = decode_varint(&mut rest).ok_or_else(|| corrupt("value length"))?;
        if key_len < 0 || val_len < 0 {
            return Err(corrupt("negative length"));
        }
        let (key_len, val_len) = (key_len as usize, val_len as usize);
        if rest.len() != key_len + val_len {
            return Err(corrupt("length mismatch"));
        }
        Ok(LogRecord {
            rec_type,
            batch_id,
            key: rest[..key_len].to_vec(),
            value: rest[key_len..].to_vec(),
        })
    }
}

/// Encodes one hint-file entry: the location of `key`'s live record in the
/// merged segment sequence.
pub(crate) fn encode_hint_record(key: &[u8], loc: &ChunkLoc) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20 + key.len());
    encode_uvarint(&mut buf, loc.segment_id as u64);
    encode_uvarint(&mut buf, loc.block_index as u64);
    encode_uvarint(&mut buf, loc.chunk_offset as u64);
    encode_uvarint(&mut buf, loc.chunk_size as u64);
    buf.extend_from_slice(key);
    buf
}

/// Decodes a hint-file entry; the key has no length prefix and runs to the
/// end of the payload.
pub(crate) fn decode_hint_record(buf: &[u8]) -> Result<(Vec<u8>, ChunkLoc)> {
    let corrupt = || Error::Corrupt("hint record truncated".to_string());
    let mut rest = buf;
    let segment_id = decode_uvarint(&mut rest).ok_or_else(corrupt)?;
    let block_index = decode_uvarint(&mut rest).ok_or_else(corrupt)?;
    let chunk_offset = decode_uvarint(&mut rest).ok_or_else(corrupt)?;
    let chunk_size = decode_uvarint(&mut rest).ok_or_else(corrupt)?;
    Ok((
        rest.to_vec(),
        ChunkLoc {
            segment_id: segment_id as SegmentId,
            block_index: block_index as u32,
            chunk_offset: chunk_offset as i64,
            chunk_size: chunk_size as u32,
        },
    ))
}

/// Encodes the merge-finished marker: the id of the last segment the merge
/// covered, as four little-endian bytes.
pub(crate) fn encode_merge_fin_record(last_active: SegmentId) -> Vec<u8> {
    last_active.to_le_bytes().to_vec()
}
