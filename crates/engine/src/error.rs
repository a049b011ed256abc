use thiserror::Error;

/// Errors surfaced by the storage engine.
///
/// Absent keys are not an error: reads return `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// Keys must be non-empty byte strings.
    #[error("key is empty")]
    EmptyKey,

    /// `Options::dir_path` was empty.
    #[error("database directory path is empty")]
    DirPathEmpty,

    /// `Options::segment_size` must be greater than zero.
    #[error("segment size must be greater than 0")]
    InvalidSegmentSize,

    /// Another process holds the directory's advisory file lock.
    #[error("database directory is used by another process")]
    DatabaseInUse,

    /// The engine was closed before the operation.
    #[error("database is closed")]
    Closed,

    /// A mutation was attempted through a read-only batch.
    #[error("batch is read-only")]
    ReadOnlyBatch,

    /// A merge is already in progress.
    #[error("merge is in progress, try again later")]
    MergeRunning,

    /// A log, hint, or merge-finished record failed to decode.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// An error from the underlying WAL (CRC mismatch, missing segment,
    /// oversized record, I/O).
    #[error(transparent)]
    Wal(#[from] wal::WalError),

    /// A filesystem error outside the WAL (lock file, directory scans,
    /// merge adoption).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
