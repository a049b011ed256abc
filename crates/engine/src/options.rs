use std::path::PathBuf;

pub use index::IndexType;

/// Configuration for [`Engine::open`].
///
/// [`Engine::open`]: crate::Engine::open
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding every file of the store. Created if missing.
    pub dir_path: PathBuf,

    /// Maximum size of one data segment file in bytes. Also bounds the
    /// largest single record.
    pub segment_size: u64,

    /// Extension of the data segment files.
    pub segment_file_ext: String,

    /// Byte budget for the shared block cache; 0 disables it.
    pub block_cache_size: u64,

    /// Fsync the active segment after every write. Durable but slow.
    pub sync: bool,

    /// When `sync` is off and this is non-zero, fsync after this many
    /// written bytes.
    pub bytes_per_sync: u32,

    /// Which in-memory index structure to use. The choice does not affect
    /// the on-disk format or recovery.
    pub index_type: IndexType,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            dir_path: std::env::temp_dir().join("basalt-data"),
            segment_size: 256 * 1024 * 1024,
            segment_file_ext: crate::DATA_FILE_EXT.to_string(),
            block_cache_size: 0,
            sync: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
        }
    }
}

/// Per-batch knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Fsync the WAL once the batch (including its terminator) is written,
    /// even when the engine-wide `sync` option is off.
    pub sync: bool,

    /// A read-only batch takes the engine's shared lock instead of the
    /// exclusive one and rejects mutations.
    pub read_only: bool,
}

/// Options for [`Engine::iter`].
///
/// [`Engine::iter`]: crate::Engine::iter
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys starting with this prefix (empty = no filter).
    pub prefix: Vec<u8>,

    /// Iterate from the largest key down.
    pub reverse: bool,
}
