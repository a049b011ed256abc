use super::helpers::*;
use crate::*;
use tempfile::tempdir;

// --------------------- Read-your-writes ---------------------

#[test]
fn batch_reads_observe_pending_writes() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(BatchOptions::default())?;
    batch.put(b"k".to_vec(), b"v1".to_vec())?;
    assert_eq!(batch.get(b"k")?, Some(b"v1".to_vec()));
    assert!(batch.exist(b"k")?);

    batch.put(b"k".to_vec(), b"v2".to_vec())?;
    assert_eq!(batch.get(b"k")?, Some(b"v2".to_vec()));

    batch.delete(b"k".to_vec())?;
    assert_eq!(batch.get(b"k")?, None);
    assert!(!batch.exist(b"k")?);

    batch.commit()?;
    assert_eq!(engine.get(b"k")?, None);
    Ok(())
}

#[test]
fn pending_delete_of_committed_key_masks_it() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());
    engine.put(b"k".to_vec(), b"committed".to_vec())?;

    let mut batch = engine.new_batch(BatchOptions::default())?;
    assert_eq!(batch.get(b"k")?, Some(b"committed".to_vec()));
    batch.delete(b"k".to_vec())?;
    assert_eq!(batch.get(b"k")?, None);
    batch.commit()?;

    assert_eq!(engine.get(b"k")?, None);
    Ok(())
}

// --------------------- Commit visibility ---------------------

#[test]
fn commit_makes_all_writes_visible_atomically() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(BatchOptions::default())?;
    for i in 0..10 {
        batch.put(key(i), value(i))?;
    }
    batch.commit()?;

    for i in 0..10 {
        assert_eq!(engine.get(&key(i))?, Some(value(i)));
    }
    assert_eq!(engine.stat()?.key_num, 10);
    Ok(())
}

#[test]
fn empty_batch_commit_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());
    let batch = engine.new_batch(BatchOptions::default())?;
    batch.commit()?;
    assert_eq!(engine.stat()?.key_num, 0);
    Ok(())
}

#[test]
fn sync_batch_commit() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());
    let mut batch = engine.new_batch(BatchOptions {
        sync: true,
        read_only: false,
    })?;
    batch.put(b"durable".to_vec(), b"yes".to_vec())?;
    batch.commit()?;
    assert_eq!(engine.get(b"durable")?, Some(b"yes".to_vec()));
    Ok(())
}

// --------------------- Rollback ---------------------

#[test]
fn rollback_discards_pending_writes() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(BatchOptions::default())?;
    batch.put(b"ghost".to_vec(), b"value".to_vec())?;
    batch.rollback();

    assert_eq!(engine.get(b"ghost")?, None);
    Ok(())
}

#[test]
fn dropping_a_batch_rolls_back_and_releases_the_lock() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    {
        let mut batch = engine.new_batch(BatchOptions::default())?;
        batch.put(b"ghost".to_vec(), b"value".to_vec())?;
        // dropped without commit
    }

    // The engine lock must be free again and the write gone.
    engine.put(b"real".to_vec(), b"value".to_vec())?;
    assert_eq!(engine.get(b"ghost")?, None);
    assert_eq!(engine.get(b"real")?, Some(b"value".to_vec()));
    Ok(())
}

// --------------------- Read-only batches ---------------------

#[test]
fn read_only_batch_rejects_mutations() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());
    engine.put(b"k".to_vec(), b"v".to_vec())?;

    let mut batch = engine.new_batch(BatchOptions {
        read_only: true,
        sync: false,
    })?;
    assert!(matches!(
        batch.put(b"k2".to_vec(), b"v".to_vec()),
        Err(Error::ReadOnlyBatch)
    ));
    assert!(matches!(
        batch.delete(b"k".to_vec()),
        Err(Error::ReadOnlyBatch)
    ));
    assert_eq!(batch.get(b"k")?, Some(b"v".to_vec()));
    batch.commit()?;
    Ok(())
}

// --------------------- Delete staging rules ---------------------

#[test]
fn delete_of_unknown_key_stages_nothing() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(BatchOptions::default())?;
    batch.delete(b"missing".to_vec())?;
    batch.commit()?;

    // Nothing was written: the store is still empty on disk.
    assert_eq!(engine.stat()?.key_num, 0);
    assert!(engine.get(b"missing")?.is_none());
    Ok(())
}

#[test]
fn delete_of_pending_only_key_unstages_it() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    let mut batch = engine.new_batch(BatchOptions::default())?;
    batch.put(b"temp".to_vec(), b"v".to_vec())?;
    batch.delete(b"temp".to_vec())?;
    assert_eq!(batch.get(b"temp")?, None);
    batch.commit()?;

    assert_eq!(engine.get(b"temp")?, None);
    assert_eq!(engine.stat()?.key_num, 0);
    Ok(())
}

// --------------------- Crash atomicity ---------------------

#[test]
fn batch_without_terminator_is_discarded_on_replay() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path());
        let mut batch = engine.new_batch(BatchOptions::default())?;
        batch.put(b"a".to_vec(), b"1".to_vec())?;
        batch.put(b"b".to_vec(), b"2".to_vec())?;
        batch.put(b"c".to_vec(), b"3".to_vec())?;
        batch.commit()?;
        engine.close()?;
    }

    // Simulate a crash between the last record and the terminator: chop
    // the final chunk (the BatchFin) off the segment.
    truncate_last_chunk(dir.path())?;

    let engine = open_engine(dir.path());
    assert_eq!(engine.get(b"a")?, None);
    assert_eq!(engine.get(b"b")?, None);
    assert_eq!(engine.get(b"c")?, None);
    assert_eq!(engine.stat()?.key_num, 0);
    Ok(())
}

#[test]
fn earlier_committed_batches_survive_a_torn_one() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path());
        engine.put(b"stable".to_vec(), b"kept".to_vec())?;

        let mut batch = engine.new_batch(BatchOptions::default())?;
        batch.put(b"torn-1".to_vec(), b"x".to_vec())?;
        batch.put(b"torn-2".to_vec(), b"y".to_vec())?;
        batch.commit()?;
        engine.close()?;
    }

    truncate_last_chunk(dir.path())?;

    let engine = open_engine(dir.path());
    assert_eq!(engine.get(b"stable")?, Some(b"kept".to_vec()));
    assert_eq!(engine.get(b"torn-1")?, None);
    assert_eq!(engine.get(b"torn-2")?, None);
    Ok(())
}

/// Truncates the single data segment right before its final chunk, erasing
/// exactly one trailing record (used to tear off a batch terminator).
fn truncate_last_chunk(dir: &std::path::Path) -> Result<()> {
    let wal = wal::Wal::open(wal::Options {
        dir_path: dir.to_path_buf(),
        segment_file_ext: DATA_FILE_EXT.to_string(),
        ..Default::default()
    })?;
    let mut reader = wal.reader();
    let mut last_loc = None;
    while let Some((_, loc)) = reader.next()? {
        last_loc = Some(loc);
    }
    wal.close()?;
    let last = last_loc.expect("segment has at least one chunk");
    let cut = last.block_index as u64 * wal::BLOCK_SIZE as u64 + last.chunk_offset as u64;

    let path = wal::segment_file_name(dir, DATA_FILE_EXT, last.segment_id);
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_len(cut)?;
    Ok(())
}
