use super::helpers::*;
use crate::*;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

// --------------------- Live set preservation ---------------------

#[test]
fn merge_preserves_live_set_and_drops_tombstones() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path());
        for i in 0..2000 {
            engine.put(key(i), value(i))?;
        }
        for i in 0..1000 {
            engine.delete(key(i))?;
        }
        engine.merge()?;
        engine.close()?;
    }

    let engine = open_engine(dir.path());
    assert_eq!(engine.stat()?.key_num, 1000);
    assert_eq!(engine.get(&key(0))?, None);
    assert_eq!(engine.get(&key(999))?, None);
    assert_eq!(engine.get(&key(1000))?, Some(value(1000)));
    assert_eq!(engine.get(&key(1999))?, Some(value(1999)));
    Ok(())
}

#[test]
fn merge_keeps_only_newest_version() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path());
        for round in 0..10u32 {
            engine.put(b"hot".to_vec(), format!("round-{round}").into_bytes())?;
        }
        engine.merge()?;
        engine.close()?;
    }

    let engine = open_engine(dir.path());
    assert_eq!(engine.get(b"hot")?, Some(b"round-9".to_vec()));
    assert_eq!(engine.stat()?.key_num, 1);
    Ok(())
}

#[test]
fn merge_produces_hint_file_and_marker() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path());
        for i in 0..100 {
            engine.put(key(i), value(i))?;
        }
        engine.merge()?;
        engine.close()?;
    }

    // Adoption happens on the next open.
    {
        let engine = open_engine(dir.path());
        assert_eq!(engine.stat()?.key_num, 100);
        engine.close()?;
    }
    assert_eq!(count_files_with_ext(dir.path(), HINT_FILE_EXT), 1);
    assert_eq!(count_files_with_ext(dir.path(), MERGE_FIN_EXT), 1);
    // The staging directory is consumed by adoption.
    assert!(!dir.path().with_file_name(
        format!("{}-merge", dir.path().file_name().unwrap().to_string_lossy())
    ).exists());
    Ok(())
}

#[test]
fn merge_reclaims_disk_space() -> Result<()> {
    let dir = tempdir()?;
    let small = Options {
        dir_path: dir.path().to_path_buf(),
        segment_size: 64 * 1024,
        ..Default::default()
    };
    {
        let engine = Engine::open(small.clone())?;
        for i in 0..500 {
            engine.put(key(i), vec![b'x'; 512])?;
        }
        for i in 0..450 {
            engine.delete(key(i))?;
        }
        let segments_before = engine.stat()?.segment_num;
        assert!(segments_before > 2);
        engine.merge()?;
        engine.close()?;
    }

    let engine = Engine::open(small)?;
    let stat = engine.stat()?;
    assert_eq!(stat.key_num, 50);
    // Old segments were replaced by the compacted ones.
    assert!(count_files_with_ext(dir.path(), DATA_FILE_EXT) < 5);
    Ok(())
}

// --------------------- Writes after / during merge ---------------------

#[test]
fn writes_after_merge_supersede_merged_values() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path());
        for i in 0..100 {
            engine.put(key(i), value(i))?;
        }
        engine.merge()?;

        // Post-merge mutations land in segments the merge did not touch.
        engine.put(key(0), b"newer".to_vec())?;
        engine.delete(key(1))?;
        engine.put(key(200), value(200))?;
        engine.close()?;
    }

    let engine = open_engine(dir.path());
    assert_eq!(engine.get(&key(0))?, Some(b"newer".to_vec()));
    assert_eq!(engine.get(&key(1))?, None);
    assert_eq!(engine.get(&key(200))?, Some(value(200)));
    assert_eq!(engine.get(&key(50))?, Some(value(50)));
    assert_eq!(engine.stat()?.key_num, 100);
    Ok(())
}

#[test]
fn merge_concurrent_with_writes() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Arc::new(open_engine(dir.path()));
        for i in 0..2000 {
            engine.put(key(i), value(i))?;
        }

        let writer = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 3000..3500u32 {
                    engine.put(key(i), value(i)).unwrap();
                }
                for i in 0..1000u32 {
                    engine.delete(key(i)).unwrap();
                }
            })
        };
        engine.merge()?;
        writer.join().unwrap();
        engine.close()?;
    }

    let engine = open_engine(dir.path());
    assert_eq!(engine.stat()?.key_num, 1500);
    for i in (0..1000).step_by(111) {
        assert_eq!(engine.get(&key(i))?, None);
    }
    for i in (1000..2000).step_by(111) {
        assert_eq!(engine.get(&key(i))?, Some(value(i)));
    }
    for i in (3000..3500).step_by(111) {
        assert_eq!(engine.get(&key(i))?, Some(value(i)));
    }
    Ok(())
}

// --------------------- Merge edge cases ---------------------

#[test]
fn merge_of_empty_store_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());
    engine.merge()?;
    assert_eq!(engine.stat()?.key_num, 0);
    Ok(())
}

#[test]
fn repeated_merges_converge() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path());
        for i in 0..200 {
            engine.put(key(i), value(i))?;
        }
        engine.merge()?;
        engine.close()?;
    }
    {
        let engine = open_engine(dir.path());
        for i in 100..150 {
            engine.delete(key(i))?;
        }
        engine.merge()?;
        engine.close()?;
    }

    let engine = open_engine(dir.path());
    assert_eq!(engine.stat()?.key_num, 150);
    assert_eq!(engine.get(&key(120))?, None);
    assert_eq!(engine.get(&key(160))?, Some(value(160)));
    Ok(())
}

#[test]
fn merge_with_everything_deleted_empties_the_store() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path());
        for i in 0..100 {
            engine.put(key(i), value(i))?;
        }
        for i in 0..100 {
            engine.delete(key(i))?;
        }
        engine.merge()?;
        engine.close()?;
    }

    let engine = open_engine(dir.path());
    assert_eq!(engine.stat()?.key_num, 0);
    assert_eq!(engine.get(&key(50))?, None);
    Ok(())
}

#[test]
fn staging_dir_without_marker_is_discarded() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path());
        engine.put(b"kept".to_vec(), b"v".to_vec())?;
        engine.close()?;
    }

    // Fake a crashed merge: staging dir exists, no MERGE_FIN marker.
    let staging = dir.path().with_file_name(format!(
        "{}-merge",
        dir.path().file_name().unwrap().to_string_lossy()
    ));
    std::fs::create_dir_all(&staging)?;
    std::fs::write(staging.join("000000001.SEG"), b"half-written garbage")?;

    let engine = open_engine(dir.path());
    assert!(!staging.exists(), "dead staging dir should be removed");
    assert_eq!(engine.get(b"kept")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn merge_restart_merge_cycle_preserves_values() -> Result<()> {
    let dir = tempdir()?;
    for cycle in 0..3u32 {
        let engine = open_engine(dir.path());
        engine.put(
            format!("cycle-{cycle}").into_bytes(),
            format!("v{cycle}").into_bytes(),
        )?;
        engine.merge()?;
        engine.close()?;
    }

    let engine = open_engine(dir.path());
    for cycle in 0..3u32 {
        assert_eq!(
            engine.get(format!("cycle-{cycle}").as_bytes())?,
            Some(format!("v{cycle}").into_bytes())
        );
    }
    Ok(())
}
