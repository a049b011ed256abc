use super::helpers::*;
use crate::*;
use tempfile::tempdir;

// --------------------- Ordering & values ---------------------

#[test]
fn iterates_pairs_in_key_order() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());
    for k in ["delta", "bravo", "echo", "alpha", "charlie"] {
        engine.put(k.as_bytes().to_vec(), format!("v-{k}").into_bytes())?;
    }

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = engine
        .iter(IteratorOptions::default())
        .collect::<Result<_>>()?;
    let keys: Vec<&[u8]> = pairs.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, [b"alpha".as_slice(), b"bravo", b"charlie", b"delta", b"echo"]);
    assert_eq!(pairs[0].1, b"v-alpha".to_vec());
    Ok(())
}

#[test]
fn deleted_keys_are_not_yielded() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());
    for i in 0..10 {
        engine.put(key(i), value(i))?;
    }
    for i in 0..5 {
        engine.delete(key(i))?;
    }

    let pairs: Vec<_> = engine
        .iter(IteratorOptions::default())
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(pairs.len(), 5);
    assert_eq!(pairs[0].0, key(5));
    Ok(())
}

// --------------------- Prefix & reverse ---------------------

#[test]
fn prefix_bounds_iteration() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());
    for k in ["user:1", "user:2", "cart:1", "user:3", "zz"] {
        engine.put(k.as_bytes().to_vec(), b"v".to_vec())?;
    }

    let keys: Vec<Vec<u8>> = engine
        .iter(IteratorOptions {
            prefix: b"user:".to_vec(),
            reverse: false,
        })
        .map(|item| item.map(|(k, _)| k))
        .collect::<Result<_>>()?;
    assert_eq!(keys, vec![b"user:1".to_vec(), b"user:2".to_vec(), b"user:3".to_vec()]);
    Ok(())
}

#[test]
fn reverse_iteration_descends() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());
    for i in 0..5 {
        engine.put(key(i), value(i))?;
    }

    let keys: Vec<Vec<u8>> = engine
        .iter(IteratorOptions {
            prefix: Vec::new(),
            reverse: true,
        })
        .map(|item| item.map(|(k, _)| k))
        .collect::<Result<_>>()?;
    assert_eq!(keys, vec![key(4), key(3), key(2), key(1), key(0)]);
    Ok(())
}

// --------------------- seek & rewind ---------------------

#[test]
fn seek_and_rewind() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());
    for i in 0..10 {
        engine.put(key(i), value(i))?;
    }

    let mut iter = engine.iter(IteratorOptions::default());
    iter.seek(&key(7));
    let (k, v) = iter.next().unwrap()?;
    assert_eq!(k, key(7));
    assert_eq!(v, value(7));

    iter.rewind();
    let (k, _) = iter.next().unwrap()?;
    assert_eq!(k, key(0));
    Ok(())
}

// --------------------- Snapshot semantics ---------------------

#[test]
fn iterator_does_not_observe_later_writes() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());
    for i in 0..5 {
        engine.put(key(i), value(i))?;
    }

    let iter = engine.iter(IteratorOptions::default());
    engine.put(key(99), value(99))?;
    engine.delete(key(0))?;

    // The snapshot still reflects the state at construction; the deleted
    // key's record is untouched on disk (segments are append-only).
    let pairs: Vec<_> = iter.collect::<Result<Vec<_>>>()?;
    assert_eq!(pairs.len(), 5);
    assert_eq!(pairs[0], (key(0), value(0)));
    Ok(())
}

// --------------------- Index variants ---------------------

#[test]
fn iteration_is_identical_across_index_types() -> Result<()> {
    for index_type in [IndexType::BTree, IndexType::Art, IndexType::SkipList] {
        let dir = tempdir()?;
        let engine = Engine::open(Options {
            dir_path: dir.path().to_path_buf(),
            index_type,
            ..Default::default()
        })?;
        for i in (0..50).rev() {
            engine.put(key(i), value(i))?;
        }

        let keys: Vec<Vec<u8>> = engine
            .iter(IteratorOptions::default())
            .map(|item| item.map(|(k, _)| k))
            .collect::<Result<_>>()?;
        assert_eq!(keys.len(), 50, "{index_type:?}");
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "{index_type:?}");
    }
    Ok(())
}

// --------------------- After restart & merge ---------------------

#[test]
fn iteration_after_restart_and_merge() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_engine(dir.path());
        for i in 0..30 {
            engine.put(key(i), value(i))?;
        }
        for i in 0..10 {
            engine.delete(key(i))?;
        }
        engine.merge()?;
        engine.close()?;
    }

    let engine = open_engine(dir.path());
    let pairs: Vec<_> = engine
        .iter(IteratorOptions::default())
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(pairs.len(), 20);
    assert_eq!(pairs[0], (key(10), value(10)));
    assert_eq!(pairs[19], (key(29), value(29)));
    Ok(())
}
