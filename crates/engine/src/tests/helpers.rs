use crate::{Engine, Options};
use std::path::Path;

pub fn test_options(dir: &Path) -> Options {
    Options {
        dir_path: dir.to_path_buf(),
        ..Default::default()
    }
}

pub fn open_engine(dir: &Path) -> Engine {
    Engine::open(test_options(dir)).unwrap()
}

pub fn key(i: u32) -> Vec<u8> {
    format!("key-{i:06}").into_bytes()
}

pub fn value(i: u32) -> Vec<u8> {
    format!("value-{i:06}").into_bytes()
}

pub fn count_files_with_ext(dir: &Path, ext: &str) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(ext))
        .count()
}
