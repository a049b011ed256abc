//! Advisory cross-process lock on the database directory.
//!
//! One `FLOCK` file per directory, locked exclusively for the lifetime of
//! the engine. The kernel releases the lock when the descriptor closes, so
//! dropping the guard (or crashing) is enough to free it.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub(crate) struct FileLock {
    _file: File,
    #[allow(dead_code)]
    path: PathBuf,
}

impl FileLock {
    /// Attempts to take the exclusive lock without blocking.
    ///
    /// Returns `Ok(None)` when another process already holds it.
    pub(crate) fn try_acquire<P: AsRef<Path>>(path: P) -> io::Result<Option<FileLock>> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).write(true).open(&path)?;

        if !try_lock_exclusive(&file)? {
            return Ok(None);
        }

        Ok(Some(FileLock { _file: file, path }))
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<bool> {
    // No advisory locking on this platform; single-process use is assumed.
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("FLOCK");

        let held = FileLock::try_acquire(&path).unwrap();
        assert!(held.is_some());
        assert!(FileLock::try_acquire(&path).unwrap().is_none());
    }

    #[test]
    fn lock_releases_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("FLOCK");

        drop(FileLock::try_acquire(&path).unwrap());
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }
}
