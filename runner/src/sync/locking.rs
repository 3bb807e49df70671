use nix::{
    errno::Errno,
    fcntl::{flock, FlockArg},
};
use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};

pub const LOCK_SUFFIX: &str = ".lock";

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Another run is already working on this batch ({0} is locked)")]
    Held(PathBuf),
    #[error("Failed to open lock file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("Failed to lock {path}: {source}")]
    Lock { path: PathBuf, source: Errno },
}

/// Exclusive advisory lock next to a batch file, released on drop.
///
/// Submitting reads the cursor, calls sbatch and writes the cursor back. Two runs doing that
/// at the same time would submit the same window twice, so `submit` holds this lock for the
/// whole cycle. Other tools editing the batch file are not stopped by it.
#[derive(Debug)]
pub struct BatchLock {
    file: File,
    path: PathBuf,
}

impl BatchLock {
    pub fn lock_path(batch: &Path) -> PathBuf {
        let mut file_name = batch.file_name().unwrap_or_default().to_os_string();
        file_name.push(LOCK_SUFFIX);

        batch.with_file_name(file_name)
    }

    /// Try to take the lock without waiting
    pub fn acquire(batch: &Path) -> Result<Self, LockError> {
        let path = Self::lock_path(batch);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {
                debug!(path = ?path, "Acquired batch lock");
                Ok(Self { file, path })
            }
            Err(Errno::EWOULDBLOCK) => Err(LockError::Held(path)),
            Err(source) => Err(LockError::Lock { path, source }),
        }
    }
}

impl Drop for BatchLock {
    fn drop(&mut self) {
        // closing the file releases the lock as well, unlocking first just makes it explicit
        match flock(self.file.as_raw_fd(), FlockArg::Unlock) {
            Ok(()) => debug!(path = ?self.path, "Released batch lock"),
            Err(error) => warn!(path = ?self.path, "Failed to release batch lock: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_file_sits_next_to_the_batch() {
        assert_eq!(
            BatchLock::lock_path(Path::new("/scratch/sweep/batch.conf")),
            PathBuf::from("/scratch/sweep/batch.conf.lock")
        );
    }

    #[test]
    fn second_run_is_turned_away() {
        let dir = TempDir::new().unwrap();
        let batch = dir.path().join("batch.conf");

        let first = BatchLock::acquire(&batch).unwrap();
        assert!(matches!(
            BatchLock::acquire(&batch),
            Err(LockError::Held(_))
        ));

        drop(first);
        assert!(BatchLock::acquire(&batch).is_ok());
    }
}
