use crate::error::{Result, StorageError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LOCK_FILE_NAME: &str = "db.lock";

/// Exclusive advisory lock on a database folder.
///
/// Held for the whole lifetime of an open store; dropping it releases the lock
/// so a failed open never leaves the folder owned.
#[derive(Debug)]
pub struct DatabaseLock {
    path: PathBuf,
    file: File,
}

impl DatabaseLock {
    pub fn acquire(database_dir: &Path) -> Result<Self> {
        fs::create_dir_all(database_dir)?;
        let path = database_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::AlreadyOpen(database_dir.to_path_buf()));
        }
        debug!("Acquired database lock at {:?}", path);
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DatabaseLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!("Failed to release database lock {:?}: {}", self.path, err);
        } else {
            debug!("Released database lock at {:?}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_on_same_folder_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let first = DatabaseLock::acquire(dir.path()).unwrap();
        assert!(first.path().ends_with(LOCK_FILE_NAME));

        let err = DatabaseLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyOpen(_)));

        drop(first);
        DatabaseLock::acquire(dir.path()).unwrap();
    }
}
