//! File-based snapshot store.

use crate::backend::SnapshotStore;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file-based snapshot store.
///
/// # Durability
///
/// `replace` writes the new blob to `<path>.tmp`, calls `File::sync_all()`,
/// then renames it over `<path>`. A crash at any point leaves either the old
/// or the new snapshot on disk. With backups enabled the previous blob is
/// first copied to `<path>.bak`.
///
/// # Thread Safety
///
/// Writers are serialized by an internal lock.
///
/// # Example
///
/// ```no_run
/// use tagsync_storage::{FileSnapshotStore, SnapshotStore};
/// use std::path::Path;
///
/// let store = FileSnapshotStore::open(Path::new("state/offline.bin")).unwrap();
/// store.replace(b"snapshot").unwrap();
/// ```
#[derive(Debug)]
pub struct FileSnapshotStore {
    path: PathBuf,
    keep_backup: bool,
    write_lock: Mutex<()>,
}

impl FileSnapshotStore {
    /// Opens a store at `path`, creating parent directories if needed.
    ///
    /// The snapshot file itself is only created by the first `replace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            keep_backup: false,
            write_lock: Mutex::new(()),
        })
    }

    /// Keeps the previous snapshot as `<path>.bak` on every replace.
    #[must_use]
    pub fn with_backup(mut self, keep_backup: bool) -> Self {
        self.keep_backup = keep_backup;
        self
    }

    /// Returns the path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the backup file.
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, "bak")
    }

    /// Loads the backup written by the previous `replace`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup exists but cannot be read.
    pub fn load_backup(&self) -> StorageResult<Option<Vec<u8>>> {
        read_optional(&self.backup_path())
    }

    fn temp_path(&self) -> PathBuf {
        sibling(&self.path, "tmp")
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        match read_optional(&self.path)? {
            Some(bytes) if bytes.is_empty() => Err(StorageError::Corrupted(format!(
                "{} is empty",
                self.path.display()
            ))),
            other => Ok(other),
        }
    }

    fn replace(&self, bytes: &[u8]) -> StorageResult<()> {
        let _guard = self.write_lock.lock();

        if self.keep_backup && self.path.exists() {
            fs::copy(&self.path, self.backup_path())?;
        }

        let temp = self.temp_path();
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        // Persist the rename itself where the platform allows opening directories.
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                if let Err(e) = dir.sync_all() {
                    debug!(path = %parent.display(), error = %e, "directory sync failed");
                }
            }
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot replaced");
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn read_optional(path: &Path) -> StorageResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_load_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::open(&dir.path().join("offline.bin")).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn file_replace_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("offline.bin");

        {
            let store = FileSnapshotStore::open(&path).unwrap();
            store.replace(b"first").unwrap();
            store.replace(b"second").unwrap();
        }

        let store = FileSnapshotStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap().unwrap(), b"second");
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn file_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("apps_data").join("tagracer").join("offline.bin");
        let store = FileSnapshotStore::open(&path).unwrap();
        store.replace(b"data").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn file_keeps_backup() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::open(&dir.path().join("offline.bin"))
            .unwrap()
            .with_backup(true);

        assert!(store.load_backup().unwrap().is_none());
        store.replace(b"v1").unwrap();
        store.replace(b"v2").unwrap();

        assert_eq!(store.load().unwrap().unwrap(), b"v2");
        assert_eq!(store.load_backup().unwrap().unwrap(), b"v1");
    }

    #[test]
    fn file_empty_blob_is_corrupted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("offline.bin");
        fs::write(&path, b"").unwrap();

        let store = FileSnapshotStore::open(&path).unwrap();
        assert!(matches!(store.load(), Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::open(&dir.path().join("offline.bin")).unwrap();
        store.replace(b"data").unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
