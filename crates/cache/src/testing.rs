//! Test doubles for exercising failure recovery
//!
//! [`LockingFileOps`] behaves like [`StdFileOps`](crate::disk::StdFileOps)
//! except for paths that have been *locked*: deleting or renaming them fails
//! with `PermissionDenied`, the way a platform with exclusive file locks
//! refuses to touch a file another process holds open.

use crate::disk::FileOps;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct LockingFileOps {
    locked: Mutex<HashSet<PathBuf>>,
}

impl LockingFileOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse deletes and renames of `path` until it is unlocked
    pub fn lock(&self, path: impl Into<PathBuf>) {
        self.locked.lock().insert(path.into());
    }

    pub fn unlock(&self, path: &Path) {
        self.locked.lock().remove(path);
    }

    pub fn unlock_all(&self) {
        self.locked.lock().clear();
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.locked.lock().contains(path)
    }

    fn refuse(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("'{}' is held open by another process", path.display()),
        )
    }
}

impl FileOps for LockingFileOps {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        if self.is_locked(path) {
            return Err(Self::refuse(path));
        }
        fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        for path in [from, to] {
            if self.is_locked(path) {
                return Err(Self::refuse(path));
            }
        }
        fs::rename(from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_locked_paths_are_refused() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("held");
        fs::write(&path, b"x").unwrap();

        let ops = LockingFileOps::new();
        ops.lock(&path);
        let err = ops.remove_file(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(ops.rename(&path, &temp_dir.path().join("moved")).is_err());
        assert!(path.exists());

        ops.unlock(&path);
        ops.remove_file(&path).unwrap();
        assert!(!path.exists());
    }
}
