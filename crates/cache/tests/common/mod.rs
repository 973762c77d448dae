//! Shared helpers for the pathcache integration tests

#![allow(dead_code)]

use pathcache::testing::LockingFileOps;
use pathcache::{CacheService, CancellationToken, ContentBackend, DiskBackend, Timestamp};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

/// A disk cache in a fresh temporary directory whose deletes and renames can
/// be made to fail on demand
pub struct LockableCache {
    pub service: CacheService<DiskBackend>,
    pub ops: Arc<LockingFileOps>,
    pub temp_dir: TempDir,
}

impl LockableCache {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let ops = Arc::new(LockingFileOps::new());
        let service = open_disk(temp_dir.path(), &ops);
        Self {
            service,
            ops,
            temp_dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Physical canonical file of `key`
    pub fn path_of(&self, key: &str) -> PathBuf {
        self.root().join(key)
    }

    /// Simulate the process restarting on the same cache root
    pub fn reopen(&mut self) {
        self.service = open_disk(self.temp_dir.path(), &self.ops);
    }

    pub fn outstanding(&self) -> usize {
        self.service.with_backend(|backend| backend.outstanding_cleanups())
    }
}

pub fn open_disk(root: &Path, ops: &Arc<LockingFileOps>) -> CacheService<DiskBackend> {
    let backend = DiskBackend::builder(root)
        .file_ops(ops.clone())
        .open()
        .unwrap();
    CacheService::new(backend)
}

pub fn put<B: ContentBackend>(service: &CacheService<B>, key: &str, data: &[u8]) {
    service
        .add_content(key, data, false, &CancellationToken::new())
        .unwrap();
}

pub fn put_at<B: ContentBackend>(
    service: &CacheService<B>,
    key: &str,
    data: &[u8],
    timestamp: Timestamp,
) {
    service
        .add_content_with_timestamp(key, data, false, timestamp, &CancellationToken::new())
        .unwrap();
}

pub fn append<B: ContentBackend>(service: &CacheService<B>, key: &str, data: &[u8]) {
    service
        .add_content(key, data, true, &CancellationToken::new())
        .unwrap();
}

pub fn read<B: ContentBackend>(service: &CacheService<B>, key: &str) -> Option<Vec<u8>> {
    service
        .get_content(key)
        .unwrap()
        .map(|reader| reader.into_vec().unwrap())
}

/// Every temporary, alternate or metadata file left under `root`.
/// Timestamp records of live entries are not counted.
pub fn leaked_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.ends_with(".$$$") && !name.ends_with(".stamp.$$$")
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// Timestamp record of the entry stored at `canonical`
pub fn stamp_of(canonical: &Path) -> PathBuf {
    let mut name = canonical.as_os_str().to_owned();
    name.push(".stamp.$$$");
    PathBuf::from(name)
}
