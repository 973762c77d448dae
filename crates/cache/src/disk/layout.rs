//! On-disk layout of a cache root

use crate::keys::{CacheKey, RESERVED_SUFFIX};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub(crate) const FAILED_DELETIONS_FILE: &str = ".failedDeletions.$$$";
pub(crate) const ALTERNATES_FILE: &str = ".alternativeFiles.$$$";
pub(crate) const PENDING_ALTERNATE_DELETIONS_FILE: &str = ".failedDeletionsOfAlternatives.$$$";
const STAMP_MARKER: &str = ".stamp";

/// Maps keys to physical paths under a cache root
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `root/<key-path>`
    pub fn canonical_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.to_relative_path())
    }

    /// `root/<key-path>.<id>.$$$`, a sibling of the canonical file
    pub fn temporary_path(&self, canonical: &Path, id: u64) -> PathBuf {
        let mut name = canonical
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        name.push(format!(".{id}{RESERVED_SUFFIX}"));
        canonical.with_file_name(name)
    }

    /// `root/<key-path>.stamp.$$$`, the timestamp record of an entry
    pub fn stamp_path(&self, canonical: &Path) -> PathBuf {
        let mut name = canonical
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        name.push(format!("{STAMP_MARKER}{RESERVED_SUFFIX}"));
        canonical.with_file_name(name)
    }

    pub fn failed_deletions_file(&self) -> PathBuf {
        self.root.join(FAILED_DELETIONS_FILE)
    }

    pub fn alternates_file(&self) -> PathBuf {
        self.root.join(ALTERNATES_FILE)
    }

    pub fn pending_alternate_deletions_file(&self) -> PathBuf {
        self.root.join(PENDING_ALTERNATE_DELETIONS_FILE)
    }
}

/// True for temporary, alternate, timestamp and bookkeeping files
pub(crate) fn is_reserved(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(RESERVED_SUFFIX))
}
