//! Failure bookkeeping of the disk backend
//!
//! Three collections remember physical cleanup the backend still owes:
//!
//! - failed deletions: files that are logically gone but could not be
//!   deleted yet;
//! - alternates: canonical paths whose current content is parked in an
//!   alternate file because the stale canonical file could not be removed;
//! - pending alternate deletions: superseded alternate files that could not
//!   be deleted yet.
//!
//! Each collection is persisted to its own file under the cache root when it
//! changes and the file is removed once the collection is empty. A file that
//! cannot be read back is logged and treated as an empty collection.

use super::atomic::write_atomic;
use super::codec;
use super::layout::Layout;
use crate::errors::CacheError;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, Copy)]
struct Dirty {
    failed: bool,
    alternates: bool,
    pending: bool,
}

#[derive(Debug)]
pub(crate) struct Bookkeeping {
    failed_file: PathBuf,
    alternates_file: PathBuf,
    pending_file: PathBuf,
    failed: BTreeSet<PathBuf>,
    alternates: BTreeMap<PathBuf, PathBuf>,
    pending: BTreeSet<PathBuf>,
    dirty: Dirty,
}

impl Bookkeeping {
    /// Load the persisted collections of a cache root
    pub fn load(layout: &Layout) -> Self {
        let failed_file = layout.failed_deletions_file();
        let alternates_file = layout.alternates_file();
        let pending_file = layout.pending_alternate_deletions_file();

        let failed = read_collection(&failed_file, codec::decode_set).unwrap_or_default();
        let alternates = read_collection(&alternates_file, codec::decode_map).unwrap_or_default();
        let pending = read_collection(&pending_file, codec::decode_set).unwrap_or_default();

        let mut book = Self {
            failed_file,
            alternates_file,
            pending_file,
            failed,
            alternates,
            pending,
            dirty: Dirty::default(),
        };
        book.prune_vanished();

        if !book.is_empty() {
            tracing::info!(
                failed_deletions = book.failed.len(),
                alternates = book.alternates.len(),
                pending_alternate_deletions = book.pending.len(),
                "restored cache bookkeeping"
            );
        }
        book
    }

    /// Forget entries whose files disappeared while the cache was closed
    fn prune_vanished(&mut self) {
        let before = self.failed.len();
        self.failed.retain(|path| path.exists());
        self.dirty.failed |= self.failed.len() != before;

        let before = self.pending.len();
        self.pending.retain(|path| path.exists());
        self.dirty.pending |= self.pending.len() != before;

        let mut stale = Vec::new();
        self.alternates.retain(|target, alternate| {
            let present = alternate.exists();
            if !present {
                tracing::warn!(
                    canonical = %target.display(),
                    alternate = %alternate.display(),
                    "dropping alternate mapping whose file no longer exists"
                );
                stale.push(target.clone());
            }
            present
        });
        self.dirty.alternates |= !stale.is_empty();

        // the canonical file was superseded by the lost alternate
        for target in stale {
            if target.is_file() {
                self.mark_failed(target);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty() && self.alternates.is_empty() && self.pending.is_empty()
    }

    pub fn is_failed(&self, path: &Path) -> bool {
        self.failed.contains(path)
    }

    pub fn mark_failed(&mut self, path: PathBuf) {
        self.dirty.failed |= self.failed.insert(path);
    }

    pub fn clear_failed(&mut self, path: &Path) -> bool {
        let removed = self.failed.remove(path);
        self.dirty.failed |= removed;
        removed
    }

    pub fn failed_paths(&self) -> Vec<PathBuf> {
        self.failed.iter().cloned().collect()
    }

    pub fn alternate(&self, target: &Path) -> Option<&PathBuf> {
        self.alternates.get(target)
    }

    pub fn is_alternate(&self, path: &Path) -> bool {
        self.alternates.values().any(|alternate| alternate == path)
    }

    pub fn set_alternate(&mut self, target: PathBuf, alternate: PathBuf) {
        self.alternates.insert(target, alternate);
        self.dirty.alternates = true;
    }

    pub fn take_alternate(&mut self, target: &Path) -> Option<PathBuf> {
        let taken = self.alternates.remove(target);
        self.dirty.alternates |= taken.is_some();
        taken
    }

    pub fn alternate_pairs(&self) -> Vec<(PathBuf, PathBuf)> {
        self.alternates
            .iter()
            .map(|(target, alternate)| (target.clone(), alternate.clone()))
            .collect()
    }

    /// Alternate targets located under `dir`
    pub fn alternate_targets_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.alternates
            .keys()
            .filter(|target| target.starts_with(dir))
            .cloned()
            .collect()
    }

    /// The file currently holding the content for a canonical path
    pub fn active_path(&self, canonical: &Path) -> PathBuf {
        match self.alternate(canonical) {
            Some(alternate) => alternate.clone(),
            None => canonical.to_path_buf(),
        }
    }

    pub fn mark_pending(&mut self, path: PathBuf) {
        self.dirty.pending |= self.pending.insert(path);
    }

    pub fn clear_pending(&mut self, path: &Path) -> bool {
        let removed = self.pending.remove(path);
        self.dirty.pending |= removed;
        removed
    }

    pub fn pending_paths(&self) -> Vec<PathBuf> {
        self.pending.iter().cloned().collect()
    }

    pub fn outstanding(&self) -> usize {
        self.failed.len() + self.pending.len() + self.alternates.len()
    }

    /// Write every collection that changed since the last call
    pub fn persist(&mut self) {
        let dirty = std::mem::take(&mut self.dirty);

        if dirty.failed {
            store_collection(&self.failed_file, self.failed.is_empty(), || {
                codec::encode_set(&self.failed)
            });
        }
        if dirty.alternates {
            store_collection(&self.alternates_file, self.alternates.is_empty(), || {
                codec::encode_map(&self.alternates)
            });
        }
        if dirty.pending {
            store_collection(&self.pending_file, self.pending.is_empty(), || {
                codec::encode_set(&self.pending)
            });
        }
    }
}

fn read_collection<T>(path: &Path, decode: fn(&str) -> Result<T, String>) -> Option<T> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read bookkeeping file, starting empty");
            return None;
        }
    };

    match decode(&text) {
        Ok(collection) => Some(collection),
        Err(reason) => {
            let error = CacheError::Bookkeeping {
                path: path.to_path_buf(),
                reason,
                recovery_hint: crate::errors::RecoveryHint::Ignore,
            };
            tracing::warn!(error = %error, "discarding corrupt bookkeeping file");
            None
        }
    }
}

fn store_collection(path: &Path, empty: bool, encode: impl FnOnce() -> String) {
    if empty {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove empty bookkeeping file");
            }
        }
        return;
    }

    if let Err(e) = write_atomic(path, encode().as_bytes()) {
        tracing::warn!(path = %path.display(), error = %e, "failed to persist bookkeeping");
    }
}
