//! Deletion, deferred-deletion retries and directory compaction

use super::bookkeeping::Bookkeeping;
use super::layout::is_reserved;
use super::DiskBackend;
use crate::errors::{CacheError, Result};
use crate::reclaim::ReclaimReport;
use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

pub(super) fn physically_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

impl DiskBackend {
    /// Logical existence of a physical file.
    ///
    /// A path with a failed deletion on record is logically gone; the
    /// deletion is retried first and the answer is `false` whether or not
    /// the retry succeeds.
    pub(super) fn check_file_exists(&self, book: &mut Bookkeeping, path: &Path) -> bool {
        if book.is_failed(path) {
            if self.delete_physical(path) {
                book.clear_failed(path);
                if let Some(parent) = path.parent() {
                    self.compact_ancestors(parent);
                }
            }
            return false;
        }
        crate::handle::is_regular_file(path)
    }

    /// Delete a file, treating an already missing file as deleted
    pub(super) fn delete_physical(&self, path: &Path) -> bool {
        match self.file_ops.remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "deletion failed, will retry");
                false
            }
        }
    }

    /// Delete the entry stored at `canonical`, alternate and timestamp first.
    ///
    /// Failures are recorded instead of raised. Returns `true` when nothing
    /// of the entry is left on disk.
    pub(super) fn try_delete(&self, book: &mut Bookkeeping, canonical: &Path) -> bool {
        let mut gone = true;

        if let Some(alternate) = book.take_alternate(canonical) {
            if !self.delete_physical(&alternate) {
                book.mark_pending(alternate);
                gone = false;
            }
        }
        gone &= self.delete_stamp(book, canonical);

        let is_dir = fs::symlink_metadata(canonical)
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if is_dir {
            return gone;
        }

        if self.delete_physical(canonical) {
            book.clear_failed(canonical);
        } else {
            book.mark_failed(canonical.to_path_buf());
            gone = false;
        }
        gone
    }

    /// Retry every superseded alternate still waiting for deletion
    pub(super) fn retry_pending_alternates(&self, book: &mut Bookkeeping) -> (usize, usize) {
        let mut reclaimed = 0;
        let mut remaining = 0;
        for path in book.pending_paths() {
            if self.delete_physical(&path) {
                book.clear_pending(&path);
                if let Some(parent) = path.parent() {
                    self.compact_ancestors(parent);
                }
                reclaimed += 1;
            } else {
                remaining += 1;
            }
        }
        (reclaimed, remaining)
    }

    /// Remove `start` and its ancestors while they are empty, stopping at
    /// the cache root
    pub(super) fn compact_ancestors(&self, start: &Path) {
        let root = self.layout.root();
        let mut dir = start.to_path_buf();

        while dir != root && dir.starts_with(root) {
            match fs::remove_dir(&dir) {
                Ok(()) => tracing::trace!(dir = %dir.display(), "removed empty directory"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(_) => break,
            }
            if !dir.pop() {
                break;
            }
        }
    }

    /// Delete `target` and everything below it
    pub(super) fn delete_tree(&self, book: &mut Bookkeeping, target: &Path) -> Result<()> {
        let meta = match fs::symlink_metadata(target) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(CacheError::io(target, "inspect removal target", e)),
        };

        match meta {
            Some(meta) if meta.is_dir() => self.delete_directory(book, target),
            _ => {
                self.try_delete(book, target);
            }
        }

        // alternates whose stale canonical file vanished are not found by the walk
        for canonical in book.alternate_targets_under(target) {
            self.try_delete(book, &canonical);
        }

        self.retry_pending_alternates(book);
        self.compact_ancestors(target);
        Ok(())
    }

    fn delete_directory(&self, book: &mut Bookkeeping, dir: &Path) {
        for entry in WalkDir::new(dir).contents_first(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();

            if entry.file_type().is_dir() {
                // non-empty directories still hold leaked files
                let _ = fs::remove_dir(path);
                continue;
            }

            if is_reserved(path) {
                if book.is_alternate(path) {
                    continue;
                }
                if self.delete_physical(path) {
                    book.clear_pending(path);
                } else {
                    book.mark_pending(path.to_path_buf());
                }
                continue;
            }

            self.try_delete(book, path);
        }
    }

    /// One full pass over every deferred cleanup
    pub(super) fn reclaim_all(&self, book: &mut Bookkeeping) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        for path in book.failed_paths() {
            if self.delete_physical(&path) {
                book.clear_failed(&path);
                if let Some(parent) = path.parent() {
                    self.compact_ancestors(parent);
                }
                report.reclaimed += 1;
            } else {
                report.still_pending += 1;
            }
        }

        let (reclaimed, remaining) = self.retry_pending_alternates(book);
        report.reclaimed += reclaimed;
        report.still_pending += remaining;

        for (canonical, alternate) in book.alternate_pairs() {
            if physically_exists(&canonical) && !self.delete_physical(&canonical) {
                report.still_pending += 1;
                continue;
            }
            match self.file_ops.rename(&alternate, &canonical) {
                Ok(()) => {
                    book.take_alternate(&canonical);
                    report.alternates_promoted += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %canonical.display(),
                        alternate = %alternate.display(),
                        error = %e,
                        "cannot move alternate back into place"
                    );
                    report.still_pending += 1;
                }
            }
        }

        if report.changed() {
            tracing::info!(
                reclaimed = report.reclaimed,
                promoted = report.alternates_promoted,
                still_pending = report.still_pending,
                "reclaimed deferred deletions"
            );
        }
        report
    }
}
