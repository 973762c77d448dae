//! Entry timestamps
//!
//! The timestamp of an entry lives in a small record next to its canonical
//! file (`<name>.stamp.$$$`), so it is independent of the file's own
//! modification time and survives alternate redirection and promotion.

use super::atomic::write_atomic;
use super::bookkeeping::Bookkeeping;
use super::{codec, DiskBackend};
use crate::errors::{CacheError, Result};
use crate::handle::Timestamp;
use std::fs;
use std::io;
use std::path::Path;

impl DiskBackend {
    /// Recorded timestamp of the entry at `canonical`; `None` when no
    /// readable record exists
    pub(super) fn read_stamp(&self, canonical: &Path) -> Option<Timestamp> {
        let path = self.layout.stamp_path(canonical);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read entry timestamp");
                return None;
            }
        };
        match codec::decode_timestamp(&text) {
            Ok(timestamp) => Some(timestamp),
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "ignoring corrupt entry timestamp");
                None
            }
        }
    }

    pub(super) fn write_stamp(
        &self,
        book: &mut Bookkeeping,
        canonical: &Path,
        timestamp: Timestamp,
    ) -> Result<()> {
        let path = self.layout.stamp_path(canonical);
        match write_atomic(&path, codec::encode_timestamp(timestamp).as_bytes()) {
            Ok(()) => {
                // an older record at this path may still be queued for deletion
                book.clear_pending(&path);
                Ok(())
            }
            Err(e) => Err(CacheError::io(&path, "write entry timestamp", e)),
        }
    }

    /// Delete the timestamp record of `canonical`, deferring it on failure.
    /// Returns `false` when the record is still on disk.
    pub(super) fn delete_stamp(&self, book: &mut Bookkeeping, canonical: &Path) -> bool {
        let path = self.layout.stamp_path(canonical);
        if self.delete_physical(&path) {
            book.clear_pending(&path);
            true
        } else {
            book.mark_pending(path);
            false
        }
    }
}
