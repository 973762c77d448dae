//! Atomic commit of temporary entries

use super::bookkeeping::Bookkeeping;
use super::{DiskBackend, DiskSink};
use crate::errors::{CacheError, Result};
use crate::handle::{TemporaryContentHandle, Timestamp};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

impl DiskBackend {
    pub(super) fn commit_entry(
        &self,
        handle: TemporaryContentHandle<DiskSink>,
        timestamp: Timestamp,
    ) -> Result<()> {
        let (key, _, _, sink) = handle.into_parts();
        let DiskSink {
            writer,
            path,
            in_place,
        } = sink;
        let canonical = self.canonical_path(&key);

        if let Err(e) = finish(writer) {
            if !in_place {
                self.abandon(&path);
            }
            return Err(CacheError::io(&path, "flush temporary entry", e));
        }

        let mut book = self.book.lock();

        if in_place {
            let result = self.write_stamp(&mut book, &canonical, timestamp);
            book.persist();
            tracing::debug!(key = %key, path = %path.display(), "committed append");
            return result;
        }

        if is_directory(&canonical) {
            drop(book);
            self.abandon(&path);
            let error = io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a directory of nested keys occupies this key",
            );
            return Err(CacheError::io(&canonical, "install entry", error));
        }

        if let Err(e) = self.write_stamp(&mut book, &canonical, timestamp) {
            book.persist();
            drop(book);
            self.abandon(&path);
            return Err(e);
        }

        let active = self.install(&mut book, &canonical, path);
        book.persist();
        tracing::debug!(key = %key, path = %active.display(), "committed entry");
        Ok(())
    }

    /// Delete a temporary file that will never be installed
    fn abandon(&self, temporary: &Path) {
        if !self.delete_physical(temporary) {
            let mut book = self.book.lock();
            book.mark_pending(temporary.to_path_buf());
            book.persist();
        }
    }

    /// Move a finished temporary file into the canonical slot.
    ///
    /// Returns the file that now holds the content: the canonical path, or
    /// the temporary file itself when it had to become the alternate.
    fn install(&self, book: &mut Bookkeeping, canonical: &Path, temporary: PathBuf) -> PathBuf {
        // pre-clean: the previous alternate is superseded either way
        if let Some(previous) = book.take_alternate(canonical) {
            if !self.delete_physical(&previous) {
                book.mark_pending(previous);
            }
        }
        book.clear_failed(canonical);

        if super::cleanup::physically_exists(canonical) {
            if let Err(e) = self.file_ops.remove_file(canonical) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %canonical.display(),
                        alternate = %temporary.display(),
                        error = %e,
                        "cannot remove previous content, redirecting to alternate"
                    );
                    book.set_alternate(canonical.to_path_buf(), temporary.clone());
                    return temporary;
                }
            }
        }

        match self.file_ops.rename(&temporary, canonical) {
            Ok(()) => canonical.to_path_buf(),
            Err(e) => {
                tracing::warn!(
                    path = %canonical.display(),
                    alternate = %temporary.display(),
                    error = %e,
                    "rename into place failed, redirecting to alternate"
                );
                book.set_alternate(canonical.to_path_buf(), temporary.clone());
                temporary
            }
        }
    }
}

fn is_directory(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

fn finish(writer: BufWriter<File>) -> io::Result<()> {
    let mut writer = writer;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}
