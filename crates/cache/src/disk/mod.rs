//! Disk-backed content storage
//!
//! Keys map 1:1 onto files under a cache root. Replacing writes land in a
//! uniquely named temporary sibling (`<name>.<id>.$$$`) and are committed by
//! deleting the previous file and renaming the temporary file into place.
//!
//! When the previous file cannot be deleted (for example because another
//! process still holds it open) the commit does not fail: the temporary file
//! becomes the entry's *alternate* and every read is redirected to it until a
//! later commit, removal or reclamation pass can reclaim the canonical path.
//! Deletions that fail are remembered and retried whenever the same path is
//! touched again. All of that bookkeeping is persisted under the root so a
//! restarted process resumes the retries.
//!
//! Entry timestamps are kept in a separate record per entry rather than in
//! the file's modification time, which other tools may change.

mod atomic;
mod bookkeeping;
mod cleanup;
mod codec;
mod commit;
mod fs_ops;
mod layout;
mod stamps;

pub use fs_ops::{FileOps, StdFileOps};

use crate::errors::{CacheError, Result};
use crate::handle::{
    CachedContentHandle, ContentBackend, ContentSource, TemporaryContentHandle, Timestamp,
};
use crate::keys::CacheKey;
use crate::reclaim::ReclaimReport;
use bookkeeping::Bookkeeping;
use layout::Layout;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default capacity of the buffered write sinks
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

const MAX_TEMPORARY_ATTEMPTS: usize = 16;

/// Write sink of the disk backend
#[derive(Debug)]
pub struct DiskSink {
    writer: BufWriter<File>,
    path: PathBuf,
    in_place: bool,
}

impl DiskSink {
    /// The physical file receiving the bytes
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when bytes are appended directly to the active file
    pub fn is_in_place(&self) -> bool {
        self.in_place
    }
}

impl Write for DiskSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Builder for [`DiskBackend`]
#[derive(Debug)]
pub struct DiskBackendBuilder {
    root: PathBuf,
    buffer_size: usize,
    file_ops: Arc<dyn FileOps>,
}

impl DiskBackendBuilder {
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Route deletions and renames through a custom [`FileOps`]
    pub fn file_ops(mut self, file_ops: Arc<dyn FileOps>) -> Self {
        self.file_ops = file_ops;
        self
    }

    /// Create the cache root if needed and restore persisted bookkeeping
    pub fn open(self) -> Result<DiskBackend> {
        let root = if self.root.is_absolute() {
            self.root
        } else {
            match std::env::current_dir() {
                Ok(cwd) => cwd.join(self.root),
                Err(e) => return Err(CacheError::io(&self.root, "resolve cache root", e)),
            }
        };

        match fs::create_dir_all(&root) {
            Ok(()) => {}
            Err(e) => return Err(CacheError::io(&root, "create cache root", e)),
        }

        let layout = Layout::new(root);
        let book = Bookkeeping::load(&layout);

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();

        tracing::debug!(root = %layout.root().display(), "opened disk cache");

        Ok(DiskBackend {
            layout,
            file_ops: self.file_ops,
            buffer_size: self.buffer_size,
            book: Mutex::new(book),
            next_temporary_id: AtomicU64::new(seed),
        })
    }
}

/// Backend storing entries as files under a cache root
#[derive(Debug)]
pub struct DiskBackend {
    layout: Layout,
    file_ops: Arc<dyn FileOps>,
    buffer_size: usize,
    /// Locked separately because read-side existence checks retry deletions
    book: Mutex<Bookkeeping>,
    next_temporary_id: AtomicU64,
}

impl DiskBackend {
    pub fn builder(root: impl Into<PathBuf>) -> DiskBackendBuilder {
        DiskBackendBuilder {
            root: root.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            file_ops: Arc::new(StdFileOps),
        }
    }

    /// Open a backend with default settings
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(root).open()
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Canonical physical path of a key
    pub fn canonical_path(&self, key: &CacheKey) -> PathBuf {
        self.layout.canonical_path(key)
    }

    /// The physical file currently holding a key's content, following any
    /// alternate indirection
    pub fn active_path(&self, key: &CacheKey) -> PathBuf {
        self.book.lock().active_path(&self.canonical_path(key))
    }

    /// Number of deferred cleanups still owed (failed deletions, alternates
    /// and pending alternate deletions)
    pub fn outstanding_cleanups(&self) -> usize {
        self.book.lock().outstanding()
    }

    fn create_temporary_file(&self, canonical: &Path) -> Result<(PathBuf, File)> {
        let mut last_error = None;

        for _ in 0..MAX_TEMPORARY_ATTEMPTS {
            let id = self.next_temporary_id.fetch_add(1, Ordering::Relaxed);
            let path = self.layout.temporary_path(canonical, id);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_error = Some(e),
                Err(e) => return Err(CacheError::io(&path, "create temporary file", e)),
            }
        }

        let error = last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::AlreadyExists, "no free name"));
        Err(CacheError::io(canonical, "allocate temporary file name", error))
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) => match fs::create_dir_all(parent) {
            Ok(()) => Ok(()),
            Err(e) => Err(CacheError::io(parent, "create cache directory", e)),
        },
        None => Ok(()),
    }
}

impl ContentBackend for DiskBackend {
    type Sink = DiskSink;

    fn name(&self) -> &'static str {
        "disk"
    }

    fn exists(&self, key: &CacheKey) -> Result<bool> {
        let canonical = self.canonical_path(key);
        let mut book = self.book.lock();
        let active = book.active_path(&canonical);
        let exists = self.check_file_exists(&mut book, &active);
        book.persist();
        Ok(exists)
    }

    fn cached(&self, key: &CacheKey) -> Result<Option<CachedContentHandle>> {
        let canonical = self.canonical_path(key);
        let mut book = self.book.lock();
        let active = book.active_path(&canonical);
        let exists = self.check_file_exists(&mut book, &active);
        book.persist();
        drop(book);

        if !exists {
            return Ok(None);
        }

        let meta = match fs::metadata(&active) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&active, "stat cached content", e)),
        };

        Ok(Some(CachedContentHandle::new(
            key.clone(),
            meta.len(),
            self.read_stamp(&canonical),
            ContentSource::File(active),
        )))
    }

    fn timestamp(&self, key: &CacheKey) -> Result<Option<Timestamp>> {
        let canonical = self.canonical_path(key);
        let mut book = self.book.lock();
        let active = book.active_path(&canonical);
        let exists = self.check_file_exists(&mut book, &active);
        book.persist();
        drop(book);

        Ok(if exists {
            self.read_stamp(&canonical)
        } else {
            None
        })
    }

    fn set_timestamp(&mut self, key: &CacheKey, timestamp: Timestamp) -> Result<bool> {
        let canonical = self.canonical_path(key);
        let mut book = self.book.lock();
        let active = book.active_path(&canonical);
        let exists = self.check_file_exists(&mut book, &active);
        let result = if exists {
            self.write_stamp(&mut book, &canonical, timestamp).map(|()| true)
        } else {
            tracing::debug!(key = %key, "no entry to stamp");
            Ok(false)
        };
        book.persist();
        result
    }

    fn open_temporary(
        &mut self,
        key: &CacheKey,
        append: bool,
    ) -> Result<TemporaryContentHandle<DiskSink>> {
        let canonical = self.canonical_path(key);
        ensure_parent(&canonical)?;

        if append {
            let mut book = self.book.lock();
            let active = book.active_path(&canonical);
            let exists = self.check_file_exists(&mut book, &active);
            book.persist();
            drop(book);

            if exists {
                let file = match OpenOptions::new().append(true).open(&active) {
                    Ok(file) => file,
                    Err(e) => return Err(CacheError::io(&active, "open entry for append", e)),
                };
                let position = match file.metadata() {
                    Ok(meta) => meta.len(),
                    Err(e) => return Err(CacheError::io(&active, "stat entry for append", e)),
                };
                tracing::debug!(key = %key, position, "appending in place");
                let sink = DiskSink {
                    writer: BufWriter::with_capacity(self.buffer_size, file),
                    path: active,
                    in_place: true,
                };
                return Ok(TemporaryContentHandle::new(
                    key.clone(),
                    true,
                    Some(position),
                    sink,
                ));
            }
        }

        let (path, file) = self.create_temporary_file(&canonical)?;
        tracing::debug!(key = %key, temp = %path.display(), "opened temporary entry");
        let sink = DiskSink {
            writer: BufWriter::with_capacity(self.buffer_size, file),
            path,
            in_place: false,
        };
        Ok(TemporaryContentHandle::new(
            key.clone(),
            append,
            append.then_some(0),
            sink,
        ))
    }

    fn commit(
        &mut self,
        handle: TemporaryContentHandle<DiskSink>,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.commit_entry(handle, timestamp)
    }

    fn discard(&mut self, handle: TemporaryContentHandle<DiskSink>) {
        let (key, _, _, sink) = handle.into_parts();
        let DiskSink {
            writer,
            path,
            in_place,
        } = sink;
        drop(writer);

        if in_place {
            // appended bytes cannot be rolled back
            tracing::debug!(key = %key, "abandoned in-place append");
            return;
        }
        if !self.delete_physical(&path) {
            let mut book = self.book.lock();
            book.mark_pending(path);
            book.persist();
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Result<()> {
        let canonical = self.canonical_path(key);
        let mut book = self.book.lock();
        if self.try_delete(&mut book, &canonical) {
            self.retry_pending_alternates(&mut book);
            if let Some(parent) = canonical.parent() {
                self.compact_ancestors(parent);
            }
        }
        book.persist();
        Ok(())
    }

    fn remove_recursive(&mut self, prefix: &CacheKey) -> Result<()> {
        let target = self.canonical_path(prefix);
        let mut book = self.book.lock();
        let result = self.delete_tree(&mut book, &target);
        book.persist();
        result
    }

    fn reclaim(&mut self) -> ReclaimReport {
        let mut book = self.book.lock();
        let report = self.reclaim_all(&mut book);
        book.persist();
        report
    }
}
