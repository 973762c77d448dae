//! The cache facade
//!
//! [`CacheService`] owns one backend behind a read/write lock. Reads share the
//! lock; every mutation holds it exclusively for its whole duration, physical
//! I/O included, so no reader can observe an entry half way through a commit.

use crate::backend::Backend;
use crate::cancel::CancellationToken;
use crate::config::CacheConfig;
use crate::disk::DiskBackend;
use crate::errors::{CacheError, Result};
use crate::handle::{now_millis, ContentBackend, ContentReader, TemporaryContentHandle, Timestamp};
use crate::keys::CacheKey;
use crate::memory::MemoryBackend;
use crate::reclaim::{ReclaimReport, Reclaimer};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Thread-safe handle to a content cache. Clones share the same backend.
pub struct CacheService<B: ContentBackend = Backend> {
    backend: Arc<RwLock<B>>,
    reclaimer: Option<Arc<Reclaimer>>,
}

impl<B: ContentBackend> Clone for CacheService<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            reclaimer: self.reclaimer.clone(),
        }
    }
}

impl<B: ContentBackend> std::fmt::Debug for CacheService<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend.read_recursive().name())
            .field("reclaimer", &self.reclaimer.is_some())
            .finish()
    }
}

impl CacheService<Backend> {
    /// Open the backend described by `config`, starting the background
    /// reclaimer when an interval is configured
    pub fn open(config: &CacheConfig) -> Result<Self> {
        let backend = Backend::from_config(config)?;
        tracing::info!(
            backend = %config.backend,
            root = %config.root.display(),
            "opened content cache"
        );
        let service = Self::new(backend);
        match config.reclaim_interval {
            Some(interval) => service.with_reclaimer(interval),
            None => Ok(service),
        }
    }
}

impl CacheService<DiskBackend> {
    /// Disk cache under `root` with default settings
    pub fn disk(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(DiskBackend::open(root)?))
    }
}

impl CacheService<MemoryBackend> {
    pub fn memory() -> Self {
        Self::new(MemoryBackend::new())
    }
}

impl<B: ContentBackend + 'static> CacheService<B> {
    /// Run a reclamation pass every `interval` on a background thread for as
    /// long as any clone of this service is alive
    pub fn with_reclaimer(mut self, interval: Duration) -> Result<Self> {
        let reclaimer = match Reclaimer::spawn(Arc::downgrade(&self.backend), interval) {
            Ok(reclaimer) => reclaimer,
            Err(e) => return Err(CacheError::io("pathcache-reclaim", "spawn reclaimer", e)),
        };
        self.reclaimer = Some(Arc::new(reclaimer));
        Ok(self)
    }
}

impl<B: ContentBackend> CacheService<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(RwLock::new(backend)),
            reclaimer: None,
        }
    }

    /// Write `source` as the content of `key` and commit it with the current
    /// wall-clock time. Use [`set_content_timestamp`](Self::set_content_timestamp)
    /// to record a different modification time afterwards.
    pub fn add_content<R: Read>(
        &self,
        key: &str,
        source: R,
        append: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.write_content(key, source, append, now_millis(), cancel)
    }

    /// Write `source` as the content of `key` and commit it with `timestamp`
    pub fn add_content_with_timestamp<R: Read>(
        &self,
        key: &str,
        source: R,
        append: bool,
        timestamp: Timestamp,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.write_content(key, source, append, timestamp, cancel)
    }

    fn write_content<R: Read>(
        &self,
        key: &str,
        mut source: R,
        append: bool,
        timestamp: Timestamp,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = CacheKey::parse(key)?;
        let mut backend = self.write_unless_cancelled(&key, cancel)?;

        let mut handle = backend.open_temporary(&key, append)?;
        let copied = io::copy(&mut source, &mut handle).and_then(|n| handle.flush().map(|()| n));
        match copied {
            Ok(bytes) => {
                backend.commit(handle, timestamp)?;
                tracing::debug!(key = %key, bytes, append, "added content");
                Ok(())
            }
            Err(e) => {
                backend.discard(handle);
                Err(CacheError::io(key.to_relative_path(), "stream content", e))
            }
        }
    }

    /// Take the write lock unless `cancel` fires before or while waiting for it
    fn write_unless_cancelled(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> Result<RwLockWriteGuard<'_, B>> {
        if cancel.is_cancelled() {
            return Err(CacheError::cancelled(key.as_str()));
        }
        let guard = self.backend.write();
        // the token may have flipped while waiting for the lock
        if cancel.is_cancelled() {
            return Err(CacheError::cancelled(key.as_str()));
        }
        Ok(guard)
    }

    /// Open the visible content of `key`, or `None` when there is none
    pub fn get_content(&self, key: &str) -> Result<Option<ContentReader>> {
        let key = CacheKey::parse(key)?;
        let backend = self.backend.read_recursive();
        match backend.cached(&key)? {
            Some(cached) => cached.open().map(Some),
            None => Ok(None),
        }
    }

    pub fn has_content(&self, key: &str) -> Result<bool> {
        let key = CacheKey::parse(key)?;
        self.backend.read_recursive().exists(&key)
    }

    /// Modification time in milliseconds, `None` when `key` has no content
    pub fn get_content_timestamp(&self, key: &str) -> Result<Option<Timestamp>> {
        let key = CacheKey::parse(key)?;
        self.backend.read_recursive().timestamp(&key)
    }

    /// Record a modification time for existing content. Absent keys are
    /// left alone.
    pub fn set_content_timestamp(&self, key: &str, timestamp: Timestamp) -> Result<()> {
        let key = CacheKey::parse(key)?;
        self.backend.write().set_timestamp(&key, timestamp)?;
        Ok(())
    }

    /// Remove the content of `key`; removing absent content succeeds
    pub fn remove_content(&self, key: &str) -> Result<()> {
        let key = CacheKey::parse(key)?;
        self.backend.write().remove(&key)?;
        tracing::debug!(key = %key, "removed content");
        Ok(())
    }

    /// Remove `prefix` and everything nested below it
    pub fn remove_content_recursive(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let prefix = CacheKey::parse(prefix)?;
        self.write_unless_cancelled(&prefix, cancel)?.remove_recursive(&prefix)?;
        tracing::debug!(prefix = %prefix, "removed content recursively");
        Ok(())
    }

    /// Retry every deferred deletion now instead of waiting for the paths to
    /// be touched again
    pub fn reclaim(&self) -> ReclaimReport {
        self.backend.write().reclaim()
    }

    /// Open a streaming writer for `key`.
    ///
    /// The writer holds the write lock until it is closed or dropped, so the
    /// calling thread must not start another mutation on this cache while it
    /// is alive; that deadlocks. On [`ContentWriter::close`] the content is
    /// committed and `on_commit` receives a reader over the bytes this writer
    /// persisted (the whole content, or only the appended tail), the commit
    /// timestamp and the append flag. Read operations may be called from
    /// inside `on_commit`. A cancelled `cancel` fails the call before any
    /// temporary entry is opened.
    pub fn wrap_output_stream<F>(
        &self,
        key: &str,
        append: bool,
        cancel: &CancellationToken,
        on_commit: F,
    ) -> Result<ContentWriter<'_, B, F>>
    where
        F: FnOnce(&mut ContentReader, Timestamp, bool) -> io::Result<()>,
    {
        let key = CacheKey::parse(key)?;
        let mut guard = self.write_unless_cancelled(&key, cancel)?;
        let handle = guard.open_temporary(&key, append)?;
        Ok(ContentWriter {
            guard: Some(guard),
            handle: Some(handle),
            on_commit: Some(on_commit),
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.read_recursive().name()
    }

    /// Run `f` against the backend while holding the read lock
    pub fn with_backend<T>(&self, f: impl FnOnce(&B) -> T) -> T {
        let backend = self.backend.read_recursive();
        f(&*backend)
    }
}

/// Streaming writer returned by [`CacheService::wrap_output_stream`]
pub struct ContentWriter<'a, B, F>
where
    B: ContentBackend,
    F: FnOnce(&mut ContentReader, Timestamp, bool) -> io::Result<()>,
{
    guard: Option<RwLockWriteGuard<'a, B>>,
    handle: Option<TemporaryContentHandle<B::Sink>>,
    on_commit: Option<F>,
}

impl<B, F> ContentWriter<'_, B, F>
where
    B: ContentBackend,
    F: FnOnce(&mut ContentReader, Timestamp, bool) -> io::Result<()>,
{
    pub fn key(&self) -> Option<&CacheKey> {
        self.handle.as_ref().map(|handle| handle.key())
    }

    /// Commit the written bytes and run the commit callback
    pub fn close(mut self) -> Result<()> {
        let (Some(mut guard), Some(handle)) = (self.guard.take(), self.handle.take()) else {
            return Ok(());
        };

        let key = handle.key().clone();
        let append = handle.is_append();
        let position = handle.append_position().unwrap_or(0);
        let timestamp = now_millis();

        guard.commit(handle, timestamp)?;

        // readers may proceed, and the callback may read through the cache
        let guard = RwLockWriteGuard::downgrade(guard);

        let Some(on_commit) = self.on_commit.take() else {
            return Ok(());
        };

        let cached = match guard.cached(&key)? {
            Some(cached) => cached,
            None => {
                return Err(CacheError::io(
                    key.to_relative_path(),
                    "reopen committed content",
                    io::Error::new(io::ErrorKind::NotFound, "committed content vanished"),
                ))
            }
        };

        let mut reader = cached.open()?;
        let result = reader
            .seek(SeekFrom::Start(position))
            .and_then(|_| on_commit(&mut reader, timestamp, append));
        drop(guard);

        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(CacheError::io(key.to_relative_path(), "commit callback", e)),
        }
    }
}

impl<B, F> Write for ContentWriter<'_, B, F>
where
    B: ContentBackend,
    F: FnOnce(&mut ContentReader, Timestamp, bool) -> io::Result<()>,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.handle.as_mut() {
            Some(handle) => handle.write(buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer is closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.handle.as_mut() {
            Some(handle) => handle.flush(),
            None => Ok(()),
        }
    }
}

impl<B, F> Drop for ContentWriter<'_, B, F>
where
    B: ContentBackend,
    F: FnOnce(&mut ContentReader, Timestamp, bool) -> io::Result<()>,
{
    fn drop(&mut self) {
        if let (Some(mut guard), Some(handle)) = (self.guard.take(), self.handle.take()) {
            tracing::debug!(key = %handle.key(), "writer dropped without close, discarding");
            guard.discard(handle);
        }
    }
}
