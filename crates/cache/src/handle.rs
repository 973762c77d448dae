//! Content handle abstractions shared by every backend
//!
//! A write goes through a [`TemporaryContentHandle`] that only becomes visible
//! once the backend commits it. Reads resolve a key to a
//! [`CachedContentHandle`] describing the currently visible entry, which is
//! opened into an owned [`ContentReader`].

use crate::errors::{CacheError, Result};
use crate::keys::CacheKey;
use crate::reclaim::ReclaimReport;
use bytes::Bytes;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Current wall-clock time as a [`Timestamp`]
pub fn now_millis() -> Timestamp {
    system_time_to_millis(SystemTime::now())
}

fn system_time_to_millis(time: SystemTime) -> Timestamp {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as Timestamp,
        Err(before) => -(before.duration().as_millis() as Timestamp),
    }
}

/// An in-progress write for a key, not yet visible to readers
#[derive(Debug)]
pub struct TemporaryContentHandle<S> {
    key: CacheKey,
    append: bool,
    append_position: Option<u64>,
    sink: S,
}

impl<S> TemporaryContentHandle<S> {
    pub(crate) fn new(key: CacheKey, append: bool, append_position: Option<u64>, sink: S) -> Self {
        Self {
            key,
            append,
            append_position,
            sink,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn is_append(&self) -> bool {
        self.append
    }

    /// Length of the pre-existing content when the handle was opened in
    /// append mode; `None` for a replacing write.
    pub fn append_position(&self) -> Option<u64> {
        self.append_position
    }

    pub(crate) fn into_parts(self) -> (CacheKey, bool, Option<u64>, S) {
        (self.key, self.append, self.append_position, self.sink)
    }

    pub(crate) fn map_sink<T>(self, f: impl FnOnce(S) -> T) -> TemporaryContentHandle<T> {
        TemporaryContentHandle {
            key: self.key,
            append: self.append,
            append_position: self.append_position,
            sink: f(self.sink),
        }
    }
}

impl<S: Write> Write for TemporaryContentHandle<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// Where the bytes of a visible entry live
#[derive(Debug, Clone)]
pub enum ContentSource {
    Memory(Bytes),
    File(PathBuf),
}

/// The currently visible content for a key
#[derive(Debug, Clone)]
pub struct CachedContentHandle {
    key: CacheKey,
    len: u64,
    timestamp: Option<Timestamp>,
    source: ContentSource,
}

impl CachedContentHandle {
    pub(crate) fn new(
        key: CacheKey,
        len: u64,
        timestamp: Option<Timestamp>,
        source: ContentSource,
    ) -> Self {
        Self {
            key,
            len,
            timestamp,
            source,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Recorded modification time; `None` when none was ever recorded
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    /// Open the content for reading
    pub fn open(&self) -> Result<ContentReader> {
        match &self.source {
            ContentSource::Memory(bytes) => Ok(ContentReader::Memory(Cursor::new(bytes.clone()))),
            ContentSource::File(path) => match File::open(path) {
                Ok(file) => Ok(ContentReader::File(BufReader::new(file))),
                Err(e) => Err(CacheError::io(path, "open cached content", e)),
            },
        }
    }
}

/// An owned stream over committed content
#[derive(Debug)]
pub enum ContentReader {
    Memory(Cursor<Bytes>),
    File(BufReader<File>),
}

impl ContentReader {
    /// Read the remainder of the stream into a vector
    pub fn into_vec(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Read for ContentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Memory(cursor) => cursor.read(buf),
            Self::File(reader) => reader.read(buf),
        }
    }
}

impl Seek for ContentReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Memory(cursor) => cursor.seek(pos),
            Self::File(reader) => reader.seek(pos),
        }
    }
}

/// The handle factory every storage backend implements.
///
/// Read-side methods take `&self` and mutations `&mut self`, so a facade that
/// owns the backend behind a read/write lock gets the locking discipline from
/// the borrow checker.
pub trait ContentBackend: Send + Sync {
    /// Write sink of this backend's temporary entries
    type Sink: Write + Send;

    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Logical existence of the entry for `key`
    fn exists(&self, key: &CacheKey) -> Result<bool>;

    /// Resolve the visible entry for `key`
    fn cached(&self, key: &CacheKey) -> Result<Option<CachedContentHandle>>;

    fn timestamp(&self, key: &CacheKey) -> Result<Option<Timestamp>> {
        Ok(self.cached(key)?.and_then(|handle| handle.timestamp()))
    }

    /// Returns `false` when there is no entry to stamp
    fn set_timestamp(&mut self, key: &CacheKey, timestamp: Timestamp) -> Result<bool>;

    /// Open a write target for `key`
    fn open_temporary(
        &mut self,
        key: &CacheKey,
        append: bool,
    ) -> Result<TemporaryContentHandle<Self::Sink>>;

    /// Make a temporary entry the visible content for its key
    fn commit(
        &mut self,
        handle: TemporaryContentHandle<Self::Sink>,
        timestamp: Timestamp,
    ) -> Result<()>;

    /// Abandon a temporary entry without touching the visible content
    fn discard(&mut self, handle: TemporaryContentHandle<Self::Sink>);

    /// Remove the entry for `key`; removing an absent key is not an error
    fn remove(&mut self, key: &CacheKey) -> Result<()>;

    /// Remove `prefix` and every key nested below it
    fn remove_recursive(&mut self, prefix: &CacheKey) -> Result<()>;

    /// Retry every deferred physical cleanup
    fn reclaim(&mut self) -> ReclaimReport;
}

/// Best-effort check used by backends that need to know whether a path is
/// a regular file without following the alternate indirection.
pub(crate) fn is_regular_file(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
