//! In-process backend
//!
//! Entries live in a map owned by the backend instance. Commits are a plain
//! replace-or-append of the buffer, deletions never fail, and nothing
//! survives the process.

use crate::errors::Result;
use crate::handle::{
    CachedContentHandle, ContentBackend, ContentSource, TemporaryContentHandle, Timestamp,
};
use crate::keys::CacheKey;
use crate::reclaim::ReclaimReport;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::{self, Write};

#[derive(Debug, Clone)]
struct MemoryEntry {
    data: Bytes,
    timestamp: Timestamp,
}

/// Write sink of the memory backend
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: Vec<u8>,
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Backend keeping every entry in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: HashMap<CacheKey, MemoryEntry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ContentBackend for MemoryBackend {
    type Sink = MemorySink;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn exists(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn cached(&self, key: &CacheKey) -> Result<Option<CachedContentHandle>> {
        Ok(self.entries.get(key).map(|entry| {
            CachedContentHandle::new(
                key.clone(),
                entry.data.len() as u64,
                Some(entry.timestamp),
                ContentSource::Memory(entry.data.clone()),
            )
        }))
    }

    fn set_timestamp(&mut self, key: &CacheKey, timestamp: Timestamp) -> Result<bool> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.timestamp = timestamp;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn open_temporary(
        &mut self,
        key: &CacheKey,
        append: bool,
    ) -> Result<TemporaryContentHandle<MemorySink>> {
        let position = if append {
            Some(self.entries.get(key).map_or(0, |e| e.data.len() as u64))
        } else {
            None
        };
        Ok(TemporaryContentHandle::new(
            key.clone(),
            append,
            position,
            MemorySink::default(),
        ))
    }

    fn commit(
        &mut self,
        handle: TemporaryContentHandle<MemorySink>,
        timestamp: Timestamp,
    ) -> Result<()> {
        let (key, append, _, sink) = handle.into_parts();

        let data = match (append, self.entries.get(&key)) {
            (true, Some(existing)) => {
                let mut joined = Vec::with_capacity(existing.data.len() + sink.buffer.len());
                joined.extend_from_slice(&existing.data);
                joined.extend_from_slice(&sink.buffer);
                Bytes::from(joined)
            }
            _ => Bytes::from(sink.buffer),
        };

        tracing::debug!(key = %key, len = data.len(), append, "committed memory entry");
        self.entries.insert(key, MemoryEntry { data, timestamp });
        Ok(())
    }

    fn discard(&mut self, handle: TemporaryContentHandle<MemorySink>) {
        tracing::debug!(key = %handle.key(), "discarded memory write");
    }

    fn remove(&mut self, key: &CacheKey) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn remove_recursive(&mut self, prefix: &CacheKey) -> Result<()> {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| !key.is_same_or_descendant_of(prefix));
        tracing::debug!(prefix = %prefix, removed = before - self.entries.len(), "removed memory subtree");
        Ok(())
    }

    fn reclaim(&mut self) -> ReclaimReport {
        ReclaimReport::default()
    }
}
