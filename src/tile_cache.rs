//! LRU cache of decoded raster chunks, bounded by decoded size in bytes.
//!
//! One cache is shared by every open source. Entries are keyed by source
//! identifier, pyramid level and chunk index, so re-opening a source per
//! request still hits chunks decoded by earlier requests.

use lru::LruCache;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cog_reader::DecodedChunk;

#[derive(Clone, Eq, PartialEq)]
struct ChunkKey {
    source: Arc<str>,
    level: u32,
    index: u32,
}

impl Hash for ChunkKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.level.hash(state);
        self.index.hash(state);
    }
}

struct CacheEntry {
    chunk: Arc<DecodedChunk>,
    size_bytes: usize,
}

struct Inner {
    current_bytes: usize,
    capacity_bytes: usize,
    entries: LruCache<ChunkKey, CacheEntry>,
}

impl Inner {
    fn insert(&mut self, key: ChunkKey, chunk: Arc<DecodedChunk>, size_bytes: usize) {
        if size_bytes > self.capacity_bytes {
            return;
        }

        if let Some(old) = self.entries.pop(&key) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes);
        }

        while self.current_bytes + size_bytes > self.capacity_bytes {
            if let Some((_key, entry)) = self.entries.pop_lru() {
                self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
            } else {
                break;
            }
        }

        self.current_bytes = self.current_bytes.saturating_add(size_bytes);
        self.entries.put(key, CacheEntry { chunk, size_bytes });
    }
}

/// Shared, thread-safe chunk cache.
pub struct ChunkCache {
    inner: Mutex<Inner>,
}

impl ChunkCache {
    #[must_use]
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current_bytes: 0,
                capacity_bytes,
                entries: LruCache::unbounded(),
            }),
        }
    }

    fn key(source: &str, level: usize, index: usize) -> ChunkKey {
        ChunkKey {
            source: Arc::from(source),
            level: level as u32,
            index: index as u32,
        }
    }

    #[must_use]
    pub fn get(&self, source: &str, level: usize, index: usize) -> Option<Arc<DecodedChunk>> {
        let key = Self::key(source, level, index);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get(&key).map(|entry| Arc::clone(&entry.chunk))
    }

    pub fn insert(&self, source: &str, level: usize, index: usize, chunk: Arc<DecodedChunk>) {
        let size_bytes = chunk.data.len() * std::mem::size_of::<f32>();
        let key = Self::key(source, level, index);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.insert(key, chunk, size_bytes);
    }

    /// Decoded bytes currently held.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).current_bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
