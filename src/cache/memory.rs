use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use super::{CacheEntry, CacheStats, ResponseCache};
use crate::types::Result;

/// In-memory cache bounded by entry count, least recently used evicted first.
///
/// `LruCache::get` reorders entries, so even reads take the mutex. The lock
/// is held only for the map operation itself.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl MemoryCache {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let lookup = entries
            .get(key)
            .map(|entry| entry.is_valid_at(now).then(|| entry.value.clone()));
        let valid = match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.pop(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        };
        drop(entries);

        match valid {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put(&self, key: &str, value: serde_json::Value, ttl_seconds: u64) -> Result<()> {
        let entry = CacheEntry::new(key, value, ttl_seconds);
        let displaced = self.entries.lock().push(key.to_string(), entry);
        if let Some((old_key, _)) = displaced {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(evicted = %old_key, "Memory cache at capacity");
            }
        }
        Ok(())
    }

    fn invalidate(&self, key: &str) -> Result<()> {
        self.entries.lock().pop(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    fn is_enabled(&self) -> bool {
        true
    }
}
