//! Response cache shared by the search and scraping layers.
//!
//! Search results and scraped pages are stored as JSON values under keys
//! derived from the operation name and its normalized parameters, so the
//! same request made twice within the TTL is answered locally.
//!
//! # Cache Key Strategy
//!
//! Keys are SHA-256 hashes of `operation | canonical-json(params)`.
//! `serde_json` objects are ordered maps, so two parameter objects with the
//! same fields always serialize identically regardless of construction order.
//!
//! # Expiry
//!
//! An entry is valid while `now - created_at < ttl_seconds`. Expired entries
//! read as absent and are removed at read time; there is no background
//! sweeper. A TTL of zero stores an entry that is never readable.
//!
//! # Example
//!
//! ```ignore
//! use fathom::cache::{cache_key, MemoryCache, ResponseCache};
//! use serde_json::json;
//!
//! let cache = MemoryCache::new(1024);
//! let key = cache_key("search", &json!({"engine": "google", "query": "rust"}));
//! if cache.get(&key).is_none() {
//!     cache.put(&key, json!(["https://www.rust-lang.org"]), 3600)?;
//! }
//! ```

mod file;
mod memory;

pub use file::FileCache;
pub use memory::MemoryCache;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::types::Result;
use crate::utils::config::{CacheBackend, CacheSettings};

// ============================================================================
// Cache Types
// ============================================================================

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses (including expired entries)
    pub misses: u64,
    /// Number of entries currently stored
    pub entry_count: usize,
    /// Number of entries evicted due to capacity
    pub evictions: u64,
    /// Number of entries dropped because their TTL had elapsed
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// A stored value with its expiry metadata. This is also the on-disk format
/// of [`FileCache`] entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    pub fn new(key: &str, value: serde_json::Value, ttl_seconds: u64) -> Self {
        Self {
            key: key.to_string(),
            value,
            created_at: Utc::now(),
            ttl_seconds,
        }
    }

    /// `now - created_at < ttl_seconds`, at millisecond resolution.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.created_at).num_milliseconds();
        let ttl_ms = i64::try_from(self.ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        age_ms < ttl_ms
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

// ============================================================================
// Cache Trait
// ============================================================================

/// Key/value store for JSON payloads with per-entry TTL.
///
/// Implementations must be safe to share across concurrent tasks; none of
/// the methods suspend.
pub trait ResponseCache: Send + Sync {
    /// Get a value if present and not expired
    fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Store a value for `ttl_seconds`
    fn put(&self, key: &str, value: serde_json::Value, ttl_seconds: u64) -> Result<()>;

    /// Remove an entry from the cache
    fn invalidate(&self, key: &str) -> Result<()>;

    /// Clear all entries from the cache
    fn clear(&self) -> Result<()>;

    /// Get cache statistics
    fn stats(&self) -> CacheStats;

    /// Check if the cache is enabled
    fn is_enabled(&self) -> bool;
}

/// Derive a cache key from an operation name and its parameters.
pub fn cache_key(operation: &str, params: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b"|");
    hasher.update(params.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Read and deserialize a cached value. Undecodable entries count as misses.
pub fn get_typed<T: DeserializeOwned>(cache: &dyn ResponseCache, key: &str) -> Option<T> {
    let value = cache.get(key)?;
    match serde_json::from_value(value) {
        Ok(typed) => Some(typed),
        Err(e) => {
            warn!(key, error = %e, "Discarding undecodable cache entry");
            let _ = cache.invalidate(key);
            None
        }
    }
}

/// Serialize and store a value.
pub fn put_typed<T: Serialize>(
    cache: &dyn ResponseCache,
    key: &str,
    value: &T,
    ttl_seconds: u64,
) -> Result<()> {
    cache.put(key, serde_json::to_value(value)?, ttl_seconds)
}

/// Build the cache selected by configuration.
pub fn from_settings(settings: &CacheSettings) -> Result<Arc<dyn ResponseCache>> {
    if !settings.enabled {
        return Ok(Arc::new(NoOpCache));
    }
    Ok(match settings.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new(settings.capacity)),
        CacheBackend::File => Arc::new(FileCache::open(PathBuf::from(&settings.dir))?),
    })
}

// ============================================================================
// No-Op Cache
// ============================================================================

/// A cache that stores nothing. Consumers behave identically, only slower.
#[derive(Debug, Default)]
pub struct NoOpCache;

impl ResponseCache for NoOpCache {
    fn get(&self, _key: &str) -> Option<serde_json::Value> {
        None
    }

    fn put(&self, _key: &str, _value: serde_json::Value, _ttl_seconds: u64) -> Result<()> {
        Ok(())
    }

    fn invalidate(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_cache_key_is_order_independent() {
        let a = cache_key("search", &json!({"query": "rust", "engine": "google"}));
        let b = cache_key("search", &json!({"engine": "google", "query": "rust"}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_cache_key_distinguishes_operation() {
        let params = json!({"url": "https://example.com"});
        assert_ne!(cache_key("scrape", &params), cache_key("search", &params));
    }

    #[test]
    fn test_entry_validity_window() {
        let mut entry = CacheEntry::new("k", json!(1), 10);
        let created = entry.created_at;
        assert!(entry.is_valid_at(created + Duration::seconds(9)));
        assert!(!entry.is_valid_at(created + Duration::seconds(10)));

        entry.ttl_seconds = 0;
        assert!(!entry.is_valid_at(created));
    }

    #[test]
    fn test_noop_cache() {
        let cache = NoOpCache;
        cache.put("k", json!("v"), 60).unwrap();
        assert!(cache.get("k").is_none());
        assert!(!cache.is_enabled());
    }

    #[test]
    fn test_typed_helpers_discard_bad_payloads() {
        let cache = MemoryCache::new(8);
        put_typed(&cache, "n", &vec![1u32, 2, 3], 60).unwrap();
        assert_eq!(get_typed::<Vec<u32>>(&cache, "n"), Some(vec![1, 2, 3]));

        cache.put("bad", json!({"not": "a list"}), 60).unwrap();
        assert_eq!(get_typed::<Vec<u32>>(&cache, "bad"), None);
        assert!(cache.get("bad").is_none());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
