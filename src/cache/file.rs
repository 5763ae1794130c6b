use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{CacheEntry, CacheStats, ResponseCache};
use crate::types::{AppError, Result};

/// Directory-backed cache: one JSON-encoded [`CacheEntry`] per key.
///
/// Survives restarts, which makes repeated research runs on the same topic
/// cheap. Reads are plain blocking file operations on small files.
pub struct FileCache {
    dir: PathBuf,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl FileCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| AppError::Cache(format!("Cannot create {}: {}", dir.display(), e)))?;
        info!(path = ?dir, "Opened file cache");
        Ok(Self {
            dir,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        // Keys produced by `cache_key` are hex; anything else is flattened.
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    fn read_entry(&self, path: &Path) -> Option<CacheEntry> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read cache entry");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = ?path, error = %e, "Removing corrupt cache entry");
                let _ = fs::remove_file(path);
                None
            }
        }
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for item in fs::read_dir(&self.dir)? {
            let path = item?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl ResponseCache for FileCache {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let path = self.entry_path(key);
        let value = match self.read_entry(&path) {
            Some(entry) if entry.key == key && entry.is_valid_at(Utc::now()) => Some(entry.value),
            Some(_) => {
                let _ = fs::remove_file(&path);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Evicted expired cache entry");
                None
            }
            None => None,
        };
        match value {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(v)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put(&self, key: &str, value: serde_json::Value, ttl_seconds: u64) -> Result<()> {
        let entry = CacheEntry::new(key, value, ttl_seconds);
        let path = self.entry_path(key);
        // Each writer gets its own temp file; the rename is atomic.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&serde_json::to_vec(&entry)?)?;
        tmp.persist(&path)
            .map_err(|e| AppError::Cache(format!("Cannot store {}: {}", path.display(), e.error)))?;
        Ok(())
    }

    fn invalidate(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<()> {
        for path in self.entry_files()? {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entry_files().map(|f| f.len()).unwrap_or(0),
            evictions: 0,
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    fn is_enabled(&self) -> bool {
        true
    }
}
