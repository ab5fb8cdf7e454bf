//! Cache manager: the public get/set/delete/clear/stats surface over the tiers.

use super::clock::{Clock, SystemClock};
use super::disk::DiskTier;
use super::entry::CacheEntry;
use super::memory::MemoryTier;
use crate::config::{CacheBackend, CacheConfig};
use crate::{Error, ErrorContext, Result};
use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::{de::DeserializeOwned, Serialize};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Point-in-time counters. Counters only grow; `clear_and_reset_stats` is the
/// one way back to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_requests: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    total_requests: AtomicU64,
}

impl AtomicStats {
    fn record_hit(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.total_requests.store(0, Ordering::Relaxed);
    }
}

/// Tiered response cache.
///
/// - memory tier: bounded, strict LRU, one `RwLock`
/// - disk tier: unbounded, one JSON record per key, one `RwLock`
///
/// A miss is `Ok(None)`, never an error. Errors come only from disk I/O,
/// (de)serialization, or an oversized value.
pub struct CacheManager {
    config: CacheConfig,
    memory: Option<MemoryTier>,
    disk: Option<Arc<DiskTier>>,
    stats: AtomicStats,
    clock: Arc<dyn Clock>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let memory = if config.backend.uses_memory() {
            let cap = NonZeroUsize::new(config.max_memory_items)
                .ok_or_else(|| Error::configuration("max_memory_items must be positive"))?;
            Some(MemoryTier::new(cap))
        } else {
            None
        };
        let disk = if config.backend.uses_disk() {
            Some(Arc::new(DiskTier::open(&config.disk_path)?))
        } else {
            None
        };
        Ok(Self {
            config,
            memory,
            disk,
            stats: AtomicStats::default(),
            clock,
        })
    }

    fn memory_only(capacity: NonZeroUsize) -> Self {
        Self {
            config: CacheConfig::default()
                .with_backend(CacheBackend::Memory)
                .with_max_memory_items(capacity.get()),
            memory: Some(MemoryTier::new(capacity)),
            disk: None,
            stats: AtomicStats::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> CacheBackend {
        self.config.backend
    }

    fn full_key(&self, key: &str) -> String {
        match self.config.key_prefix {
            Some(ref p) => format!("{}:{}", p, key),
            None => key.to_string(),
        }
    }

    fn lookup_memory(&self, key: &str) -> Option<Bytes> {
        let now = self.clock.now();
        self.memory.as_ref().and_then(|m| m.get(key, now))
    }

    /// Record the outcome of a disk lookup, promoting a hit into memory.
    fn finish_disk_lookup(&self, key: String, found: Option<CacheEntry>) -> Option<Bytes> {
        match found {
            Some(mut entry) => {
                self.stats.record_hit();
                let value = entry.value.clone();
                if let Some(memory) = &self.memory {
                    entry.touch(self.clock.now());
                    self.insert_memory(memory, key, entry);
                }
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    fn insert_memory(&self, memory: &MemoryTier, key: String, entry: CacheEntry) {
        if let Some((evicted, _)) = memory.insert(key, entry) {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %evicted, on_disk = self.disk.is_some(), "evicted least recently used entry");
        }
    }

    fn new_entry(&self, value: Bytes, ttl: Option<Duration>) -> Result<CacheEntry> {
        if value.len() > self.config.max_entry_size {
            return Err(Error::too_large_with_context(
                format!(
                    "value of {} bytes exceeds max_entry_size of {} bytes",
                    value.len(),
                    self.config.max_entry_size
                ),
                ErrorContext::new().with_operation("cache.set"),
            ));
        }
        Ok(CacheEntry::new(value, self.clock.now(), ttl))
    }

    /// Memory first, then disk. Counts one hit or one miss.
    pub fn get_bytes(&self, key: &str) -> Result<Option<Bytes>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let key = self.full_key(key);
        if let Some(v) = self.lookup_memory(&key) {
            self.stats.record_hit();
            return Ok(Some(v));
        }
        let found = match &self.disk {
            Some(disk) => disk.read(&key, self.clock.now())?,
            None => None,
        };
        Ok(self.finish_disk_lookup(key, found))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_bytes(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store raw bytes. `ttl = None` never expires.
    pub fn set_bytes(&self, key: &str, value: impl Into<Bytes>, ttl: Option<Duration>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let key = self.full_key(key);
        let entry = self.new_entry(value.into(), ttl)?;
        if let Some(disk) = &self.disk {
            disk.write(&key, &entry)?;
        }
        if let Some(memory) = &self.memory {
            self.insert_memory(memory, key, entry);
        }
        Ok(())
    }

    /// Store with the configured default TTL.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.config.default_ttl)
    }

    /// Store with an explicit TTL; `None` never expires.
    pub fn set_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        self.set_bytes(key, data, ttl)
    }

    /// Remove from both tiers. Returns whether anything was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let key = self.full_key(key);
        let in_memory = self.memory.as_ref().map(|m| m.remove(&key)).unwrap_or(false);
        let on_disk = match &self.disk {
            Some(disk) => disk.remove(&key)?,
            None => false,
        };
        Ok(in_memory || on_disk)
    }

    /// Existence probe that neither counts toward stats nor refreshes recency.
    pub fn exists(&self, key: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let key = self.full_key(key);
        let now = self.clock.now();
        self.memory
            .as_ref()
            .map(|m| m.contains_live(&key, now))
            .unwrap_or(false)
            || self
                .disk
                .as_ref()
                .map(|d| d.contains_live(&key, now))
                .unwrap_or(false)
    }

    /// Empty both tiers. Statistics are kept.
    pub fn clear(&self) -> Result<()> {
        if let Some(memory) = &self.memory {
            memory.clear();
        }
        if let Some(disk) = &self.disk {
            disk.clear()?;
        }
        Ok(())
    }

    pub fn clear_and_reset_stats(&self) -> Result<()> {
        self.clear()?;
        self.stats.reset();
        Ok(())
    }

    pub fn get_stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Drop expired entries from both tiers; returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = self.memory.as_ref().map(|m| m.purge_expired(now)).unwrap_or(0);
        if let Some(disk) = &self.disk {
            removed += disk.purge_expired(now)?;
        }
        Ok(removed)
    }

    pub fn memory_len(&self) -> usize {
        self.memory.as_ref().map(|m| m.len()).unwrap_or(0)
    }

    pub fn disk_len(&self) -> usize {
        self.disk.as_ref().map(|d| d.len()).unwrap_or(0)
    }

    /// Like [`CacheManager::get_bytes`], but disk reads run on tokio's blocking
    /// pool so the calling task yields instead of stalling its runtime.
    pub async fn get_bytes_async(&self, key: &str) -> Result<Option<Bytes>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let key = self.full_key(key);
        if let Some(v) = self.lookup_memory(&key) {
            self.stats.record_hit();
            return Ok(Some(v));
        }
        let found = match &self.disk {
            Some(disk) => {
                let disk = disk.clone();
                let now = self.clock.now();
                let k = key.clone();
                run_blocking(move || disk.read(&k, now)).await?
            }
            None => None,
        };
        Ok(self.finish_disk_lookup(key, found))
    }

    pub async fn get_async<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_bytes_async(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set_async<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        self.set_bytes_async(key, data, ttl).await
    }

    pub async fn set_bytes_async(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let key = self.full_key(key);
        let entry = self.new_entry(value.into(), ttl)?;
        if let Some(disk) = &self.disk {
            let disk = disk.clone();
            let (k, e) = (key.clone(), entry.clone());
            run_blocking(move || disk.write(&k, &e)).await?;
        }
        if let Some(memory) = &self.memory {
            self.insert_memory(memory, key, entry);
        }
        Ok(())
    }

    pub async fn delete_async(&self, key: &str) -> Result<bool> {
        let key = self.full_key(key);
        let in_memory = self.memory.as_ref().map(|m| m.remove(&key)).unwrap_or(false);
        let on_disk = match &self.disk {
            Some(disk) => {
                let disk = disk.clone();
                run_blocking(move || disk.remove(&key)).await?
            }
            None => false,
        };
        Ok(in_memory || on_disk)
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        Error::unknown_with_context(
            format!("cache disk task failed: {}", e),
            ErrorContext::new().with_operation("cache.disk"),
        )
    })?
}

static DEFAULT_CACHE: Lazy<Arc<CacheManager>> = Lazy::new(|| {
    let built = CacheConfig::from_env().and_then(CacheManager::new);
    match built {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!(error = %e, "default cache configuration rejected; using in-memory defaults");
            let cap = NonZeroUsize::new(CacheConfig::default().max_memory_items)
                .unwrap_or(NonZeroUsize::MIN);
            Arc::new(CacheManager::memory_only(cap))
        }
    }
});

/// Process-wide cache, created on first use from `CacheConfig::from_env()`.
///
/// Disk writes are complete when `set` returns (no buffered handles), so
/// nothing needs flushing when the process exits.
pub fn default_cache() -> Arc<CacheManager> {
    DEFAULT_CACHE.clone()
}
