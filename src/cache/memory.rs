//! Bounded in-memory tier with strict LRU eviction.

use super::entry::CacheEntry;
use crate::utils::{read, write};
use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::SystemTime;

/// Recency is tracked by the `LruCache` ordering: every successful `get`
/// promotes the entry, `contains_live` deliberately does not.
pub struct MemoryTier {
    entries: RwLock<LruCache<String, CacheEntry>>,
}

impl MemoryTier {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Lazily drops an expired entry and reports it as absent.
    pub fn get(&self, key: &str, now: SystemTime) -> Option<Bytes> {
        let mut entries = write(&self.entries);
        let expired = entries.peek(key)?.is_expired_at(now);
        if expired {
            entries.pop(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        entry.touch(now);
        Some(entry.value.clone())
    }

    pub fn contains_live(&self, key: &str, now: SystemTime) -> bool {
        read(&self.entries)
            .peek(key)
            .map(|e| !e.is_expired_at(now))
            .unwrap_or(false)
    }

    /// Insert or replace; returns the least-recently-used entry pushed out
    /// to make room, if any.
    pub fn insert(&self, key: String, entry: CacheEntry) -> Option<(String, CacheEntry)> {
        let mut entries = write(&self.entries);
        match entries.push(key.clone(), entry) {
            Some((old_key, old)) if old_key != key => Some((old_key, old)),
            _ => None,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        write(&self.entries).pop(key).is_some()
    }

    pub fn clear(&self) {
        write(&self.entries).clear();
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn purge_expired(&self, now: SystemTime) -> usize {
        let mut entries = write(&self.entries);
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }
}
