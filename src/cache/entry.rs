//! Cache entries and their on-disk record form.

use crate::utils::{from_unix_ms, to_unix_ms};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

pub(crate) const RECORD_VERSION: u32 = 1;

/// One cached value plus the metadata needed to expire and evict it.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    pub created_at: SystemTime,
    /// `None` never expires.
    pub expires_at: Option<SystemTime>,
    pub size_estimate: usize,
    pub access_count: u64,
    pub last_accessed: SystemTime,
}

impl CacheEntry {
    pub fn new(value: Bytes, now: SystemTime, ttl: Option<Duration>) -> Self {
        let size_estimate = value.len();
        Self {
            value,
            created_at: now,
            expires_at: ttl.map(|t| now + t),
            size_estimate,
            access_count: 0,
            last_accessed: now,
        }
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    pub(crate) fn touch(&mut self, now: SystemTime) {
        self.last_accessed = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    pub(crate) fn to_record(&self, key: &str) -> DiskRecord {
        DiskRecord {
            version: RECORD_VERSION,
            key: key.to_string(),
            value: self.value.clone(),
            created_at_ms: to_unix_ms(self.created_at),
            expires_at_ms: self.expires_at.map(to_unix_ms),
        }
    }
}

/// Self-describing disk form: the payload travels with its creation and
/// expiry stamps so freshness can be checked after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DiskRecord {
    pub version: u32,
    pub key: String,
    #[serde(with = "crate::utils::base64_bytes")]
    pub value: Bytes,
    pub created_at_ms: u64,
    /// `null` marks an entry without expiry.
    pub expires_at_ms: Option<u64>,
}

impl DiskRecord {
    pub fn into_entry(self, now: SystemTime) -> CacheEntry {
        let size_estimate = self.value.len();
        CacheEntry {
            value: self.value,
            created_at: from_unix_ms(self.created_at_ms),
            expires_at: self.expires_at_ms.map(from_unix_ms),
            size_estimate,
            access_count: 0,
            last_accessed: now,
        }
    }
}
