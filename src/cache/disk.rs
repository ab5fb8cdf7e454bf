//! Unbounded on-disk tier: one JSON record per key.
//!
//! Files are named by the SHA-256 of the key and written to a temporary name
//! first, then renamed into place, so readers never see a partial record.

use super::entry::{CacheEntry, DiskRecord, RECORD_VERSION};
use crate::utils::{read, sha256_hex, write};
use crate::{Error, ErrorContext, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;
use tracing::{debug, warn};

const RECORD_EXT: &str = "json";

pub struct DiskTier {
    dir: PathBuf,
    lock: RwLock<()>,
}

impl DiskTier {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot create cache directory: {}", e),
                ErrorContext::new()
                    .with_operation("cache.disk.open")
                    .with_metadata("path", dir.display()),
            )
        })?;
        debug!(path = %dir.display(), "disk cache tier opened");
        Ok(Self {
            dir,
            lock: RwLock::new(()),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", sha256_hex(key.as_bytes()), RECORD_EXT))
    }

    /// Reads a fresh record. Expired, corrupt or colliding records are removed
    /// and reported as absent.
    pub fn read(&self, key: &str, now: SystemTime) -> Result<Option<CacheEntry>> {
        let _guard = write(&self.lock);
        let path = self.path_for(key);
        let Some(record) = load_record(&path)? else {
            return Ok(None);
        };
        if record.key != key || record.version != RECORD_VERSION {
            return Ok(None);
        }
        let entry = record.into_entry(now);
        if entry.is_expired_at(now) {
            remove_file_if_exists(&path)?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Existence probe under the shared lock; leaves corrupt records for the
    /// next `read` to discard.
    pub fn contains_live(&self, key: &str, now: SystemTime) -> bool {
        let _guard = read(&self.lock);
        match load(&self.path_for(key)) {
            Ok(Loaded::Record(record)) => {
                record.key == key
                    && !matches!(record.expires_at_ms, Some(ms) if crate::utils::from_unix_ms(ms) <= now)
            }
            _ => false,
        }
    }

    pub fn write(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let data = serde_json::to_vec(&entry.to_record(key))?;
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{}.tmp-{}", RECORD_EXT, uuid::Uuid::new_v4()));
        let _guard = write(&self.lock);
        fs::write(&tmp, &data)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| {
                let _ = fs::remove_file(&tmp);
                disk_error(e, "cache.disk.write", &path)
            })
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        let _guard = write(&self.lock);
        remove_file_if_exists(&self.path_for(key))
    }

    pub fn clear(&self) -> Result<usize> {
        let _guard = write(&self.lock);
        let mut removed = 0;
        for path in self.record_paths()? {
            if remove_file_if_exists(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        let _guard = read(&self.lock);
        self.record_paths().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn purge_expired(&self, now: SystemTime) -> Result<usize> {
        let _guard = write(&self.lock);
        let mut removed = 0;
        for path in self.record_paths()? {
            let stale = match load_record(&path)? {
                Some(record) => record
                    .expires_at_ms
                    .map(|ms| crate::utils::from_unix_ms(ms) <= now)
                    .unwrap_or(false),
                None => false,
            };
            if stale && remove_file_if_exists(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(disk_error(e, "cache.disk.scan", &self.dir)),
        };
        Ok(entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(RECORD_EXT))
            .collect())
    }
}

enum Loaded {
    Missing,
    Corrupt(serde_json::Error),
    Record(DiskRecord),
}

fn load(path: &Path) -> Result<Loaded> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Loaded::Missing),
        Err(e) => return Err(disk_error(e, "cache.disk.read", path)),
    };
    Ok(match serde_json::from_slice::<DiskRecord>(&data) {
        Ok(record) => Loaded::Record(record),
        Err(e) => Loaded::Corrupt(e),
    })
}

/// `Ok(None)` for a missing file; a corrupt file is deleted and treated as
/// missing. Callers hold the write lock.
fn load_record(path: &Path) -> Result<Option<DiskRecord>> {
    match load(path)? {
        Loaded::Record(record) => Ok(Some(record)),
        Loaded::Missing => Ok(None),
        Loaded::Corrupt(e) => {
            warn!(path = %path.display(), error = %e, "discarding corrupt cache record");
            let _ = fs::remove_file(path);
            Ok(None)
        }
    }
}

fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(disk_error(e, "cache.disk.remove", path)),
    }
}

fn disk_error(e: io::Error, operation: &str, path: &Path) -> Error {
    Error::unknown_with_context(
        format!("cache disk I/O failed: {}", e),
        ErrorContext::new()
            .with_operation(operation)
            .with_metadata("path", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[test]
    fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path()).unwrap();
        let now = SystemTime::now();
        let entry = CacheEntry::new(Bytes::from_static(b"hello"), now, None);

        tier.write("greeting", &entry).unwrap();
        assert_eq!(tier.len(), 1);
        assert!(tier.contains_live("greeting", now));
        assert_eq!(tier.read("greeting", now).unwrap().unwrap().value, entry.value);

        assert!(tier.remove("greeting").unwrap());
        assert!(!tier.remove("greeting").unwrap());
        assert!(tier.read("greeting", now).unwrap().is_none());
    }

    #[test]
    fn test_expired_record_is_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path()).unwrap();
        let now = SystemTime::now();
        let entry = CacheEntry::new(Bytes::from_static(b"x"), now, Some(Duration::from_secs(5)));
        tier.write("k", &entry).unwrap();

        let later = now + Duration::from_secs(6);
        assert!(!tier.contains_live("k", later));
        assert!(tier.read("k", later).unwrap().is_none());
        assert!(tier.is_empty());
    }

    #[test]
    fn test_corrupt_record_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path()).unwrap();
        fs::write(tier.path_for("bad"), b"{not json").unwrap();
        assert!(tier.read("bad", SystemTime::now()).unwrap().is_none());
        assert!(tier.is_empty());
    }

    #[test]
    fn test_existence_probe_leaves_corrupt_record_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path()).unwrap();
        let path = tier.path_for("bad");
        fs::write(&path, b"{not json").unwrap();

        assert!(!tier.contains_live("bad", SystemTime::now()));
        assert!(path.exists());

        assert!(tier.read("bad", SystemTime::now()).unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        {
            let tier = DiskTier::open(dir.path()).unwrap();
            let entry = CacheEntry::new(Bytes::from_static(b"persisted"), now, Some(Duration::from_secs(60)));
            tier.write("k", &entry).unwrap();
        }
        let reopened = DiskTier::open(dir.path()).unwrap();
        let entry = reopened.read("k", now).unwrap().unwrap();
        assert_eq!(entry.value, Bytes::from_static(b"persisted"));
        assert!(entry.expires_at.is_some());
    }

    #[test]
    fn test_purge_expired() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path()).unwrap();
        let now = SystemTime::now();
        tier.write("short", &CacheEntry::new(Bytes::from_static(b"1"), now, Some(Duration::from_secs(1)))).unwrap();
        tier.write("long", &CacheEntry::new(Bytes::from_static(b"2"), now, None)).unwrap();
        assert_eq!(tier.purge_expired(now + Duration::from_secs(2)).unwrap(), 1);
        assert_eq!(tier.len(), 1);
    }
}
