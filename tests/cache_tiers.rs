//! Tiered cache behavior through the public API.

use blossom_ai::cache::{CacheManager, ManualClock};
use blossom_ai::{CacheBackend, CacheConfig};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn hybrid(dir: &std::path::Path, items: usize) -> CacheConfig {
    CacheConfig::new()
        .with_backend(CacheBackend::Hybrid)
        .with_max_memory_items(items)
        .with_disk_path(dir)
}

#[test]
fn test_set_then_get_round_trips_typed_values() {
    let cache = CacheManager::new(CacheConfig::new()).unwrap();
    cache.set("list", &vec![1, 2, 3]).unwrap();
    assert_eq!(cache.get::<Vec<i32>>("list").unwrap(), Some(vec![1, 2, 3]));

    cache.set_bytes("raw", &b"\x00\x01binary"[..], None).unwrap();
    assert_eq!(cache.get_bytes("raw").unwrap().unwrap().as_ref(), b"\x00\x01binary");
}

#[test]
fn test_lru_eviction_keeps_recently_used() {
    let cache = CacheManager::new(CacheConfig::new().with_max_memory_items(2)).unwrap();
    cache.set("a", "1").unwrap();
    cache.set("b", "2").unwrap();
    assert!(cache.get::<String>("a").unwrap().is_some());
    cache.set("c", "3").unwrap();

    assert!(cache.exists("a"));
    assert!(cache.exists("c"));
    assert!(!cache.exists("b"));
    assert_eq!(cache.get_stats().evictions, 1);
}

#[test]
fn test_evicted_entry_is_served_from_disk_and_promoted() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::new(hybrid(dir.path(), 2)).unwrap();
    cache.set("a", "1").unwrap();
    cache.set("b", "2").unwrap();
    cache.get::<String>("a").unwrap();
    cache.set("c", "3").unwrap();
    assert_eq!(cache.memory_len(), 2);
    assert_eq!(cache.disk_len(), 3);

    assert_eq!(cache.get::<String>("b").unwrap().as_deref(), Some("2"));
    assert_eq!(cache.get_stats().evictions, 2);
    assert_eq!(cache.memory_len(), 2);
}

#[test]
fn test_disk_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = CacheManager::new(hybrid(dir.path(), 10)).unwrap();
        cache.set_with_ttl("answer", &42, Some(Duration::from_secs(3600))).unwrap();
    }
    let reopened = CacheManager::new(hybrid(dir.path(), 10)).unwrap();
    assert_eq!(reopened.get::<i32>("answer").unwrap(), Some(42));
}

#[test]
fn test_ttl_expires_in_both_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(SystemTime::now()));
    let cache = CacheManager::with_clock(hybrid(dir.path(), 10), clock.clone()).unwrap();

    cache.set_with_ttl("q", "ans", Some(Duration::from_secs(5))).unwrap();
    assert_eq!(cache.get::<String>("q").unwrap().as_deref(), Some("ans"));

    clock.advance(Duration::from_secs(6));
    assert!(cache.get::<String>("q").unwrap().is_none());
    assert!(!cache.exists("q"));
    assert_eq!(cache.disk_len(), 0);
}

#[test]
fn test_no_ttl_never_expires() {
    let clock = Arc::new(ManualClock::new(SystemTime::now()));
    let cache = CacheManager::with_clock(CacheConfig::new(), clock.clone()).unwrap();
    cache.set_with_ttl("forever", "x", None).unwrap();
    clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
    assert!(cache.exists("forever"));
}

#[test]
fn test_default_ttl_applies_to_plain_set() {
    let clock = Arc::new(ManualClock::new(SystemTime::now()));
    let config = CacheConfig::new().with_ttl(Some(Duration::from_secs(10)));
    let cache = CacheManager::with_clock(config, clock.clone()).unwrap();
    cache.set("k", "v").unwrap();
    clock.advance(Duration::from_secs(11));
    assert!(!cache.exists("k"));
}

#[test]
fn test_stats_track_hits_and_misses() {
    let cache = CacheManager::new(CacheConfig::new()).unwrap();
    cache.set("k", "v").unwrap();
    for _ in 0..4 {
        cache.get::<String>("k").unwrap();
    }
    for key in ["x", "y"] {
        cache.get::<String>(key).unwrap();
    }
    let stats = cache.get_stats();
    assert_eq!((stats.hits, stats.misses, stats.total_requests), (4, 2, 6));
    assert!((stats.hit_rate() - 4.0 / 6.0).abs() < 1e-9);
}

#[test]
fn test_delete_removes_from_both_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::new(hybrid(dir.path(), 10)).unwrap();
    cache.set("k", "v").unwrap();
    assert!(cache.delete("k").unwrap());
    assert!(!cache.delete("k").unwrap());
    assert!(cache.get::<String>("k").unwrap().is_none());
}

#[test]
fn test_purge_expired_sweeps_both_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(SystemTime::now()));
    let cache = CacheManager::with_clock(hybrid(dir.path(), 10), clock.clone()).unwrap();
    cache.set_with_ttl("short", "1", Some(Duration::from_secs(1))).unwrap();
    cache.set_with_ttl("long", "2", None).unwrap();
    clock.advance(Duration::from_secs(2));
    assert_eq!(cache.purge_expired().unwrap(), 2);
    assert_eq!(cache.memory_len(), 1);
    assert_eq!(cache.disk_len(), 1);
}

#[test]
fn test_concurrent_access_from_threads() {
    let cache = Arc::new(CacheManager::new(CacheConfig::new().with_max_memory_items(64)).unwrap());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    let key = format!("{}-{}", t, i % 8);
                    cache.set(&key, &i).unwrap();
                    cache.get::<i32>(&key).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(cache.memory_len() <= 64);
    assert_eq!(cache.get_stats().total_requests, 400);
}

#[tokio::test]
async fn test_async_access_uses_disk_tier() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::new(
        CacheConfig::new()
            .with_backend(CacheBackend::Disk)
            .with_disk_path(dir.path()),
    )
    .unwrap();
    cache.set_async("k", "v", None).await.unwrap();
    assert_eq!(cache.get_async::<String>("k").await.unwrap().as_deref(), Some("v"));
    assert!(cache.delete_async("k").await.unwrap());
    assert!(cache.get_async::<String>("k").await.unwrap().is_none());
    assert_eq!(cache.memory_len(), 0);
}
