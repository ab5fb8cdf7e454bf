//! Memoizing wrapper over blocking and async functions.

use blossom_ai::cache::{memoize, memoize_async, CacheKey, CacheManager, CallArgs, ManualClock, Memoize};
use blossom_ai::{CacheBackend, CacheConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[test]
fn test_result_reused_within_ttl_and_recomputed_after() {
    let clock = Arc::new(ManualClock::new(SystemTime::now()));
    let cache = Arc::new(CacheManager::with_clock(CacheConfig::new(), clock.clone()).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let describe = memoize(cache, "describe", Some(Duration::from_secs(30)), move |(w, h): (u32, u32)| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}x{}", w, h))
    });

    assert_eq!(describe((1024, 768)).unwrap(), "1024x768");
    assert_eq!(describe((1024, 768)).unwrap(), "1024x768");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.advance(Duration::from_secs(31));
    assert_eq!(describe((1024, 768)).unwrap(), "1024x768");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_memoized_results_persist_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::new()
        .with_backend(CacheBackend::Disk)
        .with_disk_path(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let cache = Arc::new(CacheManager::new(config.clone()).unwrap());
        let counter = calls.clone();
        let wrapped = Memoize::new(cache, "len").with_ttl(None).wrap(move |s: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(s.len())
        });
        assert_eq!(wrapped.call("blossom".to_string()).unwrap(), 7);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_keys_match_manual_derivation() {
    let by_tuple = CacheKey::for_call("f", &("x", 1)).unwrap();
    let by_args = CallArgs::new().arg("x").unwrap().arg(&1).unwrap();
    let by_args = CacheKey::for_call("f", &by_args).unwrap();
    assert_ne!(by_tuple, by_args);
    assert!(by_tuple.as_str().starts_with("f:"));
}

#[tokio::test]
async fn test_async_wrapper_stays_async() {
    let cache = Arc::new(CacheManager::new(CacheConfig::new()).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let slow_double = memoize_async(cache.clone(), "slow_double", None, move |n: u64| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(n * 2)
        }
    });

    let (a, b) = (slow_double(21).await.unwrap(), slow_double(21).await.unwrap());
    assert_eq!((a, b), (42, 42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get_stats().hits, 1);
}

#[tokio::test]
async fn test_concurrent_misses_are_not_coalesced() {
    let cache = Arc::new(CacheManager::new(CacheConfig::new()).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let slow = memoize_async(cache, "slow", None, move |n: u64| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(n)
        }
    });

    let (a, b) = tokio::join!(slow(1), slow(1));
    assert_eq!((a.unwrap(), b.unwrap()), (1, 1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
