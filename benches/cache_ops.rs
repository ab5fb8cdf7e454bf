//! Benchmarks for cache throughput
//!
//! This benchmark measures:
//! - Memory-tier get/set
//! - Hybrid get with disk fallback
//! - Cache key derivation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use blossom_ai::cache::{CacheKey, CacheManager};
use blossom_ai::{CacheBackend, CacheConfig};
use serde_json::json;

fn bench_memory_tier(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_tier");
    for size in [64usize, 4096] {
        let cache = CacheManager::new(CacheConfig::new().with_max_memory_items(1024)).unwrap();
        let payload = vec![7u8; size];
        cache.set_bytes("hot", payload.clone(), None).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("get_hit", size), &size, |b, _| {
            b.iter(|| cache.get_bytes(black_box("hot")).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("set", size), &size, |b, _| {
            b.iter(|| cache.set_bytes(black_box("k"), payload.clone(), None).unwrap())
        });
    }
    group.finish();
}

fn bench_hybrid_fallback(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::new(
        CacheConfig::new()
            .with_backend(CacheBackend::Hybrid)
            .with_max_memory_items(1)
            .with_disk_path(dir.path()),
    )
    .unwrap();
    cache.set("a", "first").unwrap();
    cache.set("b", "second").unwrap();

    let mut group = c.benchmark_group("hybrid_tier");
    // Alternating keys with one memory slot forces a disk read on every get.
    group.bench_function("get_disk_promote", |b| {
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            let key = if flip { "a" } else { "b" };
            cache.get::<String>(black_box(key)).unwrap()
        })
    });
    group.finish();
}

fn bench_key_derivation(c: &mut Criterion) {
    let args = json!({
        "prompt": "a watercolor fox in the snow",
        "model": "flux",
        "width": 1024,
        "height": 1024,
        "seed": 42,
        "nested": {"z": 1, "a": [1, 2, 3]}
    });
    c.bench_function("cache_key_for_call", |b| {
        b.iter(|| CacheKey::for_call("image.generate", black_box(&args)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_memory_tier,
    bench_hybrid_fallback,
    bench_key_derivation
);
criterion_main!(benches);
