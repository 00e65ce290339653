//! Benchmark for the ephemeral tier and key codec

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use dexcache::cache::{CacheKey, MemoryTier, ReadMode, TierStorage};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::runtime::Runtime;

const TTL: Duration = Duration::from_secs(300);

fn bench_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_key");
    group.throughput(Throughput::Elements(1));

    group.bench_function("derive_url", |b| {
        b.iter(|| CacheKey::of(black_box("https://api.pokemontcg.io/v2/cards?q=name:charizard")));
    });

    let long = format!("https://pokeapi.co/api/v2/pokemon-species/{}", "x".repeat(512));
    group.bench_function("derive_long_url", |b| {
        b.iter(|| CacheKey::of(black_box(long.as_str())));
    });

    group.finish();
}

fn bench_memory_tier(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("memory_tier");
    group.throughput(Throughput::Elements(1));

    let keys: Vec<CacheKey> = (0..1000).map(|i| CacheKey::of(format!("pokemon/{}", i))).collect();

    group.bench_function("set_with_eviction", |b| {
        let tier: MemoryTier<Value> = MemoryTier::with_capacity(100);
        let mut counter = 0usize;
        b.iter(|| {
            counter += 1;
            let key = &keys[counter % keys.len()];
            rt.block_on(tier.set(black_box(key), &json!({"id": counter}), TTL))
        });
    });

    group.bench_function("get_hit", |b| {
        let tier: MemoryTier<Value> = MemoryTier::with_capacity(1000);
        rt.block_on(async {
            for key in &keys {
                let _ = tier.set(key, &json!({"name": "pikachu"}), TTL).await;
            }
        });

        let mut counter = 0usize;
        b.iter(|| {
            counter += 1;
            let key = &keys[counter % keys.len()];
            rt.block_on(tier.get(black_box(key), ReadMode::Fresh))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_key_derivation, bench_memory_tier);
criterion_main!(benches);
