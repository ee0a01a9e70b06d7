//! Hot path benchmarks.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! Measures the paths every request takes: a cache hit on an aggregate
//! view, and an uncontended counter bump through the in-memory repository.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::convert::Infallible;
use std::time::Duration;
use tokio::runtime::Runtime;
use usage_stats::persistence::InMemoryRepository;
use usage_stats::{CounterStore, QueryCache, SubscribeReport};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("benchmark runtime")
}

/// Benchmark QueryCache::get when the entry is live
fn bench_cache_hit(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("cache_hit");
    group.throughput(Throughput::Elements(1));

    for entries in [1usize, 100] {
        let cache: QueryCache<u64> = QueryCache::new(entries, Duration::from_secs(3600));
        rt.block_on(async {
            for i in 0..entries {
                let key = format!("subscribe_电影_{}_30", i);
                cache
                    .get(&key, || async move { Ok::<_, Infallible>(i as u64) })
                    .await
                    .unwrap();
            }
        });

        group.bench_function(format!("entries_{}", entries), |b| {
            b.iter(|| {
                rt.block_on(async {
                    cache
                        .get(black_box("subscribe_电影_0_30"), || async {
                            Ok::<_, Infallible>(0u64)
                        })
                        .await
                        .unwrap()
                })
            })
        });
    }

    group.finish();
}

/// Benchmark CounterStore::bump_plugin and add_subscribe without contention
fn bench_counter_bump(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("counter_bump");
    group.throughput(Throughput::Elements(1));

    let store = CounterStore::new(InMemoryRepository::new(), Duration::from_secs(1));
    group.bench_function("bump_plugin", |b| {
        b.iter(|| rt.block_on(store.bump_plugin(black_box("AutoSignIn"))).unwrap())
    });

    let report = SubscribeReport::tmdb(603, Some(1)).with_media_type("电视剧");
    let identity = report.identity().unwrap();
    group.bench_function("add_subscribe", |b| {
        b.iter(|| {
            rt.block_on(store.add_subscribe(black_box(&identity), &report))
                .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_cache_hit, bench_counter_bump);
criterion_main!(benches);
