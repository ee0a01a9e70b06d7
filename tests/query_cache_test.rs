//! Query cache boundary and concurrency tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use usage_stats::clock::SimulatedClock;
use usage_stats::QueryCache;

const TTL_MS: u64 = 1_800_000;

fn cache(capacity: usize) -> (QueryCache<String, SimulatedClock>, SimulatedClock) {
    let clock = SimulatedClock::new(10_000);
    let cache = QueryCache::with_clock(capacity, Duration::from_millis(TTL_MS), clock.clone());
    (cache, clock)
}

/// Loader that records how often it ran and returns `value`
async fn counted(
    cache: &QueryCache<String, SimulatedClock>,
    key: &str,
    value: &str,
    calls: &AtomicUsize,
) -> String {
    cache
        .get(key, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(value.to_string())
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_ttl_boundary() {
    let (cache, clock) = cache(10);
    let calls = AtomicUsize::new(0);

    assert_eq!(counted(&cache, "plugin", "v1", &calls).await, "v1");

    // Any read strictly before T+TTL is served from the entry
    clock.advance_ms(TTL_MS - 1);
    assert_eq!(counted(&cache, "plugin", "v2", &calls).await, "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // At exactly T+TTL the entry is stale
    clock.advance_ms(1);
    assert_eq!(counted(&cache, "plugin", "v2", &calls).await, "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reload_gets_fresh_ttl() {
    let (cache, clock) = cache(10);
    let calls = AtomicUsize::new(0);

    counted(&cache, "k", "v1", &calls).await;
    clock.advance_ms(TTL_MS);
    counted(&cache, "k", "v2", &calls).await;
    clock.advance_ms(TTL_MS - 1);
    assert_eq!(counted(&cache, "k", "v3", &calls).await, "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_capacity_boundary_evicts_lru() {
    let capacity = 5;
    let (cache, _clock) = cache(capacity);
    let calls = AtomicUsize::new(0);

    for i in 0..capacity {
        counted(&cache, &format!("k{}", i), "v", &calls).await;
    }
    // k0 becomes most recently used, leaving k1 as the LRU victim
    counted(&cache, "k0", "v", &calls).await;
    counted(&cache, "extra", "v", &calls).await;

    assert_eq!(cache.len(), capacity);
    assert!(cache.peek("k1").is_none(), "LRU entry should be evicted");
    for key in ["k0", "k2", "k3", "k4", "extra"] {
        assert!(cache.peek(key).is_some(), "{} should survive", key);
    }
    assert_eq!(cache.stats().evictions, 1);
}

#[tokio::test]
async fn test_failed_load_leaves_no_entry() {
    let (cache, _clock) = cache(10);
    let calls = AtomicUsize::new(0);

    let err = cache
        .get("subscribe_电影_1_30", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<String, _>("database is locked".to_string())
        })
        .await
        .unwrap_err();
    assert_eq!(err, "database is locked");
    assert!(cache.is_empty());

    // Next read misses again and re-invokes the loader
    let value = counted(&cache, "subscribe_电影_1_30", "rows", &calls).await;
    assert_eq!(value, "rows");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stats = cache.stats();
    assert_eq!((stats.misses, stats.load_failures), (2, 1));
}

#[tokio::test]
async fn test_failed_reload_keeps_nothing_stale() {
    let (cache, clock) = cache(10);
    let calls = AtomicUsize::new(0);

    counted(&cache, "k", "v1", &calls).await;
    clock.advance_ms(TTL_MS);

    let result = cache
        .get("k", || async { Err::<String, _>("down".to_string()) })
        .await;
    assert!(result.is_err());
    // The expired snapshot is never served again
    assert!(cache.peek("k").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_misses_share_one_load() {
    let clock = SimulatedClock::new(0);
    let cache = Arc::new(QueryCache::with_clock(
        10,
        Duration::from_secs(60),
        clock,
    ));
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get("plugin", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(42u64)
                    })
                    .await
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.await.unwrap().unwrap(), 42);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().hits, 31);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_waiters_retry_after_leader_fails() {
    let cache = Arc::new(QueryCache::with_clock(
        10,
        Duration::from_secs(60),
        SimulatedClock::new(0),
    ));
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get("k", || async move {
                        // Only the first load fails
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        if n == 0 {
                            Err("first load failed".to_string())
                        } else {
                            Ok(n as u64)
                        }
                    })
                    .await
            })
        })
        .collect();

    let mut failures = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(value) => assert_eq!(value, 1),
            Err(_) => failures += 1,
        }
    }
    assert_eq!(failures, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_slow_load_does_not_block_other_keys() {
    let cache = Arc::new(QueryCache::with_clock(
        10,
        Duration::from_secs(60),
        SimulatedClock::new(0),
    ));

    let slow = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get("slow", || async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok::<_, String>(1u64)
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let fast = tokio::time::timeout(
        Duration::from_millis(200),
        cache.get("fast", || async { Ok::<_, String>(2u64) }),
    )
    .await;
    assert_eq!(fast.unwrap().unwrap(), 2);
    assert_eq!(slow.await.unwrap().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_churn_respects_capacity() {
    let capacity = 16;
    let cache = Arc::new(QueryCache::with_clock(
        capacity,
        Duration::from_secs(60),
        SimulatedClock::new(0),
    ));

    let handles: Vec<_> = (0..8u64)
        .map(|task| {
            let cache = cache.clone();
            tokio::spawn(async move {
                for i in 0..200u64 {
                    let key = format!("subscribe_{}_{}", task, i % 40);
                    let value = cache
                        .get(&key, || async move { Ok::<_, String>(i % 40) })
                        .await
                        .unwrap();
                    assert_eq!(value, i % 40);
                }
            })
        })
        .collect();
    for h in handles {
        h.await.unwrap();
    }

    assert!(cache.len() <= capacity);
}

#[tokio::test]
async fn test_sub_millisecond_ttl_is_not_truncated() {
    let clock = SimulatedClock::new(0);
    let cache = QueryCache::with_clock(4, Duration::from_micros(1500), clock.clone());
    let calls = AtomicUsize::new(0);

    counted(&cache, "plugin", "v1", &calls).await;
    clock.advance(Duration::from_micros(1499));
    assert_eq!(counted(&cache, "plugin", "v2", &calls).await, "v1");

    clock.advance(Duration::from_micros(1));
    assert_eq!(counted(&cache, "plugin", "v2", &calls).await, "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
