//! Stale-while-revalidate behavior: single-flight, freshness windows, invalidation and
//! degraded stores.

mod common;

use common::Counter;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tasker_dispatch::cache::{CacheError, CacheResult, CacheStore, InMemoryCacheStore};
use tasker_dispatch::{DispatchError, SwrCache, SwrOptions, SwrRead};

type Loader = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value, DispatchError>> + Send>;

/// Loader returning `{"version": n}` where `n` counts invocations, after `latency`
fn versioned_loader(calls: &Counter, latency: Duration) -> Loader {
    let calls = calls.clone();
    Box::new(move || {
        async move {
            let version = calls.bump();
            tokio::time::sleep(latency).await;
            Ok::<_, DispatchError>(json!({ "version": version }))
        }
        .boxed()
    })
}

fn price_options() -> SwrOptions {
    SwrOptions::new(Duration::from_secs(1), Duration::from_secs(60))
}

fn memory_cache() -> SwrCache<InMemoryCacheStore> {
    SwrCache::new(InMemoryCacheStore::new(1_000))
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_load() {
    let cache = memory_cache();
    let calls = Counter::new();

    let reads = join_all((0..10).map(|_| {
        let cache = cache.clone();
        let loader = versioned_loader(&calls, Duration::from_millis(100));
        tokio::spawn(async move { cache.get_with_swr("price:sku-1", loader, price_options()).await })
    }))
    .await;

    assert_eq!(calls.get(), 1);
    for read in reads {
        let read = read.unwrap().unwrap();
        assert_eq!(read.data, json!({"version": 1}));
        assert!(!read.from_cache);
    }
    assert_eq!(cache.in_flight_count(), 0);
    assert_eq!(cache.stats().loads, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_values_never_reload() {
    let cache = memory_cache();
    let calls = Counter::new();
    let options = SwrOptions::new(Duration::from_secs(30), Duration::from_secs(60));

    cache
        .get_with_swr("k", versioned_loader(&calls, Duration::ZERO), options)
        .await
        .unwrap();
    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(5)).await;
        let read = cache
            .get_with_swr("k", versioned_loader(&calls, Duration::ZERO), options)
            .await
            .unwrap();
        assert!(read.from_cache);
        assert!(!read.is_stale);
    }
    assert_eq!(calls.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_reads_trigger_a_single_background_refresh() {
    let cache = memory_cache();
    let calls = Counter::new();

    cache
        .get_with_swr("k", versioned_loader(&calls, Duration::ZERO), price_options())
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;

    let stale_reads = join_all((0..5).map(|_| {
        cache.get_with_swr(
            "k",
            versioned_loader(&calls, Duration::from_millis(100)),
            price_options(),
        )
    }))
    .await;

    for read in stale_reads {
        let read = read.unwrap();
        assert!(read.from_cache);
        assert!(read.is_stale);
        assert_eq!(read.data, json!({"version": 1}));
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.get(), 2);

    let refreshed = cache
        .get_with_swr("k", versioned_loader(&calls, Duration::ZERO), price_options())
        .await
        .unwrap();
    assert!(!refreshed.is_stale);
    assert_eq!(refreshed.data, json!({"version": 2}));
    assert_eq!(cache.stats().stale_hits, 5);
}

#[tokio::test(start_paused = true)]
async fn test_values_past_the_stale_window_reload_synchronously() {
    let cache = memory_cache();
    let calls = Counter::new();
    let options = SwrOptions::new(Duration::from_secs(1), Duration::from_secs(1));

    cache
        .get_with_swr("k", versioned_loader(&calls, Duration::ZERO), options)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(3)).await;

    let read = cache
        .get_with_swr("k", versioned_loader(&calls, Duration::from_millis(50)), options)
        .await
        .unwrap();
    assert!(!read.from_cache);
    assert_eq!(read.data, json!({"version": 2}));
    assert_eq!(calls.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_price_lookup_served_stale_then_refreshed() {
    let cache = memory_cache();
    let calls = Counter::new();

    let first = cache
        .get_with_swr("price:sku-1", versioned_loader(&calls, Duration::ZERO), price_options())
        .await
        .unwrap();
    assert!(!first.from_cache);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let second = cache
        .get_with_swr("price:sku-1", versioned_loader(&calls, Duration::ZERO), price_options())
        .await
        .unwrap();
    assert!(second.from_cache);
    assert!(second.is_stale);
    assert_eq!(second.data, first.data);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.get(), 2);
    assert_eq!(cache.in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_synchronous_load() {
    let cache = memory_cache();
    let calls = Counter::new();
    let options = SwrOptions::new(Duration::from_secs(300), Duration::from_secs(60));

    cache
        .get_with_swr("user:1", versioned_loader(&calls, Duration::ZERO), options)
        .await
        .unwrap();
    cache.invalidate("user:1").await.unwrap();

    let read = cache
        .get_with_swr("user:1", versioned_loader(&calls, Duration::ZERO), options)
        .await
        .unwrap();
    assert!(!read.from_cache);
    assert_eq!(read.data, json!({"version": 2}));
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_discards_superseded_load() {
    let cache = memory_cache();
    let calls = Counter::new();
    let options = SwrOptions::new(Duration::from_secs(300), Duration::from_secs(60));

    let slow = {
        let cache = cache.clone();
        let loader = versioned_loader(&calls, Duration::from_secs(1));
        tokio::spawn(async move { cache.get_with_swr("user:1", loader, options).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    cache.invalidate("user:1").await.unwrap();

    // the caller that started the superseded load still gets its value
    assert_eq!(slow.await.unwrap().unwrap().data, json!({"version": 1}));

    let read = cache
        .get_with_swr("user:1", versioned_loader(&calls, Duration::ZERO), options)
        .await
        .unwrap();
    assert!(!read.from_cache);
    assert_eq!(read.data, json!({"version": 2}));
}

/// Store whose every operation fails
struct UnreachableStore;

impl CacheStore for UnreachableStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::ConnectionError("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::ConnectionError("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Err(CacheError::ConnectionError("connection refused".to_string()))
    }

    async fn clear_pattern(&self, _pattern: &str) -> CacheResult<u64> {
        Err(CacheError::ConnectionError("connection refused".to_string()))
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(false)
    }

    fn provider_name(&self) -> &'static str {
        "unreachable"
    }
}

#[tokio::test]
async fn test_failing_store_degrades_to_recompute() {
    let cache = SwrCache::new(UnreachableStore);
    let calls = Counter::new();

    for expected in 1..=3 {
        let read = cache
            .get_with_swr("k", versioned_loader(&calls, Duration::ZERO), price_options())
            .await
            .unwrap();
        assert!(!read.from_cache);
        assert_eq!(read.data, json!({ "version": expected }));
    }

    let stats = cache.stats();
    assert_eq!(stats.loads, 3);
    // one failed read and one failed write per call
    assert_eq!(stats.store_errors, 6);
}

/// Memory store whose first write panics
struct PanicOnFirstWrite {
    inner: InMemoryCacheStore,
    armed: AtomicBool,
}

impl PanicOnFirstWrite {
    fn new() -> Self {
        Self {
            inner: InMemoryCacheStore::new(100),
            armed: AtomicBool::new(true),
        }
    }
}

impl CacheStore for PanicOnFirstWrite {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("store write exploded");
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.inner.delete(key).await
    }

    async fn clear_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.inner.clear_pattern(pattern).await
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "panic-on-first-write"
    }
}

#[tokio::test]
async fn test_store_panic_during_write_releases_the_key() {
    let cache = SwrCache::new(PanicOnFirstWrite::new());
    let calls = Counter::new();

    let err = cache
        .get_with_swr("k", versioned_loader(&calls, Duration::ZERO), price_options())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "EXECUTION_ERROR");
    assert_eq!(cache.in_flight_count(), 0);
    assert_eq!(cache.tracked_key_count(), 0);

    let read = cache
        .get_with_swr("k", versioned_loader(&calls, Duration::ZERO), price_options())
        .await
        .unwrap();
    assert!(!read.from_cache);
    assert_eq!(read.data, json!({"version": 2}));
}

/// Memory store whose reads return what was stored when the read began, after `latency`
struct SlowReadStore {
    inner: InMemoryCacheStore,
    latency: Duration,
}

impl CacheStore for SlowReadStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let value = self.inner.get(key).await?;
        tokio::time::sleep(self.latency).await;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.inner.delete(key).await
    }

    async fn clear_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.inner.clear_pattern(pattern).await
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "slow-read"
    }
}

#[tokio::test(start_paused = true)]
async fn test_stale_read_overlapping_a_finished_refresh_does_not_refresh_again() {
    let cache = SwrCache::new(SlowReadStore {
        inner: InMemoryCacheStore::new(100),
        latency: Duration::from_millis(100),
    });
    let calls = Counter::new();

    cache
        .get_with_swr("price:sku-1", versioned_loader(&calls, Duration::ZERO), price_options())
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;

    let stale_reader = |cache: &SwrCache<SlowReadStore>| {
        let cache = cache.clone();
        let loader = versioned_loader(&calls, Duration::ZERO);
        tokio::spawn(async move { cache.get_with_swr("price:sku-1", loader, price_options()).await })
    };
    let first = stale_reader(&cache);
    tokio::time::sleep(Duration::from_millis(50)).await;
    // reads the old entry before the first reader's refresh writes, returns after it
    let second = stale_reader(&cache);

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert!(first.is_stale);
    assert!(second.is_stale);
    assert_eq!(second.data, json!({"version": 1}));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.get(), 2);
    assert_eq!(cache.tracked_key_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_across_threads_share_one_load() {
    let cache = memory_cache();
    let calls = Counter::new();

    let reads = join_all((0..32).map(|_| {
        let cache = cache.clone();
        let loader = versioned_loader(&calls, Duration::from_millis(200));
        tokio::spawn(async move { cache.get_with_swr("price:sku-1", loader, price_options()).await })
    }))
    .await;

    assert_eq!(calls.get(), 1);
    let reads: Vec<SwrRead> = reads
        .into_iter()
        .map(|read| read.unwrap().unwrap())
        .collect();
    for read in &reads {
        assert!(!read.from_cache);
        assert_eq!(read.data, json!({"version": 1}));
        assert_eq!(read.cached_at, reads[0].cached_at);
    }

    // joiners report the stored entry's timestamps
    let hit = cache
        .get_with_swr("price:sku-1", versioned_loader(&calls, Duration::ZERO), price_options())
        .await
        .unwrap();
    assert!(hit.from_cache);
    assert_eq!(hit.cached_at, reads[0].cached_at);
    assert_eq!(hit.expires_at, reads[0].expires_at);
    assert_eq!(cache.in_flight_count(), 0);
    assert_eq!(cache.tracked_key_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stale_readers_across_threads_refresh_once() {
    let cache = memory_cache();
    let calls = Counter::new();
    let options = SwrOptions::new(Duration::from_millis(200), Duration::from_secs(60));

    cache
        .get_with_swr("k", versioned_loader(&calls, Duration::ZERO), options)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let reads = join_all((0..32).map(|_| {
        let cache = cache.clone();
        let loader = versioned_loader(&calls, Duration::from_millis(500));
        tokio::spawn(async move { cache.get_with_swr("k", loader, options).await })
    }))
    .await;

    for read in reads {
        let read = read.unwrap().unwrap();
        assert!(read.from_cache);
        assert!(read.is_stale);
        assert_eq!(read.data, json!({"version": 1}));
    }

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(calls.get(), 2);
    assert_eq!(cache.stats().stale_hits, 32);
    assert_eq!(cache.in_flight_count(), 0);
}

