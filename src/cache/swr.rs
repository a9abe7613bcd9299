//! # Stale-While-Revalidate Cache
//!
//! Wraps a [`CacheStore`] with freshness tracking, background refresh and single-flight
//! loading.
//!
//! ```text
//!            age <= ttl            ttl < age <= ttl + stale        age > ttl + stale
//!   ──────────── Fresh ──────────┼──────── Stale ─────────────┼──────── Expired ──────▶
//!   serve cached                 │ serve cached, refresh once │ reload synchronously
//! ```
//!
//! Each stored value is an envelope carrying `created_at`, `ttl`, `stale_time` and the id of
//! the load that wrote it. [`SwrCache::invalidate`] raises the key's id floor, so envelopes
//! written by superseded loads read as misses even if they land after the invalidation.
//!
//! Loads run on their own tokio task. Every caller that observes an in-flight load for its key
//! awaits the same shared future, and the load clears its own slot when it finishes, panics
//! or is aborted.
//!
//! Per-key bookkeeping (in-flight slot, id floor, last write) only exists while the key has
//! callers, loads or a possibly-stale store entry; idle keys are dropped from the map.

use super::errors::CacheResult;
use super::store::{matches_pattern, CacheStore};
use crate::constants::components;
use crate::error::DispatchError;
use crate::logging::log_cache_operation;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type LoadFuture = Shared<BoxFuture<'static, Result<SwrRead, DispatchError>>>;

/// Per-call freshness options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwrOptions {
    /// How long a loaded value is fresh
    pub ttl: Duration,
    /// Grace window after `ttl` during which the value is still served
    pub stale_time: Duration,
    /// Serve stale values while refreshing in the background
    pub stale_while_revalidate: bool,
}

impl SwrOptions {
    pub fn new(ttl: Duration, stale_time: Duration) -> Self {
        Self {
            ttl,
            stale_time,
            stale_while_revalidate: true,
        }
    }

    pub fn without_revalidate(mut self) -> Self {
        self.stale_while_revalidate = false;
        self
    }

    /// How long the backing store must keep an entry
    fn retention(&self) -> Duration {
        if self.stale_while_revalidate {
            self.ttl.saturating_add(self.stale_time)
        } else {
            self.ttl
        }
    }
}

/// Outcome of [`SwrCache::get_with_swr`]
#[derive(Debug, Clone, PartialEq)]
pub struct SwrRead {
    pub data: Value,
    pub from_cache: bool,
    pub is_stale: bool,
    pub cached_at: DateTime<Utc>,
    /// When the value stops being fresh
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEnvelope {
    value: Value,
    created_at: DateTime<Utc>,
    ttl_ms: u64,
    stale_ms: u64,
    load_id: u64,
}

impl CacheEnvelope {
    fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_ms)
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + to_chrono(self.ttl())
    }

    fn into_read(self, from_cache: bool, is_stale: bool) -> SwrRead {
        let expires_at = self.expires_at();
        SwrRead {
            data: self.value,
            from_cache,
            is_stale,
            cached_at: self.created_at,
            expires_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Fresh,
    Stale,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    Initial,
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshStatus {
    Started,
    InFlight,
    /// A load newer than the entry just read has already written
    AlreadyWritten,
}

impl RefreshStatus {
    fn describe(self) -> &'static str {
        match self {
            Self::Started => "background refresh started",
            Self::InFlight => "refresh already in flight",
            Self::AlreadyWritten => "newer value already written",
        }
    }
}

/// Wall clock anchored to the tokio clock, so ages follow paused/advanced test time.
#[derive(Debug, Clone, Copy)]
struct Clock {
    anchor_instant: tokio::time::Instant,
    anchor_utc: DateTime<Utc>,
}

impl Clock {
    fn new() -> Self {
        Self {
            anchor_instant: tokio::time::Instant::now(),
            anchor_utc: Utc::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.anchor_utc + to_chrono(self.anchor_instant.elapsed())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwrStats {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    /// Loader invocations (initial loads and refreshes)
    pub loads: u64,
    pub load_failures: u64,
    pub refresh_failures: u64,
    /// Store reads or writes that failed and were degraded
    pub store_errors: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    refresh_failures: AtomicU64,
    store_errors: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SwrStats {
        SwrStats {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

struct InFlight {
    id: u64,
    future: LoadFuture,
}

/// Bookkeeping for one key
#[derive(Default)]
struct KeyState {
    in_flight: Option<InFlight>,
    /// Envelopes and loads with a smaller id were invalidated
    floor: u64,
    /// Invalidated loads that are still running
    superseded: usize,
    /// Callers between their store read and their return
    pins: usize,
    /// The store may still hold an invalidated envelope
    masked: bool,
    /// Id of the newest load whose write reached the store
    last_written: u64,
}

impl KeyState {
    fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.superseded == 0 && self.pins == 0 && !self.masked
    }
}

struct SwrInner<S> {
    store: S,
    keys: DashMap<String, KeyState>,
    next_load_id: AtomicU64,
    stats: StatsCounters,
    clock: Clock,
}

/// Keeps a key's bookkeeping alive for the duration of a call
struct KeyPin<'a, S> {
    inner: &'a SwrInner<S>,
    key: &'a str,
}

impl<S> Drop for KeyPin<'_, S> {
    fn drop(&mut self) {
        if let Some(mut state) = self.inner.keys.get_mut(self.key) {
            state.pins = state.pins.saturating_sub(1);
        }
        self.inner.prune(self.key);
    }
}

/// Releases a load's in-flight slot however the load ends
struct LoadRelease<'a, S> {
    inner: &'a SwrInner<S>,
    key: &'a str,
    id: u64,
}

impl<S> Drop for LoadRelease<'_, S> {
    fn drop(&mut self) {
        if let Some(mut state) = self.inner.keys.get_mut(self.key) {
            let owns_slot = matches!(&state.in_flight, Some(slot) if slot.id == self.id);
            if owns_slot {
                state.in_flight = None;
            } else {
                // an invalidation took the slot and counted this load as superseded
                state.superseded = state.superseded.saturating_sub(1);
            }
        }
        self.inner.prune(self.key);
    }
}

impl<S> SwrInner<S> {
    fn pin<'a>(&'a self, key: &'a str) -> KeyPin<'a, S> {
        self.keys.entry(key.to_string()).or_default().pins += 1;
        KeyPin { inner: self, key }
    }

    fn prune(&self, key: &str) {
        self.keys.remove_if(key, |_, state| state.is_idle());
    }

    /// Clear the slot if it still belongs to load `id`
    fn clear_slot(&self, key: &str, id: u64) {
        if let Some(mut state) = self.keys.get_mut(key) {
            if matches!(&state.in_flight, Some(slot) if slot.id == id) {
                state.in_flight = None;
            }
        }
        self.prune(key);
    }

    fn is_superseded(&self, key: &str, load_id: u64) -> bool {
        self.keys
            .get(key)
            .map(|state| load_id < state.floor)
            .unwrap_or(false)
    }

    fn record_write(&self, key: &str, load_id: u64) {
        if let Some(mut state) = self.keys.get_mut(key) {
            state.last_written = state.last_written.max(load_id);
            // a load invalidated mid-write leaves a stale envelope behind
            state.masked = load_id < state.floor;
        }
    }

    /// Raise the id floor for `state`, detaching its in-flight load
    fn supersede(&self, state: &mut KeyState) {
        state.floor = state.floor.max(self.next_load_id.load(Ordering::Relaxed));
        if state.in_flight.take().is_some() {
            state.superseded += 1;
        }
    }
}

impl<S: CacheStore> SwrInner<S> {
    async fn read(&self, key: &str) -> Option<CacheEnvelope> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                if let Some(mut state) = self.keys.get_mut(key) {
                    state.masked = false;
                }
                return None;
            }
            Err(e) => {
                StatsCounters::bump(&self.stats.store_errors);
                warn!(
                    component = components::SWR_CACHE,
                    key = %key,
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                return None;
            }
        };

        let envelope: CacheEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                StatsCounters::bump(&self.stats.store_errors);
                warn!(
                    component = components::SWR_CACHE,
                    key = %key,
                    error = %e,
                    "Discarding unreadable cache entry"
                );
                return None;
            }
        };

        let current = match self.keys.get_mut(key) {
            Some(mut state) if envelope.load_id >= state.floor => {
                // the store holds one value per key, so nothing stale is left
                state.masked = false;
                true
            }
            Some(_) => false,
            None => true,
        };
        if !current {
            log_cache_operation("read", key, "superseded", None);
            return None;
        }
        Some(envelope)
    }

    async fn write(&self, key: &str, envelope: &CacheEnvelope, retention: Duration) {
        let outcome = match serde_json::to_string(envelope) {
            Ok(raw) => self.store.set(key, &raw, retention).await,
            Err(e) => Err(e.into()),
        };
        match outcome {
            Ok(()) => {
                self.record_write(key, envelope.load_id);
                log_cache_operation("write", key, "ok", None);
            }
            Err(e) => {
                StatsCounters::bump(&self.stats.store_errors);
                warn!(
                    component = components::SWR_CACHE,
                    key = %key,
                    error = %e,
                    "Cache write failed, value not cached"
                );
            }
        }
    }

    fn classify(&self, envelope: &CacheEnvelope, options: &SwrOptions) -> Freshness {
        let age = (self.clock.now() - envelope.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        if age <= envelope.ttl() {
            Freshness::Fresh
        } else if options.stale_while_revalidate
            && age <= envelope.ttl().saturating_add(envelope.stale_time())
        {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

/// Stale-while-revalidate cache over a [`CacheStore`]
///
/// Cheap to clone; clones share state.
pub struct SwrCache<S> {
    inner: Arc<SwrInner<S>>,
}

impl<S> Clone for SwrCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CacheStore> std::fmt::Debug for SwrCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwrCache")
            .field("provider", &self.inner.store.provider_name())
            .field("tracked_keys", &self.inner.keys.len())
            .finish()
    }
}

impl<S: CacheStore + 'static> SwrCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(SwrInner {
                store,
                keys: DashMap::new(),
                next_load_id: AtomicU64::new(1),
                stats: StatsCounters::default(),
                clock: Clock::new(),
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn stats(&self) -> SwrStats {
        self.inner.stats.snapshot()
    }

    /// Number of loads currently outstanding
    pub fn in_flight_count(&self) -> usize {
        self.inner
            .keys
            .iter()
            .filter(|state| state.in_flight.is_some())
            .count()
    }

    /// Number of keys with live bookkeeping. Zero once every call and load has finished,
    /// unless an invalidation could not delete from the store.
    pub fn tracked_key_count(&self) -> usize {
        self.inner.keys.len()
    }

    /// Read `key`, loading it with `loader` on a miss.
    ///
    /// Fresh values are returned as-is. Stale values are returned immediately and refreshed
    /// in the background (at most one refresh per key). Missing or expired values are loaded
    /// synchronously; concurrent callers for the same key share one loader invocation and
    /// all receive its error if it fails.
    pub async fn get_with_swr<F, Fut>(
        &self,
        key: &str,
        loader: F,
        options: SwrOptions,
    ) -> Result<SwrRead, DispatchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, DispatchError>> + Send + 'static,
    {
        let _pin = self.inner.pin(key);

        if let Some(envelope) = self.inner.read(key).await {
            match self.inner.classify(&envelope, &options) {
                Freshness::Fresh => {
                    StatsCounters::bump(&self.inner.stats.hits);
                    log_cache_operation("get", key, "hit", None);
                    return Ok(envelope.into_read(true, false));
                }
                Freshness::Stale => {
                    StatsCounters::bump(&self.inner.stats.stale_hits);
                    let status = self.refresh(key, loader, options, envelope.load_id);
                    log_cache_operation("get", key, "stale", Some(status.describe()));
                    return Ok(envelope.into_read(true, true));
                }
                Freshness::Expired => {
                    log_cache_operation("get", key, "expired", None);
                }
            }
        }

        StatsCounters::bump(&self.inner.stats.misses);
        let (load, started) = self.join_or_start(key, loader, options);
        if !started {
            debug!(
                component = components::SWR_CACHE,
                key = %key,
                "Joining in-flight load"
            );
        }
        load.await
    }

    /// Return the in-flight load for `key`, starting one if none exists.
    fn join_or_start<F, Fut>(&self, key: &str, loader: F, options: SwrOptions) -> (LoadFuture, bool)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, DispatchError>> + Send + 'static,
    {
        let mut state = self.inner.keys.entry(key.to_string()).or_default();
        if let Some(slot) = &state.in_flight {
            return (slot.future.clone(), false);
        }
        let load = self.start_load(&mut state, key, loader, options, LoadKind::Initial);
        (load, true)
    }

    /// Start a background refresh unless one is running or a load newer than `seen` has
    /// already written.
    fn refresh<F, Fut>(&self, key: &str, loader: F, options: SwrOptions, seen: u64) -> RefreshStatus
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, DispatchError>> + Send + 'static,
    {
        let mut state = self.inner.keys.entry(key.to_string()).or_default();
        if state.in_flight.is_some() {
            return RefreshStatus::InFlight;
        }
        if state.last_written > seen {
            return RefreshStatus::AlreadyWritten;
        }
        self.start_load(&mut state, key, loader, options, LoadKind::Refresh);
        RefreshStatus::Started
    }

    fn start_load<F, Fut>(
        &self,
        state: &mut KeyState,
        key: &str,
        loader: F,
        options: SwrOptions,
        kind: LoadKind,
    ) -> LoadFuture
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, DispatchError>> + Send + 'static,
    {
        let id = self.inner.next_load_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(Self::run_load(
            Arc::clone(&self.inner),
            key.to_string(),
            id,
            loader,
            options,
            kind,
        ));

        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    inner.clear_slot(&owned_key, id);
                    Err(DispatchError::execution(format!(
                        "cache load for '{owned_key}' was aborted: {e}"
                    )))
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some(InFlight {
            id,
            future: future.clone(),
        });
        future
    }

    async fn run_load<F, Fut>(
        inner: Arc<SwrInner<S>>,
        key: String,
        id: u64,
        loader: F,
        options: SwrOptions,
        kind: LoadKind,
    ) -> Result<SwrRead, DispatchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, DispatchError>> + Send + 'static,
    {
        let _release = LoadRelease {
            inner: &inner,
            key: &key,
            id,
        };

        StatsCounters::bump(&inner.stats.loads);
        let result = match AssertUnwindSafe(async move { loader().await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err(DispatchError::execution(format!(
                "cache loader for '{key}' panicked"
            ))),
        };

        match result {
            Ok(value) => {
                let envelope = CacheEnvelope {
                    value,
                    created_at: inner.clock.now(),
                    ttl_ms: millis(options.ttl),
                    stale_ms: millis(options.stale_time),
                    load_id: id,
                };
                if inner.is_superseded(&key, id) {
                    log_cache_operation("load", &key, "superseded", Some("invalidated during load"));
                } else {
                    inner.write(&key, &envelope, options.retention()).await;
                }
                Ok(envelope.into_read(false, false))
            }
            Err(e) => {
                if kind == LoadKind::Refresh {
                    StatsCounters::bump(&inner.stats.refresh_failures);
                    warn!(
                        component = components::SWR_CACHE,
                        key = %key,
                        error = %e,
                        "Background refresh failed, keeping stale entry"
                    );
                } else {
                    StatsCounters::bump(&inner.stats.load_failures);
                    debug!(
                        component = components::SWR_CACHE,
                        key = %key,
                        error = %e,
                        "Cache load failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Drop `key`. The next read loads synchronously, even if an older load is still running.
    pub async fn invalidate(&self, key: &str) -> CacheResult<()> {
        let _pin = self.inner.pin(key);
        if let Some(mut state) = self.inner.keys.get_mut(key) {
            self.inner.supersede(&mut state);
        }

        match self.inner.store.delete(key).await {
            Ok(()) => {
                log_cache_operation("invalidate", key, "ok", None);
                Ok(())
            }
            Err(e) => {
                if let Some(mut state) = self.inner.keys.get_mut(key) {
                    state.masked = true;
                }
                StatsCounters::bump(&self.inner.stats.store_errors);
                warn!(
                    component = components::SWR_CACHE,
                    key = %key,
                    error = %e,
                    "Cache delete failed; entry stays masked until overwritten or gone"
                );
                Err(e)
            }
        }
    }

    /// Drop every key matching `pattern` (prefix, or glob with `*`). Not atomic across keys.
    ///
    /// Returns the number of keys the store removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let mut tracked = Vec::new();
        for mut state in self.inner.keys.iter_mut() {
            if matches_pattern(pattern, state.key()) {
                self.inner.supersede(state.value_mut());
                tracked.push(state.key().clone());
            }
        }

        let removed = match self.inner.store.clear_pattern(pattern).await {
            Ok(removed) => removed,
            Err(e) => {
                for key in &tracked {
                    let mut state = self.inner.keys.entry(key.clone()).or_default();
                    self.inner.supersede(&mut state);
                    state.masked = true;
                }
                StatsCounters::bump(&self.inner.stats.store_errors);
                warn!(
                    component = components::SWR_CACHE,
                    pattern = %pattern,
                    error = %e,
                    "Cache pattern delete failed"
                );
                return Err(e);
            }
        };

        for key in &tracked {
            self.inner.prune(key);
        }
        debug!(
            component = components::SWR_CACHE,
            pattern = %pattern,
            removed = removed,
            tracked_keys = tracked.len(),
            "Invalidated cache pattern"
        );
        Ok(removed)
    }
}
