//! In-process cache store using Moka
//!
//! Bounded by entry count, with a TTL per entry: each value carries the TTL it was written
//! with and a Moka [`Expiry`] applies it on insert and on overwrite. TTLs longer than
//! [`MAX_ENTRY_TTL`] are clamped.
//!
//! **Important**: This cache is NOT shared across processes.

use crate::cache::errors::CacheResult;
use crate::cache::store::{matches_pattern, CacheStore};
use moka::future::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest TTL the store honors
pub const MAX_ENTRY_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    ttl: Duration,
}

/// Expires each entry after the TTL it was last written with
struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Clone)]
pub struct InMemoryCacheStore {
    cache: Cache<String, StoredValue>,
    max_entries: u64,
}

impl std::fmt::Debug for InMemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCacheStore")
            .field("max_entries", &self.max_entries)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl InMemoryCacheStore {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1) as u64;
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();

        debug!(max_entries = max_entries, "Moka in-memory cache store created");
        Self { cache, max_entries }
    }

    /// Approximate entry count; exact after [`run_pending_tasks`](Self::run_pending_tasks)
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply pending evictions and expirations
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new(crate::constants::defaults::CACHE_MAX_ENTRIES)
    }
}

impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.cache.get(key).await.map(|stored| stored.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let ttl = ttl.min(MAX_ENTRY_TTL);
        self.cache
            .insert(
                key.to_string(),
                StoredValue {
                    value: value.to_string(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn clear_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let matching: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, _)| matches_pattern(pattern, key))
            .map(|(key, _)| key.to_string())
            .collect();

        let mut removed = 0u64;
        for key in matching {
            if self.cache.remove(&key).await.is_some() {
                removed += 1;
            }
        }
        debug!(pattern = pattern, removed = removed, "Cache pattern delete (moka)");
        Ok(removed)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
