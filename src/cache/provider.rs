//! Cache provider selected from configuration
//!
//! Uses enum dispatch so the SWR layer stays generic over a concrete [`CacheStore`]
//! without a vtable, while still letting configuration pick the backend at runtime.

use super::errors::CacheResult;
use super::providers::{InMemoryCacheStore, NoOpCacheStore};
use super::store::CacheStore;
use crate::config::{CacheConfig, CacheProviderKind};
use std::time::Duration;
use tracing::info;

#[derive(Debug)]
pub enum CacheProvider {
    /// In-process store with per-entry expiry
    InMemory(InMemoryCacheStore),
    /// Always-miss store (caching disabled)
    NoOp(NoOpCacheStore),
}

impl CacheProvider {
    pub fn from_config(config: &CacheConfig) -> Self {
        let provider = match config.provider {
            CacheProviderKind::Memory => Self::InMemory(InMemoryCacheStore::new(config.max_entries)),
            CacheProviderKind::None => Self::NoOp(NoOpCacheStore::new()),
        };
        info!(
            backend = provider.provider_name(),
            max_entries = config.max_entries,
            "Cache provider initialized"
        );
        provider
    }

    pub fn memory(max_entries: usize) -> Self {
        Self::InMemory(InMemoryCacheStore::new(max_entries))
    }

    pub fn noop() -> Self {
        Self::NoOp(NoOpCacheStore::new())
    }

    /// Check if caching is actually enabled (not NoOp)
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::NoOp(_))
    }
}

impl CacheStore for CacheProvider {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            Self::InMemory(s) => s.get(key).await,
            Self::NoOp(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        match self {
            Self::InMemory(s) => s.set(key, value, ttl).await,
            Self::NoOp(s) => s.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        match self {
            Self::InMemory(s) => s.delete(key).await,
            Self::NoOp(s) => s.delete(key).await,
        }
    }

    async fn clear_pattern(&self, pattern: &str) -> CacheResult<u64> {
        match self {
            Self::InMemory(s) => s.clear_pattern(pattern).await,
            Self::NoOp(s) => s.clear_pattern(pattern).await,
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        match self {
            Self::InMemory(s) => s.health_check().await,
            Self::NoOp(s) => s.health_check().await,
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            Self::InMemory(s) => s.provider_name(),
            Self::NoOp(s) => s.provider_name(),
        }
    }
}
