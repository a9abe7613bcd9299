//! Cache store trait definition
//!
//! The raw key/value collaborator beneath [`SwrCache`](super::SwrCache). Freshness metadata
//! is tracked by the SWR layer inside the stored value, so a store only needs per-key TTLs.

use super::errors::CacheResult;
use std::future::Future;
use std::time::Duration;

/// Trait defining raw cache store operations
///
/// All operations are async and return `CacheResult`. The SWR layer treats read errors as
/// misses and logs write errors, so implementations should report failures rather than hide them.
pub trait CacheStore: Send + Sync {
    /// Get a value by key. `Ok(None)` is a miss.
    fn get(&self, key: &str) -> impl Future<Output = CacheResult<Option<String>>> + Send;

    /// Store a value that the backend may drop after `ttl`
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = CacheResult<()>> + Send;

    /// Delete a specific key
    fn delete(&self, key: &str) -> impl Future<Output = CacheResult<()>> + Send;

    /// Delete every key matching `pattern` (see [`matches_pattern`](super::matches_pattern)).
    /// Returns the number of keys removed.
    fn clear_pattern(&self, pattern: &str) -> impl Future<Output = CacheResult<u64>> + Send;

    /// Check if the backend is healthy
    fn health_check(&self) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Get the name of the cache provider
    fn provider_name(&self) -> &'static str;
}

/// Key matching used by pattern invalidation.
///
/// A pattern containing `*` is a glob where each `*` matches any run of characters
/// (including none); any other pattern is a plain prefix.
pub fn matches_pattern(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return key.starts_with(pattern);
    }

    let segments: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return true,
    };
    let Some(mut remaining) = key.strip_prefix(first) else {
        return false;
    };

    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return remaining.is_empty(),
    };

    for segment in middle {
        match remaining.find(segment) {
            Some(idx) => remaining = &remaining[idx + segment.len()..],
            None => return false,
        }
    }
    remaining.len() >= last.len() && remaining.ends_with(last)
}
