//! # Cache Module
//!
//! Stale-while-revalidate caching for query dispatch.
//!
//! ## Architecture
//!
//! ```text
//! SwrCache<S: CacheStore>           <- freshness, background refresh, single-flight
//!   └── CacheProvider (enum)        <- chosen from configuration, no vtable
//!         ├── InMemory(InMemoryCacheStore)  <- Moka with per-entry TTL
//!         └── NoOp(NoOpCacheStore)          <- always miss, always succeed
//! ```
//!
//! ## Design Decisions
//!
//! - **Graceful degradation**: store read errors are misses, write errors are logged
//! - **Envelopes**: freshness metadata travels inside the stored value, so any
//!   string key/value store can back the SWR layer
//! - **Load ids**: every envelope records the load that wrote it, so invalidation can mask
//!   entries written by superseded loads

pub mod errors;
pub mod provider;
pub mod providers;
pub mod store;
pub mod swr;

pub use errors::{CacheError, CacheResult};
pub use provider::CacheProvider;
pub use providers::{InMemoryCacheStore, NoOpCacheStore};
pub use store::{matches_pattern, CacheStore};
pub use swr::{SwrCache, SwrOptions, SwrRead, SwrStats};
