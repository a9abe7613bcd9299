//! # Dispatch Constants
//!
//! Error codes and default timings shared by the pipelines, the retry interceptor,
//! the status table and the stale-while-revalidate cache.

use std::time::Duration;

/// Error codes carried by failure results
pub mod error_codes {
    pub const HANDLER_NOT_FOUND: &str = "HANDLER_NOT_FOUND";
    pub const EXECUTION_ERROR: &str = "EXECUTION_ERROR";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
}

/// Component names used in structured logs
pub mod components {
    pub const COMMAND_BUS: &str = "command_bus";
    pub const QUERY_BUS: &str = "query_bus";
    pub const EVENT_BUS: &str = "event_bus";
    pub const SWR_CACHE: &str = "swr_cache";
    pub const SCHEDULER: &str = "deferred_scheduler";
    pub const STATUS_TABLE: &str = "execution_status";
}

pub mod defaults {
    use super::Duration;

    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(300);

    pub const CACHE_TTL: Duration = Duration::from_secs(300);
    pub const CACHE_STALE_TIME: Duration = Duration::from_secs(60);
    pub const CACHE_MAX_ENTRIES: usize = 10_000;

    /// Execution status records older than this are purged by the sweeper
    pub const STATUS_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
    pub const STATUS_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

    pub const SCHEDULER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
}
