//! In-process dispatch counters.

use super::observers::{DispatchEvent, DispatchObserver};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated from dispatch hooks
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    started: AtomicU64,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
    stale_hits: AtomicU64,
    total_duration_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub started: u64,
    /// Dispatches that finished, successfully or not
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub stale_hits: u64,
    pub total_duration_ms: u64,
}

impl MetricsSnapshot {
    pub fn in_progress(&self) -> u64 {
        self.started.saturating_sub(self.dispatched)
    }

    pub fn average_duration_ms(&self) -> f64 {
        if self.dispatched == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.dispatched as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.dispatched == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.dispatched as f64
        }
    }
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            total_duration_ms: self.total_duration_ms.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.started,
            &self.dispatched,
            &self.succeeded,
            &self.failed,
            &self.cache_hits,
            &self.stale_hits,
            &self.total_duration_ms,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl DispatchObserver for DispatchMetrics {
    fn on_dispatch_start(&self, _event: &DispatchEvent) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_dispatch_end(&self, event: &DispatchEvent) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        if event.success == Some(true) {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if event.from_cache == Some(true) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        if event.is_stale == Some(true) {
            self.stale_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_ms
            .fetch_add(event.duration_ms.unwrap_or(0), Ordering::Relaxed);
    }
}
