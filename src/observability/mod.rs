//! # Observability Hooks
//!
//! Collaborators invoked around every dispatch:
//!
//! ```text
//! DispatchHooks
//! ├── TracingHook        start_span / finish_span, wrapping the whole pipeline run
//! └── DispatchObserver*  on_dispatch_start / on_dispatch_end
//!     ├── LoggingObserver   structured DISPATCH_OPERATION events
//!     └── DispatchMetrics   atomic counters with snapshot()
//! ```
//!
//! A hook that panics is logged and skipped; it never aborts the dispatch it observes.

pub mod metrics;
pub mod observers;
pub mod tracing_hook;

use crate::error::panic_message;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use observers::{DispatchEvent, DispatchObserver, LoggingObserver};
pub use tracing_hook::{SpanAttributes, SpanHandle, TracingHook, TracingSpanHook};

/// The set of hooks a pipeline reports to
#[derive(Clone, Default)]
pub struct DispatchHooks {
    tracer: Option<Arc<dyn TracingHook>>,
    observers: Vec<Arc<dyn DispatchObserver>>,
}

impl DispatchHooks {
    /// No tracer, no observers
    pub fn new() -> Self {
        Self::default()
    }

    /// `tracing` spans plus structured dispatch logs
    pub fn standard() -> Self {
        Self::new()
            .with_tracer(Arc::new(TracingSpanHook::new()))
            .with_observer(Arc::new(LoggingObserver::new()))
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn TracingHook>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn dispatch_started(&self, event: &DispatchEvent) -> Option<SpanHandle> {
        for observer in &self.observers {
            guarded("on_dispatch_start", || observer.on_dispatch_start(event));
        }

        let tracer = self.tracer.as_ref()?;
        let attributes = event.span_attributes();
        let span_name = format!("{}.{}", event.kind, event.message_type);
        guarded("start_span", || tracer.start_span(&span_name, &attributes))
    }

    pub(crate) fn dispatch_finished(&self, span: Option<SpanHandle>, event: &DispatchEvent) {
        if let (Some(tracer), Some(span)) = (self.tracer.as_ref(), span) {
            let attributes = event.span_attributes();
            let success = event.success.unwrap_or(false);
            guarded("finish_span", || {
                tracer.finish_span(span, success, event.error.as_deref(), &attributes)
            });
        }

        for observer in &self.observers {
            guarded("on_dispatch_end", || observer.on_dispatch_end(event));
        }
    }
}

impl std::fmt::Debug for DispatchHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHooks")
            .field("tracer", &self.tracer.is_some())
            .field("observers", &self.observers.len())
            .finish()
    }
}

fn guarded<T>(hook: &str, call: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(value) => Some(value),
        Err(payload) => {
            warn!(
                hook = hook,
                error = %panic_message(payload.as_ref()),
                "Observability hook panicked; continuing dispatch"
            );
            None
        }
    }
}
