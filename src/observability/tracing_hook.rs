//! Span hook wrapping each dispatch.

use std::time::{Duration, Instant};
use tracing::field::Empty;
use tracing::Span;

/// Key/value attributes attached to a dispatch span
pub type SpanAttributes = Vec<(&'static str, String)>;

/// Handle returned by [`TracingHook::start_span`] and handed back on finish
#[derive(Debug)]
pub struct SpanHandle {
    name: String,
    started: Instant,
    span: Span,
}

impl SpanHandle {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            started: Instant::now(),
            span,
        }
    }

    /// A handle not backed by a `tracing` span
    pub fn detached(name: impl Into<String>) -> Self {
        Self::new(name, Span::none())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

pub trait TracingHook: Send + Sync {
    fn start_span(&self, name: &str, attributes: &SpanAttributes) -> SpanHandle;

    fn finish_span(
        &self,
        handle: SpanHandle,
        success: bool,
        error: Option<&str>,
        attributes: &SpanAttributes,
    );
}

/// Default hook backed by `tracing` spans
#[derive(Debug, Clone, Default)]
pub struct TracingSpanHook;

impl TracingSpanHook {
    pub fn new() -> Self {
        Self
    }
}

impl TracingHook for TracingSpanHook {
    fn start_span(&self, name: &str, attributes: &SpanAttributes) -> SpanHandle {
        let span = tracing::info_span!(
            "dispatch",
            span_name = %name,
            attributes = ?attributes,
            success = Empty,
            error = Empty,
            duration_ms = Empty,
        );
        SpanHandle::new(name, span)
    }

    fn finish_span(
        &self,
        handle: SpanHandle,
        success: bool,
        error: Option<&str>,
        attributes: &SpanAttributes,
    ) {
        let duration_ms = handle.elapsed().as_millis() as u64;
        let span = handle.span();
        span.record("success", success);
        span.record("duration_ms", duration_ms);
        if let Some(error) = error {
            span.record("error", error);
        }
        span.in_scope(|| {
            tracing::debug!(
                span_name = %handle.name(),
                success = success,
                duration_ms = duration_ms,
                attributes = ?attributes,
                "Dispatch span finished"
            );
        });
    }
}
