//! Dispatch start/end observers.

use super::tracing_hook::SpanAttributes;
use crate::logging::log_dispatch_operation;
use crate::messaging::{DispatchResult, Message, MessageKind, PublishOutcome};
use serde::Serialize;
use tracing::debug;

/// What an observer sees at dispatch start (outcome fields unset) and end
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchEvent {
    pub kind: MessageKind,
    pub message_type: String,
    pub message_id: String,
    pub handler: Option<String>,
    pub duration_ms: Option<u64>,
    pub success: Option<bool>,
    pub from_cache: Option<bool>,
    pub is_stale: Option<bool>,
    pub error_code: Option<String>,
    pub error: Option<String>,
}

impl DispatchEvent {
    pub fn started(message: &Message, handler: Option<&str>) -> Self {
        Self {
            kind: message.kind(),
            message_type: message.message_type().to_string(),
            message_id: message.id().to_string(),
            handler: handler.map(str::to_string),
            duration_ms: None,
            success: None,
            from_cache: None,
            is_stale: None,
            error_code: None,
            error: None,
        }
    }

    /// Fill in the outcome of a single-handler dispatch
    pub fn finished(mut self, duration_ms: u64, result: &DispatchResult) -> Self {
        self.duration_ms = Some(duration_ms);
        self.success = Some(result.is_success());
        if result.is_success() {
            self.from_cache = Some(result.from_cache());
            self.is_stale = Some(result.is_stale());
        }
        self.error_code = result.error_code().map(str::to_string);
        self.error = result.error().map(str::to_string);
        self
    }

    /// Fill in the aggregate outcome of an event publish
    pub fn published(mut self, duration_ms: u64, outcome: &PublishOutcome) -> Self {
        self.duration_ms = Some(duration_ms);
        self.success = Some(outcome.is_success());
        self.error = outcome.error.clone();
        self
    }

    pub fn is_finished(&self) -> bool {
        self.success.is_some()
    }

    pub(crate) fn span_attributes(&self) -> SpanAttributes {
        let mut attributes = vec![
            ("message.kind", self.kind.to_string()),
            ("message.type", self.message_type.clone()),
            ("message.id", self.message_id.clone()),
        ];
        if let Some(handler) = &self.handler {
            attributes.push(("handler", handler.clone()));
        }
        if let Some(from_cache) = self.from_cache {
            attributes.push(("cache.hit", from_cache.to_string()));
        }
        if let Some(code) = &self.error_code {
            attributes.push(("error.code", code.clone()));
        }
        attributes
    }
}

/// Start/end callbacks for every dispatch. Implementations must be cheap and non-blocking.
pub trait DispatchObserver: Send + Sync {
    fn on_dispatch_start(&self, event: &DispatchEvent);

    fn on_dispatch_end(&self, event: &DispatchEvent);
}

/// Emits structured dispatch logs
#[derive(Debug, Clone, Default)]
pub struct LoggingObserver;

impl LoggingObserver {
    pub fn new() -> Self {
        Self
    }
}

impl DispatchObserver for LoggingObserver {
    fn on_dispatch_start(&self, event: &DispatchEvent) {
        debug!(
            kind = %event.kind,
            message_type = %event.message_type,
            message_id = %event.message_id,
            handler = event.handler.as_deref(),
            "DISPATCH_START"
        );
    }

    fn on_dispatch_end(&self, event: &DispatchEvent) {
        log_dispatch_operation(
            "dispatch",
            event.kind.as_str(),
            &event.message_type,
            &event.message_id,
            event.handler.as_deref(),
            event.success.unwrap_or(false),
            event.duration_ms.unwrap_or(0),
            event.from_cache,
        );
    }
}
