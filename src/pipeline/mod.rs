//! # Dispatch Pipelines
//!
//! ```text
//! caller ──▶ Pipeline ──▶ M1 ──▶ M2 ──▶ … ──▶ Endpoint (handler, or SWR-wrapped handler)
//!               │                                   │
//!               └──── status table, hooks ◀─────────┘
//! ```
//!
//! [`Pipeline`] is the shared core of the three buses: it owns the middleware chain, keeps
//! the execution status table current, reports to the observability hooks, and is the
//! single boundary where errors and panics raised inside the chain become failure results.

pub mod command;
pub mod event;
pub mod query;

use crate::constants::error_codes;
use crate::error::panic_message;
use crate::logging::log_error;
use crate::messaging::{DispatchResult, Message, MessageKind, PublishOutcome};
use crate::middleware::{Endpoint, Middleware, MiddlewareChain, Next};
use crate::observability::{DispatchEvent, DispatchHooks, SpanHandle};
use crate::registry::MessageHandler;
use crate::status::ExecutionStatusTable;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn, Instrument, Span};

pub use command::CommandBus;
pub use event::EventBus;
pub use query::QueryBus;

/// Bookkeeping for one dispatch between [`Pipeline::begin`] and completion
pub(crate) struct DispatchScope {
    event: DispatchEvent,
    span: Option<SpanHandle>,
    started: Instant,
}

impl DispatchScope {
    fn tracing_span(&self) -> Span {
        self.span
            .as_ref()
            .map(|handle| handle.span().clone())
            .unwrap_or_else(Span::none)
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

pub struct Pipeline {
    kind: MessageKind,
    component: &'static str,
    middleware: MiddlewareChain,
    status: Arc<ExecutionStatusTable>,
    hooks: DispatchHooks,
    track_status: bool,
}

impl Pipeline {
    pub fn new(
        kind: MessageKind,
        component: &'static str,
        status: Arc<ExecutionStatusTable>,
        hooks: DispatchHooks,
    ) -> Self {
        Self {
            kind,
            component,
            middleware: MiddlewareChain::new(),
            status,
            hooks,
            track_status: true,
        }
    }

    /// Skip execution status records for this pipeline
    pub fn without_status_tracking(mut self) -> Self {
        self.track_status = false;
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn middleware(&self) -> &MiddlewareChain {
        &self.middleware
    }

    pub fn status(&self) -> &Arc<ExecutionStatusTable> {
        &self.status
    }

    pub fn tracks_status(&self) -> bool {
        self.track_status
    }

    /// Run `middleware` around `endpoint`, converting any error or panic into a failure result.
    pub async fn run_chain(
        &self,
        message: &Message,
        middleware: &[Arc<dyn Middleware>],
        endpoint: &dyn Endpoint,
    ) -> DispatchResult {
        let outcome = AssertUnwindSafe(Next::new(middleware, endpoint).run(message))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                debug!(
                    component = self.component,
                    message_id = %message.id(),
                    message_type = %message.message_type(),
                    error_code = error.error_code(),
                    error = %error,
                    "Converting dispatch error into failure result"
                );
                DispatchResult::from_error(&error)
            }
            Err(payload) => {
                let error = panic_message(payload.as_ref());
                log_error(
                    self.component,
                    "dispatch",
                    &error,
                    Some(message.message_type()),
                );
                DispatchResult::failure(error, error_codes::EXECUTION_ERROR)
            }
        }
    }

    /// Dispatch to a single (optional) handler through the full chain.
    ///
    /// With no handler the chain is skipped entirely and a `HANDLER_NOT_FOUND` failure is
    /// returned, but status and hooks still see the dispatch.
    pub(crate) async fn dispatch_single<E, F>(
        &self,
        message: &Message,
        handler: Option<Arc<dyn MessageHandler>>,
        make_endpoint: F,
    ) -> DispatchResult
    where
        E: Endpoint,
        F: FnOnce(Arc<dyn MessageHandler>) -> E,
    {
        let scope = self.begin(message, handler.as_ref().map(|h| h.name()));

        let result = match handler {
            None => {
                warn!(
                    component = self.component,
                    message_id = %message.id(),
                    message_type = %message.message_type(),
                    "No handler registered"
                );
                DispatchResult::handler_not_found(message.message_type())
            }
            Some(handler) => {
                let endpoint = make_endpoint(handler);
                let middleware = self.middleware.snapshot();
                self.run_chain(message, &middleware, &endpoint)
                    .instrument(scope.tracing_span())
                    .await
            }
        };

        self.complete(scope, &result);
        result
    }

    pub(crate) fn begin(&self, message: &Message, handler: Option<&str>) -> DispatchScope {
        if self.track_status {
            self.status.track(message);
            self.status.mark_running(message.id());
        }

        let event = DispatchEvent::started(message, handler);
        let span = self.hooks.dispatch_started(&event);
        DispatchScope {
            event,
            span,
            started: Instant::now(),
        }
    }

    pub(crate) fn complete(&self, scope: DispatchScope, result: &DispatchResult) {
        if self.track_status {
            match result.error() {
                None => self.status.mark_completed(&scope.event.message_id),
                Some(error) => self.status.mark_failed(&scope.event.message_id, error),
            }
        }

        let duration_ms = scope.elapsed_ms();
        let event = scope.event.finished(duration_ms, result);
        self.hooks.dispatch_finished(scope.span, &event);
    }

    pub(crate) fn complete_publish(&self, scope: DispatchScope, outcome: &PublishOutcome) {
        if self.track_status {
            match &outcome.error {
                None => self.status.mark_completed(&scope.event.message_id),
                Some(error) => self.status.mark_failed(&scope.event.message_id, error.as_str()),
            }
        }

        let duration_ms = scope.elapsed_ms();
        let event = scope.event.published(duration_ms, outcome);
        self.hooks.dispatch_finished(scope.span, &event);
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("kind", &self.kind)
            .field("middleware", &self.middleware)
            .field("hooks", &self.hooks)
            .field("track_status", &self.track_status)
            .finish()
    }
}
