//! Event bus: fan-out to every registered handler.
//!
//! Each handler gets its own traversal of the middleware chain. Traversals run concurrently
//! and are isolated: a handler that fails or panics only affects its own outcome. The
//! publish is `failed` if any handler failed, `completed` otherwise (including when no
//! handler is registered).

use super::Pipeline;
use crate::constants::components;
use crate::messaging::{HandlerOutcome, Message, MessageKind, PublishOutcome};
use crate::middleware::{HandlerEndpoint, Middleware, MiddlewareChain};
use crate::observability::DispatchHooks;
use crate::registry::{HandlerRegistry, MessageHandler};
use crate::status::{ExecutionRecord, ExecutionStatusTable};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, Instrument};

/// Cheap to clone; clones share registry, middleware and status.
#[derive(Debug, Clone)]
pub struct EventBus {
    registry: Arc<HandlerRegistry>,
    pipeline: Arc<Pipeline>,
}

impl EventBus {
    pub fn new(status: Arc<ExecutionStatusTable>, hooks: DispatchHooks) -> Self {
        Self {
            registry: Arc::new(HandlerRegistry::multi()),
            pipeline: Arc::new(Pipeline::new(
                MessageKind::Event,
                components::EVENT_BUS,
                status,
                hooks,
            )),
        }
    }

    /// Add a handler for an event type; handlers accumulate
    pub fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.registry.register(event_type, handler);
    }

    /// Remove the named handler, or all handlers for the type when `handler_name` is `None`
    pub fn unsubscribe(&self, event_type: &str, handler_name: Option<&str>) -> usize {
        self.registry.unregister(event_type, handler_name)
    }

    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.pipeline.middleware().add(middleware);
    }

    pub fn remove_middleware(&self, name: &str) -> bool {
        self.pipeline.middleware().remove(name)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn middleware(&self) -> &MiddlewareChain {
        self.pipeline.middleware()
    }

    pub async fn publish(&self, event: &Message) -> PublishOutcome {
        let handlers = self.registry.handlers(event.message_type());
        let scope = self.pipeline.begin(event, None);

        if handlers.is_empty() {
            debug!(
                component = components::EVENT_BUS,
                message_id = %event.id(),
                event_type = %event.message_type(),
                "No handlers subscribed"
            );
        }

        let middleware = self.pipeline.middleware().snapshot();
        let traversals = handlers.into_iter().map(|handler| {
            let middleware = middleware.as_slice();
            let pipeline = &self.pipeline;
            async move {
                let started = Instant::now();
                let name = handler.name().to_string();
                let endpoint = HandlerEndpoint::new(handler);
                let result = pipeline.run_chain(event, middleware, &endpoint).await;
                HandlerOutcome {
                    handler: name,
                    result,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        });

        let outcomes = join_all(traversals)
            .instrument(scope.tracing_span())
            .await;
        let outcome = PublishOutcome::aggregate(event.id(), outcomes);

        debug!(
            component = components::EVENT_BUS,
            message_id = %event.id(),
            event_type = %event.message_type(),
            handlers = outcome.handler_count(),
            status = %outcome.status,
            "Event published"
        );
        self.pipeline.complete_publish(scope, &outcome);
        outcome
    }

    /// Fire-and-forget publish. Returns the message id immediately; the aggregate outcome
    /// is visible through [`status`](Self::status). Must be called from within a tokio runtime.
    pub fn publish_async(&self, event: Message) -> String {
        let message_id = event.id().to_string();
        self.pipeline.status().mark_pending(&event);

        let bus = self.clone();
        tokio::spawn(async move {
            bus.publish(&event).await;
        });
        message_id
    }

    pub fn status(&self, message_id: &str) -> Option<ExecutionRecord> {
        self.pipeline.status().get(message_id)
    }
}
