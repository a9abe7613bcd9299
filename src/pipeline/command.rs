//! Command bus: exactly one handler per type, result must be produced.

use super::Pipeline;
use crate::constants::components;
use crate::messaging::{DispatchResult, Message, MessageKind};
use crate::middleware::{HandlerEndpoint, Middleware, MiddlewareChain};
use crate::observability::DispatchHooks;
use crate::registry::{HandlerRegistry, MessageHandler};
use crate::status::{ExecutionRecord, ExecutionStatusTable};
use std::sync::Arc;
use tracing::debug;

/// Cheap to clone; clones share registry, middleware and status.
#[derive(Debug, Clone)]
pub struct CommandBus {
    registry: Arc<HandlerRegistry>,
    pipeline: Arc<Pipeline>,
}

impl CommandBus {
    pub fn new(status: Arc<ExecutionStatusTable>, hooks: DispatchHooks) -> Self {
        Self {
            registry: Arc::new(HandlerRegistry::single()),
            pipeline: Arc::new(Pipeline::new(
                MessageKind::Command,
                components::COMMAND_BUS,
                status,
                hooks,
            )),
        }
    }

    /// Register the handler for a command type, replacing any existing one
    pub fn register(&self, command_type: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.registry.register(command_type, handler);
    }

    pub fn unregister(&self, command_type: &str, handler_name: Option<&str>) -> usize {
        self.registry.unregister(command_type, handler_name)
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

    /// Dispatch and wait for the result
    pub async fn execute(&self, command: &Message) -> DispatchResult {
        let handler = self.registry.handler(command.message_type());
        self.pipeline
            .dispatch_single(command, handler, HandlerEndpoint::new)
            .await
    }

    /// Fire-and-forget dispatch. Returns the message id immediately; progress is visible
    /// through [`status`](Self::status). Must be called from within a tokio runtime.
    pub fn execute_async(&self, command: Message) -> String {
        let message_id = command.id().to_string();
        self.pipeline.status().mark_pending(&command);

        let bus = self.clone();
        tokio::spawn(async move {
            let result = bus.execute(&command).await;
            debug!(
                component = components::COMMAND_BUS,
                message_id = %command.id(),
                success = result.is_success(),
                "Async command finished"
            );
        });
        message_id
    }

    pub fn status(&self, message_id: &str) -> Option<ExecutionRecord> {
        self.pipeline.status().get(message_id)
    }
}
