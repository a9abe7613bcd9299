//! # Handler Registry
//!
//! Maps a message type to the handler(s) able to process it.
//!
//! Commands and queries use [`RegistrationMode::Single`]: registering a second handler for
//! the same type replaces the first (with a warning). Events use
//! [`RegistrationMode::Multi`]: handlers accumulate in registration order.
//!
//! Registration is a configuration-time activity. The registry is safe to share, but
//! callers are expected to finish registering before dispatch traffic starts.

use crate::error::Result;
use crate::logging::log_registry_operation;
use crate::messaging::{DispatchResult, Message};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// A capability that produces a result for a message.
///
/// Return `Ok(DispatchResult::Failure { .. })` for expected business failures and `Err(..)`
/// for unexpected ones. Only the latter are eligible for retry.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Stable name used in logs, status records and event outcomes
    fn name(&self) -> &str;

    async fn handle(&self, message: &Message) -> Result<DispatchResult>;
}

type HandlerFn = dyn Fn(Message) -> futures::future::BoxFuture<'static, Result<DispatchResult>>
    + Send
    + Sync;

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct FnHandler {
    name: String,
    func: Box<HandlerFn>,
}

impl FnHandler {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DispatchResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(move |message| Box::pin(func(message))),
        }
    }

    pub fn arc<F, Fut>(name: impl Into<String>, func: F) -> Arc<dyn MessageHandler>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DispatchResult>> + Send + 'static,
    {
        Arc::new(Self::new(name, func))
    }
}

impl std::fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageHandler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: &Message) -> Result<DispatchResult> {
        (self.func)(message.clone()).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationMode {
    /// One handler per type; re-registration overwrites
    Single,
    /// Any number of handlers per type; registration appends
    Multi,
}

pub struct HandlerRegistry {
    mode: RegistrationMode,
    handlers: RwLock<HashMap<String, Vec<Arc<dyn MessageHandler>>>>,
}

impl HandlerRegistry {
    pub fn new(mode: RegistrationMode) -> Self {
        Self {
            mode,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn single() -> Self {
        Self::new(RegistrationMode::Single)
    }

    pub fn multi() -> Self {
        Self::new(RegistrationMode::Multi)
    }

    pub fn mode(&self) -> RegistrationMode {
        self.mode
    }

    pub fn register(&self, message_type: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let message_type = message_type.into();
        let handler_name = handler.name().to_string();
        let mut handlers = self.handlers.write();
        let slot = handlers.entry(message_type.clone()).or_default();

        match self.mode {
            RegistrationMode::Single => {
                if let Some(existing) = slot.first() {
                    warn!(
                        message_type = %message_type,
                        existing_handler = existing.name(),
                        new_handler = %handler_name,
                        "Overwriting existing handler registration"
                    );
                }
                slot.clear();
                slot.push(handler);
            }
            RegistrationMode::Multi => slot.push(handler),
        }

        log_registry_operation("register", &message_type, Some(&handler_name), "ok");
    }

    /// Remove the named handler, or every handler for the type when `handler_name` is `None`.
    /// Unknown types and names are ignored. Returns the number of handlers removed.
    pub fn unregister(&self, message_type: &str, handler_name: Option<&str>) -> usize {
        let mut handlers = self.handlers.write();
        let removed = match handler_name {
            None => handlers.remove(message_type).map_or(0, |list| list.len()),
            Some(name) => match handlers.get_mut(message_type) {
                Some(list) => {
                    let before = list.len();
                    list.retain(|h| h.name() != name);
                    let removed = before - list.len();
                    if list.is_empty() {
                        handlers.remove(message_type);
                    }
                    removed
                }
                None => 0,
            },
        };

        if removed > 0 {
            log_registry_operation("unregister", message_type, handler_name, "ok");
        }
        removed
    }

    /// Snapshot of the handlers for a type (empty if none)
    pub fn handlers(&self, message_type: &str) -> Vec<Arc<dyn MessageHandler>> {
        self.handlers
            .read()
            .get(message_type)
            .cloned()
            .unwrap_or_default()
    }

    /// The first (for single-mode registries, the only) handler for a type
    pub fn handler(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers
            .read()
            .get(message_type)
            .and_then(|list| list.first().cloned())
    }

    pub fn has_handlers(&self, message_type: &str) -> bool {
        self.handlers
            .read()
            .get(message_type)
            .is_some_and(|list| !list.is_empty())
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("mode", &self.mode)
            .field("types", &self.registered_types())
            .finish()
    }
}
