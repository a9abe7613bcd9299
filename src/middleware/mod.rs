//! # Middleware Chain
//!
//! Ordered interceptors wrapping handler invocation, composed as an onion:
//!
//! ```text
//! M1.before → M2.before → endpoint → M2.after → M1.after
//! ```
//!
//! A middleware receives the message and a [`Next`] continuation. Calling
//! [`Next::run`] invokes the rest of the chain; not calling it short-circuits the
//! chain, in which case the middleware must produce the result itself.
//!
//! [`Next`] is an index cursor over a snapshot of the chain plus the terminal
//! [`Endpoint`]. It is `Copy`, so a middleware such as [`RetryMiddleware`] may run the
//! remainder of the chain more than once.

pub mod logging;
pub mod retry;
pub mod timeout;
pub mod validation;

use crate::error::Result;
use crate::logging::log_registry_operation;
use crate::messaging::{DispatchResult, Message};
use crate::registry::MessageHandler;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

pub use logging::LoggingMiddleware;
pub use retry::{RetryMiddleware, RetryPolicy};
pub use timeout::TimeoutMiddleware;
pub use validation::{ValidationMiddleware, Validator};

/// An interceptor around handler invocation
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Unique name within a chain; used by [`MiddlewareChain::remove`]
    fn name(&self) -> &str;

    async fn execute(&self, message: &Message, next: Next<'_>) -> Result<DispatchResult>;
}

/// Terminal link of a chain
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, message: &Message) -> Result<DispatchResult>;
}

/// Endpoint invoking a resolved handler directly
pub struct HandlerEndpoint {
    handler: Arc<dyn MessageHandler>,
}

impl HandlerEndpoint {
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl Endpoint for HandlerEndpoint {
    async fn call(&self, message: &Message) -> Result<DispatchResult> {
        self.handler.handle(message).await
    }
}

/// Continuation over the remainder of a chain
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn new(middleware: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self {
            middleware,
            endpoint,
        }
    }

    /// Invoke the next middleware, or the endpoint once the chain is exhausted
    pub fn run(self, message: &'a Message) -> BoxFuture<'a, Result<DispatchResult>> {
        match self.middleware.split_first() {
            Some((current, rest)) => current.execute(message, Next::new(rest, self.endpoint)),
            None => self.endpoint.call(message),
        }
    }

    /// Middleware remaining after this cursor
    pub fn remaining(&self) -> usize {
        self.middleware.len()
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

/// Ordered, configuration-time-mutable list of middleware.
///
/// Dispatch takes a [`snapshot`](Self::snapshot), so no lock is held while the chain runs.
#[derive(Default)]
pub struct MiddlewareChain {
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware; it wraps everything added after it
    pub fn add(&self, middleware: Arc<dyn Middleware>) {
        let name = middleware.name().to_string();
        let mut chain = self.middleware.write();
        if chain.iter().any(|m| m.name() == name) {
            warn!(middleware = %name, "Adding middleware with a name already in the chain");
        }
        chain.push(middleware);
        log_registry_operation("add_middleware", "*", Some(&name), "ok");
    }

    /// Remove every middleware with this name. Returns whether anything was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut chain = self.middleware.write();
        let before = chain.len();
        chain.retain(|m| m.name() != name);
        let removed = chain.len() != before;
        if removed {
            log_registry_operation("remove_middleware", "*", Some(name), "ok");
        }
        removed
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        self.middleware.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.middleware
            .read()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.middleware.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.read().is_empty()
    }

    pub fn clear(&self) {
        self.middleware.write().clear();
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("middleware", &self.names())
            .finish()
    }
}
