//! Structured before/after logging around the rest of the chain.

use super::{Middleware, Next};
use crate::error::Result;
use crate::messaging::{DispatchResult, Message};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn execute(&self, message: &Message, next: Next<'_>) -> Result<DispatchResult> {
        debug!(
            message_id = %message.id(),
            message_type = %message.message_type(),
            kind = %message.kind(),
            "Dispatch started"
        );

        let started = Instant::now();
        let outcome = next.run(message).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(result) if result.is_success() => info!(
                message_id = %message.id(),
                message_type = %message.message_type(),
                duration_ms = duration_ms,
                from_cache = result.from_cache(),
                "Dispatch succeeded"
            ),
            Ok(result) => warn!(
                message_id = %message.id(),
                message_type = %message.message_type(),
                duration_ms = duration_ms,
                error_code = result.error_code(),
                error = result.error(),
                "Dispatch returned failure"
            ),
            Err(error) => warn!(
                message_id = %message.id(),
                message_type = %message.message_type(),
                duration_ms = duration_ms,
                error = %error,
                "Dispatch raised error"
            ),
        }
        outcome
    }
}
