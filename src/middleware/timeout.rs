//! Bounds the remainder of the chain with a deadline.
//!
//! On expiry the inner future is dropped and [`DispatchError::Timeout`] is returned.
//! Work already spawned by the handler keeps running.

use super::{Middleware, Next};
use crate::error::{DispatchError, Result};
use crate::messaging::{DispatchResult, Message};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct TimeoutMiddleware {
    name: String,
    timeout: Duration,
}

impl TimeoutMiddleware {
    pub fn new(timeout: Duration) -> Self {
        Self {
            name: "timeout".to_string(),
            timeout,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, message: &Message, next: Next<'_>) -> Result<DispatchResult> {
        match tokio::time::timeout(self.timeout, next.run(message)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    message_id = %message.id(),
                    message_type = %message.message_type(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Dispatch timed out"
                );
                Err(DispatchError::Timeout(self.timeout))
            }
        }
    }
}
