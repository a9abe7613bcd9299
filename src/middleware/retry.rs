//! Retry interceptor with exponential backoff.
//!
//! Only errors are retried, and only retryable ones ([`DispatchError::is_retryable`]).
//! A handler that *returns* a failure result has made a deterministic business decision,
//! so that result passes through untouched. Panics in the wrapped chain count as
//! execution errors.

use super::{Middleware, Next};
use crate::config::RetryConfig;
use crate::constants::defaults;
use crate::error::{panic_message, DispatchError, Result};
use crate::messaging::{DispatchResult, Message};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule: `base_delay * 2^(attempt - 1)`, capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            base_delay: defaults::RETRY_BASE_DELAY,
            max_delay: defaults::RETRY_MAX_DELAY,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1));
        factor
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
pub struct RetryMiddleware {
    name: String,
    policy: RetryPolicy,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            name: "retry".to_string(),
            policy,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Default for RetryMiddleware {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, message: &Message, next: Next<'_>) -> Result<DispatchResult> {
        let mut attempt = 0u32;
        loop {
            let outcome = AssertUnwindSafe(next.run(message))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(DispatchError::execution(panic_message(payload.as_ref())))
                });

            match outcome {
                Err(error) if error.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        message_id = %message.id(),
                        message_type = %message.message_type(),
                        attempt = attempt,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Dispatch failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    if attempt > 0 {
                        debug!(
                            message_id = %message.id(),
                            attempts = attempt + 1,
                            error = %error,
                            "Retries exhausted"
                        );
                    }
                    return Err(error);
                }
                Ok(result) => return Ok(result),
            }
        }
    }
}
