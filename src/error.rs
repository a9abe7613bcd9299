//! Error types for the dispatch core.
//!
//! Expected failures (no handler, a handler reporting `success: false`) travel as
//! [`DispatchResult`](crate::messaging::DispatchResult) values. `DispatchError` is the
//! "exception" channel: it is what handlers and middleware return when something
//! unexpected happens, and what the pipeline boundary converts into a failure result.

use crate::constants::error_codes;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("No handler registered for message type: {message_type}")]
    HandlerNotFound { message_type: String },
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    /// A handler reported a business failure while running as a cache loader.
    #[error("Handler rejected message [{code}]: {message}")]
    Rejected { code: String, message: String },
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Scheduler error: {0}")]
    Scheduler(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DispatchError {
    /// Shorthand for the most common variant.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Error code reported in a failure result once this error reaches the pipeline boundary.
    pub fn error_code(&self) -> &str {
        match self {
            Self::HandlerNotFound { .. } => error_codes::HANDLER_NOT_FOUND,
            Self::Validation(_) => error_codes::VALIDATION_ERROR,
            Self::Rejected { code, .. } => code.as_str(),
            Self::Execution(_)
            | Self::Timeout(_)
            | Self::Cache(_)
            | Self::Scheduler(_)
            | Self::Configuration(_) => error_codes::EXECUTION_ERROR,
        }
    }

    /// Only unexpected runtime failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(_) | Self::Timeout(_))
    }

    /// Message preserved in the failure result for diagnostics.
    pub fn diagnostic_message(&self) -> String {
        match self {
            Self::Execution(msg) | Self::Validation(msg) => msg.clone(),
            Self::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(error: serde_json::Error) -> Self {
        DispatchError::Execution(format!("JSON serialization error: {error}"))
    }
}

impl From<crate::cache::CacheError> for DispatchError {
    fn from(error: crate::cache::CacheError) -> Self {
        DispatchError::Cache(error.to_string())
    }
}

impl From<crate::config::ConfigurationError> for DispatchError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        DispatchError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Describe a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}
