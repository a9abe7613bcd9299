//! Dispatch outcomes.
//!
//! A [`DispatchResult`] never represents an escaped exception: by the time a caller sees
//! one, any [`DispatchError`] has already been converted at the pipeline boundary.

use crate::constants::error_codes;
use crate::error::DispatchError;
use crate::status::ExecutionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Tagged outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchResult {
    Success {
        data: Value,
        #[serde(default)]
        from_cache: bool,
        #[serde(default)]
        is_stale: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_expires_at: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        metadata: HashMap<String, Value>,
    },
    Failure {
        error: String,
        error_code: String,
    },
}

impl DispatchResult {
    pub fn success(data: Value) -> Self {
        Self::Success {
            data,
            from_cache: false,
            is_stale: false,
            cache_expires_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            error_code: error_code.into(),
        }
    }

    pub fn handler_not_found(message_type: &str) -> Self {
        Self::failure(
            format!("No handler registered for message type: {message_type}"),
            error_codes::HANDLER_NOT_FOUND,
        )
    }

    /// Convert an error that reached the pipeline boundary.
    pub fn from_error(error: &DispatchError) -> Self {
        Self::failure(error.diagnostic_message(), error.error_code())
    }

    /// Attach cache provenance to a success; failures are returned unchanged.
    pub fn with_cache_info(
        self,
        cached: bool,
        stale: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        match self {
            Self::Success { data, metadata, .. } => Self::Success {
                data,
                from_cache: cached,
                is_stale: stale,
                cache_expires_at: expires_at,
                metadata,
            },
            failure => failure,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        if let Self::Success { metadata, .. } = &mut self {
            metadata.insert(key.into(), value);
        }
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    pub fn into_data(self) -> Option<Value> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failure { error, .. } => Some(error),
            Self::Success { .. } => None,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Failure { error_code, .. } => Some(error_code),
            Self::Success { .. } => None,
        }
    }

    pub fn from_cache(&self) -> bool {
        matches!(self, Self::Success { from_cache: true, .. })
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Success { is_stale: true, .. })
    }

    pub fn cache_expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Success {
                cache_expires_at, ..
            } => *cache_expires_at,
            Self::Failure { .. } => None,
        }
    }

    pub fn metadata(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Self::Success { metadata, .. } => Some(metadata),
            Self::Failure { .. } => None,
        }
    }
}

/// What one event handler produced during a publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub handler: String,
    pub result: DispatchResult,
    pub duration_ms: u64,
}

/// Aggregate outcome of an event publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub message_id: String,
    pub status: ExecutionState,
    pub outcomes: Vec<HandlerOutcome>,
    /// Every failed handler's error message, joined with `"; "`
    pub error: Option<String>,
}

impl PublishOutcome {
    /// Aggregate per-handler results: failed if any handler failed.
    pub fn aggregate(message_id: impl Into<String>, outcomes: Vec<HandlerOutcome>) -> Self {
        let errors: Vec<String> = outcomes
            .iter()
            .filter_map(|outcome| {
                outcome
                    .result
                    .error()
                    .map(|err| format!("{}: {}", outcome.handler, err))
            })
            .collect();

        let (status, error) = if errors.is_empty() {
            (ExecutionState::Completed, None)
        } else {
            (ExecutionState::Failed, Some(errors.join("; ")))
        };

        Self {
            message_id: message_id.into(),
            status,
            outcomes,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionState::Completed
    }

    pub fn handler_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed_handlers(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.result.is_success())
            .map(|o| o.handler.as_str())
            .collect()
    }
}
