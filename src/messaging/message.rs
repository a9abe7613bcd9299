//! Message envelope dispatched through the command, query and event pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Which pipeline a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Exactly one handler, must complete
    Command,
    /// Exactly one handler, result cacheable
    Query,
    /// Zero or more handlers, independent outcomes
    Event,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-query caching directives. Unset fields fall back to the cache configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub cache_key: Option<String>,
    /// Freshness TTL
    pub cache_time: Option<Duration>,
    /// Grace window after the TTL during which stale data is still served
    pub stale_time: Option<Duration>,
}

/// One unit of work.
///
/// Messages are immutable once built; pipelines only ever borrow them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: String,
    message_type: String,
    kind: MessageKind,
    payload: Value,
    timestamp: DateTime<Utc>,
    cache: Option<CachePolicy>,
}

impl Message {
    pub fn new(kind: MessageKind, message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            kind,
            payload,
            timestamp: Utc::now(),
            cache: None,
        }
    }

    pub fn command(message_type: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageKind::Command, message_type, payload)
    }

    pub fn query(message_type: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageKind::Query, message_type, payload)
    }

    pub fn event(message_type: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageKind::Event, message_type, payload)
    }

    /// Replace the generated id (useful for idempotency keys and tests)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache.get_or_insert_with(CachePolicy::default).cache_key = Some(key.into());
        self
    }

    pub fn with_cache_time(mut self, ttl: Duration) -> Self {
        self.cache.get_or_insert_with(CachePolicy::default).cache_time = Some(ttl);
        self
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.cache.get_or_insert_with(CachePolicy::default).stale_time = Some(stale_time);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn cache_policy(&self) -> Option<&CachePolicy> {
        self.cache.as_ref()
    }

    /// Cache key for this query: the explicit key, or `type:payload` when none was given.
    pub fn effective_cache_key(&self) -> String {
        match self.cache.as_ref().and_then(|c| c.cache_key.as_ref()) {
            Some(key) => key.clone(),
            None => format!("{}:{}", self.message_type, self.payload),
        }
    }
}
