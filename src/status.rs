//! # Execution Status Table
//!
//! Per-message lifecycle tracking for dispatches, including fire-and-forget ones.
//!
//! ```text
//! pending ──▶ running ──▶ completed
//!                    └──▶ failed
//! ```
//!
//! Records are keyed by message id in a sharded [`DashMap`], so concurrent dispatches of
//! different messages never contend on a single lock. Records are purged by an explicit
//! time-based sweep ([`ExecutionStatusTable::cleanup`]) or by the optional background sweeper.

use crate::constants::components;
use crate::messaging::{Message, MessageKind};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionState {
    /// Check if this is a terminal state (no further transitions expected)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid execution state: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub message_id: String,
    pub message_type: String,
    pub kind: MessageKind,
    pub state: ExecutionState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Wall-clock time between creation and the terminal transition
    pub fn duration(&self) -> Option<Duration> {
        self.end_time
            .and_then(|end| (end - self.start_time).to_std().ok())
    }
}

/// Counts of records per state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct ExecutionStatusTable {
    records: DashMap<String, ExecutionRecord>,
}

impl ExecutionStatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending_record(message: &Message) -> ExecutionRecord {
        ExecutionRecord {
            message_id: message.id().to_string(),
            message_type: message.message_type().to_string(),
            kind: message.kind(),
            state: ExecutionState::Pending,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }
    }

    /// Create (or reset) the record for a message about to be dispatched
    pub fn mark_pending(&self, message: &Message) {
        self.records
            .insert(message.id().to_string(), Self::pending_record(message));
    }

    /// Create a pending record unless one already exists (e.g. from a fire-and-forget dispatch)
    pub fn track(&self, message: &Message) {
        self.records
            .entry(message.id().to_string())
            .or_insert_with(|| Self::pending_record(message));
    }

    pub fn mark_running(&self, message_id: &str) {
        if let Some(mut record) = self.records.get_mut(message_id) {
            record.state = ExecutionState::Running;
        }
    }

    pub fn mark_completed(&self, message_id: &str) {
        self.finish(message_id, ExecutionState::Completed, None);
    }

    pub fn mark_failed(&self, message_id: &str, error: impl Into<String>) {
        self.finish(message_id, ExecutionState::Failed, Some(error.into()));
    }

    fn finish(&self, message_id: &str, state: ExecutionState, error: Option<String>) {
        if let Some(mut record) = self.records.get_mut(message_id) {
            record.state = state;
            record.end_time = Some(Utc::now());
            record.error = error;
        }
    }

    pub fn get(&self, message_id: &str) -> Option<ExecutionRecord> {
        self.records.get(message_id).map(|r| r.value().clone())
    }

    pub fn state(&self, message_id: &str) -> Option<ExecutionState> {
        self.records.get(message_id).map(|r| r.state)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn summary(&self) -> StatusSummary {
        let mut summary = StatusSummary::default();
        for record in self.records.iter() {
            match record.state {
                ExecutionState::Pending => summary.pending += 1,
                ExecutionState::Running => summary.running += 1,
                ExecutionState::Completed => summary.completed += 1,
                ExecutionState::Failed => summary.failed += 1,
            }
        }
        summary
    }

    /// Purge records created more than `max_age` ago. Returns how many were removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.cleanup_before(cutoff)
    }

    /// Purge records created strictly before `cutoff`.
    pub fn cleanup_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.start_time >= cutoff);
        let removed = before.saturating_sub(self.records.len());

        if removed > 0 {
            debug!(
                component = components::STATUS_TABLE,
                removed = removed,
                remaining = self.records.len(),
                "Purged expired execution records"
            );
        }
        removed
    }

    pub fn clear(&self) {
        self.records.clear();
    }

    /// Spawn a background sweep that calls [`cleanup`](Self::cleanup) every `interval`.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        let table = Arc::clone(self);
        info!(
            component = components::STATUS_TABLE,
            interval_seconds = interval.as_secs(),
            max_age_seconds = max_age.as_secs(),
            "Starting execution status sweeper"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                table.cleanup(max_age);
            }
        })
    }
}
