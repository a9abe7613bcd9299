//! # Deferred Dispatch Scheduler
//!
//! Publishes events through the [`EventBus`] after a delay or at an absolute time.
//!
//! Every scheduled entry owns a tokio timer task. An entry is removed when its timer fires,
//! when it is cancelled, or when a cleanup pass finds it more than [`OVERDUE_GRACE`] past its
//! deadline (the timer is aborted in that case). Deadlines are tracked with
//! [`tokio::time::Instant`] so paused-time tests drive the scheduler deterministically;
//! the wall-clock `execute_at` is kept for listings.

use crate::constants::components;
use crate::messaging::{Message, PublishOutcome};
use crate::pipeline::EventBus;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long past its deadline an unfired entry may linger before cleanup sweeps it
pub const OVERDUE_GRACE: Duration = Duration::from_secs(1);

/// Result of [`DeferredScheduler::publish_scheduled`]
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// A timer was registered under this id
    Scheduled(Uuid),
    /// The requested time had already passed; the event was published immediately
    Dispatched(PublishOutcome),
}

impl ScheduleOutcome {
    pub fn schedule_id(&self) -> Option<Uuid> {
        match self {
            Self::Scheduled(id) => Some(*id),
            Self::Dispatched(_) => None,
        }
    }
}

/// Listing entry for a pending scheduled publish
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledEvent {
    pub id: Uuid,
    pub message_id: String,
    pub event_type: String,
    pub execute_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ScheduledEntry {
    event: Message,
    execute_at: DateTime<Utc>,
    deadline: Instant,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone)]
pub struct DeferredScheduler {
    event_bus: EventBus,
    entries: Arc<DashMap<Uuid, ScheduledEntry>>,
}

impl DeferredScheduler {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Publish `event` once `delay` has elapsed. Must be called from within a tokio runtime.
    pub fn publish_delayed(&self, event: Message, delay: Duration) -> Uuid {
        let execute_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.schedule(event, delay, execute_at)
    }

    /// Publish `event` at `execute_at`. A time that is not in the future publishes right away
    /// and returns the publish outcome instead of a schedule id.
    pub async fn publish_scheduled(
        &self,
        event: Message,
        execute_at: DateTime<Utc>,
    ) -> ScheduleOutcome {
        match (execute_at - Utc::now()).to_std() {
            Ok(delay) if !delay.is_zero() => {
                ScheduleOutcome::Scheduled(self.schedule(event, delay, execute_at))
            }
            _ => {
                debug!(
                    component = components::SCHEDULER,
                    message_id = %event.id(),
                    execute_at = %execute_at,
                    "Scheduled time already passed; publishing immediately"
                );
                ScheduleOutcome::Dispatched(self.event_bus.publish(&event).await)
            }
        }
    }

    fn schedule(&self, event: Message, delay: Duration, execute_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        let deadline = Instant::now()
            .checked_add(delay)
            .unwrap_or_else(far_future);

        let entries = Arc::clone(&self.entries);
        let bus = self.event_bus.clone();
        let timer_event = event.clone();

        debug!(
            component = components::SCHEDULER,
            schedule_id = %id,
            message_id = %event.id(),
            event_type = %event.message_type(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling deferred publish"
        );

        // The shard stays locked until the entry is inserted, so a timer that fires
        // immediately cannot miss its own removal.
        self.entries.entry(id).or_insert_with(|| ScheduledEntry {
            event,
            execute_at,
            deadline,
            handle: tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if entries.remove(&id).is_none() {
                    return;
                }
                let outcome = bus.publish(&timer_event).await;
                debug!(
                    component = components::SCHEDULER,
                    schedule_id = %id,
                    message_id = %timer_event.id(),
                    status = %outcome.status,
                    "Deferred publish fired"
                );
            }),
        });
        id
    }

    /// Cancel a pending publish. Returns `false` if it already fired or was never scheduled.
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.entries.remove(id) {
            Some((_, entry)) => {
                entry.handle.abort();
                debug!(
                    component = components::SCHEDULER,
                    schedule_id = %id,
                    message_id = %entry.event.id(),
                    "Deferred publish cancelled"
                );
                true
            }
            None => false,
        }
    }

    /// Sweep entries whose timers should have fired by now, aborting them
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    /// [`cleanup`](Self::cleanup) as of `now`
    pub fn cleanup_at(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.deadline + OVERDUE_GRACE <= now {
                entry.handle.abort();
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            debug!(
                component = components::SCHEDULER,
                removed = removed,
                remaining = self.entries.len(),
                "Swept overdue scheduled entries"
            );
        }
        removed
    }

    /// Pending publishes, soonest first
    pub fn pending(&self) -> Vec<ScheduledEvent> {
        let mut pending: Vec<ScheduledEvent> = self
            .entries
            .iter()
            .map(|entry| ScheduledEvent {
                id: *entry.key(),
                message_id: entry.event.id().to_string(),
                event_type: entry.event.message_type().to_string(),
                execute_at: entry.execute_at,
            })
            .collect();
        pending.sort_by_key(|event| event.execute_at);
        pending
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    /// Abort every pending timer. Returns how many publishes were dropped.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<Uuid> = self.entries.iter().map(|entry| *entry.key()).collect();
        let dropped = ids.iter().filter(|id| self.cancel(id)).count();
        if dropped > 0 {
            warn!(
                component = components::SCHEDULER,
                dropped = dropped,
                "Scheduler shut down with pending publishes"
            );
        }
        dropped
    }

    /// Spawn a background task that calls [`cleanup`](Self::cleanup) every `interval`
    pub fn start_cleanup_task(&self, interval: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        info!(
            component = components::SCHEDULER,
            interval_seconds = interval.as_secs(),
            "Starting scheduler cleanup task"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                scheduler.cleanup();
            }
        })
    }
}

// roughly 30 years, the same horizon tokio uses for "never"
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}
