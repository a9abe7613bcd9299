//! # Message Bus
//!
//! The owning struct for a dispatch core: command, query and event buses sharing one
//! execution status table and one set of hooks, plus the deferred scheduler and the
//! background maintenance tasks configured for them.
//!
//! Construct it once at startup, register handlers and middleware, then hand out clones
//! of the individual buses (they are cheap `Arc` handles). [`MessageBus::shutdown`]
//! stops the background tasks and drops pending scheduled publishes.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tasker_dispatch::{DispatchConfig, DispatchResult, FnHandler, Message, MessageBus};
//!
//! # async fn example() {
//! let bus = MessageBus::new(DispatchConfig::default());
//! bus.commands().register(
//!     "orders.create",
//!     FnHandler::arc("create_order", |_| async { Ok(DispatchResult::success(json!({"id": 1}))) }),
//! );
//!
//! let result = bus.execute(&Message::command("orders.create", json!({}))).await;
//! assert!(result.is_success());
//! bus.shutdown();
//! # }
//! ```

use crate::cache::CacheProvider;
use crate::config::DispatchConfig;
use crate::messaging::{DispatchResult, Message, PublishOutcome};
use crate::middleware::{RetryMiddleware, RetryPolicy, TimeoutMiddleware};
use crate::observability::{DispatchHooks, DispatchMetrics, MetricsSnapshot};
use crate::pipeline::{CommandBus, EventBus, QueryBus};
use crate::scheduler::DeferredScheduler;
use crate::status::{ExecutionRecord, ExecutionStatusTable};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct MessageBus {
    config: DispatchConfig,
    commands: CommandBus,
    queries: QueryBus<CacheProvider>,
    events: EventBus,
    scheduler: DeferredScheduler,
    status: Arc<ExecutionStatusTable>,
    metrics: Arc<DispatchMetrics>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageBus {
    /// Build with the standard hooks (`tracing` spans and structured dispatch logs)
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_hooks(config, DispatchHooks::standard())
    }

    /// Build with caller-supplied hooks. A [`DispatchMetrics`] observer is always added.
    ///
    /// Background tasks (status sweeper, scheduler cleanup) are only started when called
    /// from within a tokio runtime.
    pub fn with_hooks(config: DispatchConfig, hooks: DispatchHooks) -> Self {
        let metrics = Arc::new(DispatchMetrics::new());
        let hooks = hooks.with_observer(metrics.clone());
        let status = Arc::new(ExecutionStatusTable::new());

        let commands = CommandBus::new(Arc::clone(&status), hooks.clone());
        let queries = QueryBus::new(
            CacheProvider::from_config(&config.cache),
            config.cache.clone(),
            Arc::clone(&status),
            hooks.clone(),
        );
        let events = EventBus::new(Arc::clone(&status), hooks);
        if let Some(timeout) = config.events.handler_timeout() {
            events.add_middleware(Arc::new(TimeoutMiddleware::new(timeout)));
        }
        let scheduler = DeferredScheduler::new(events.clone());

        let bus = Self {
            config,
            commands,
            queries,
            events,
            scheduler,
            status,
            metrics,
            background: Mutex::new(Vec::new()),
        };
        bus.start_background_tasks();

        info!(
            max_retries = bus.config.retry.max_retries,
            cache_backend = ?bus.config.cache.provider,
            status_sweep = bus.config.status.sweep_enabled,
            "Message bus initialized"
        );
        bus
    }

    fn start_background_tasks(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No tokio runtime available; status sweeper and scheduler cleanup not started");
            return;
        }

        let mut background = self.background.lock();
        if self.config.status.sweep_enabled {
            background.push(
                self.status
                    .start_sweeper(self.config.status.sweep_interval(), self.config.status.max_age()),
            );
        }
        background.push(self.scheduler.start_cleanup_task(Duration::from_secs(
            self.config.scheduler.cleanup_interval_seconds,
        )));
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn commands(&self) -> &CommandBus {
        &self.commands
    }

    pub fn queries(&self) -> &QueryBus<CacheProvider> {
        &self.queries
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn scheduler(&self) -> &DeferredScheduler {
        &self.scheduler
    }

    pub fn status_table(&self) -> &Arc<ExecutionStatusTable> {
        &self.status
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// A retry interceptor using the configured backoff
    pub fn retry_middleware(&self) -> RetryMiddleware {
        RetryMiddleware::new(RetryPolicy::from(&self.config.retry))
    }

    pub async fn execute(&self, command: &Message) -> DispatchResult {
        self.commands.execute(command).await
    }

    pub async fn query(&self, query: &Message) -> DispatchResult {
        self.queries.execute_with_cache(query).await
    }

    pub async fn publish(&self, event: &Message) -> PublishOutcome {
        self.events.publish(event).await
    }

    pub fn status(&self, message_id: &str) -> Option<ExecutionRecord> {
        self.status.get(message_id)
    }

    /// Stop background tasks and drop pending scheduled publishes. Returns how many
    /// scheduled publishes were dropped.
    pub fn shutdown(&self) -> usize {
        let tasks: Vec<JoinHandle<()>> = self.background.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        let dropped = self.scheduler.shutdown();

        info!(
            background_tasks = tasks.len(),
            dropped_scheduled = dropped,
            "Message bus shut down"
        );
        dropped
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("config", &self.config)
            .field("pending_scheduled", &self.scheduler.pending_count())
            .field("tracked_messages", &self.status.len())
            .finish_non_exhaustive()
    }
}
