//! End-to-end dispatch behavior across the command, query and event buses.

mod common;

use async_trait::async_trait;
use common::{flaky_handler, ok_handler, Counter, Trace};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tasker_dispatch::middleware::{RetryMiddleware, RetryPolicy, ValidationMiddleware};
use tasker_dispatch::observability::{SpanAttributes, SpanHandle};
use tasker_dispatch::{
    CommandBus, DispatchConfig, DispatchError, DispatchHooks, DispatchResult, EventBus,
    ExecutionState, ExecutionStatusTable, FnHandler, Message, MessageBus, Middleware, Next,
    QueryBus, Result, TracingHook,
};
use tasker_dispatch::cache::InMemoryCacheStore;
use tasker_dispatch::config::CacheConfig;

struct TracingMiddleware {
    name: String,
    trace: Trace,
}

impl TracingMiddleware {
    fn arc(name: &str, trace: &Trace) -> Arc<dyn Middleware> {
        Arc::new(Self {
            name: name.to_string(),
            trace: trace.clone(),
        })
    }
}

#[async_trait]
impl Middleware for TracingMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, message: &Message, next: Next<'_>) -> Result<DispatchResult> {
        self.trace.push(format!("{}-before", self.name));
        let result = next.run(message).await;
        self.trace.push(format!("{}-after", self.name));
        result
    }
}

fn status() -> Arc<ExecutionStatusTable> {
    Arc::new(ExecutionStatusTable::new())
}

fn traced_handler(trace: &Trace) -> Arc<dyn tasker_dispatch::MessageHandler> {
    let trace = trace.clone();
    FnHandler::arc("traced", move |_| {
        trace.push("H");
        async { Ok(DispatchResult::success(json!("done"))) }
    })
}

async fn exploding_listener(_event: Message) -> Result<DispatchResult> {
    panic!("listener exploded")
}

#[tokio::test]
async fn test_middleware_runs_as_onion() {
    let trace = Trace::new();
    let bus = CommandBus::new(status(), DispatchHooks::new());
    bus.add_middleware(TracingMiddleware::arc("M1", &trace));
    bus.add_middleware(TracingMiddleware::arc("M2", &trace));
    bus.register("orders.create", traced_handler(&trace));

    let result = bus
        .execute(&Message::command("orders.create", json!({})))
        .await;

    assert!(result.is_success());
    assert_eq!(
        trace.entries(),
        vec!["M1-before", "M2-before", "H", "M2-after", "M1-after"]
    );
}

#[tokio::test]
async fn test_removed_middleware_is_skipped() {
    let trace = Trace::new();
    let bus = CommandBus::new(status(), DispatchHooks::new());
    bus.add_middleware(TracingMiddleware::arc("M1", &trace));
    bus.add_middleware(TracingMiddleware::arc("M2", &trace));
    bus.register("orders.create", traced_handler(&trace));

    assert!(bus.remove_middleware("M1"));
    bus.execute(&Message::command("orders.create", json!({})))
        .await;

    assert_eq!(trace.entries(), vec!["M2-before", "H", "M2-after"]);
}

#[tokio::test]
async fn test_unregistered_command_skips_middleware() {
    let trace = Trace::new();
    let bus = CommandBus::new(status(), DispatchHooks::new());
    bus.add_middleware(TracingMiddleware::arc("M1", &trace));

    let command = Message::command("orders.unknown", json!({}));
    let result = bus.execute(&command).await;

    assert!(!result.is_success());
    assert_eq!(result.error_code(), Some("HANDLER_NOT_FOUND"));
    assert!(trace.entries().is_empty());
    assert_eq!(
        bus.status(command.id()).map(|r| r.state),
        Some(ExecutionState::Failed)
    );
}

#[tokio::test]
async fn test_event_failures_are_isolated_per_handler() {
    let bus = EventBus::new(status(), DispatchHooks::new());
    let audit_calls = Counter::new();
    let invoked = Counter::new();
    bus.subscribe(
        "orders.created",
        ok_handler("audit", &audit_calls, json!(null)),
    );
    let counter = invoked.clone();
    bus.subscribe(
        "orders.created",
        FnHandler::arc("exploding", move |event| {
            counter.bump();
            exploding_listener(event)
        }),
    );

    let event = Message::event("orders.created", json!({"order": 1}));
    let outcome = bus.publish(&event).await;

    assert_eq!(outcome.status, ExecutionState::Failed);
    assert_eq!(audit_calls.get(), 1);
    assert_eq!(invoked.get(), 1);
    assert_eq!(outcome.failed_handlers(), vec!["exploding"]);

    let failed = outcome
        .outcomes
        .iter()
        .find(|o| o.handler == "exploding")
        .unwrap();
    assert_eq!(failed.result.error_code(), Some("EXECUTION_ERROR"));
    assert_eq!(failed.result.error(), Some("panic: listener exploded"));
    assert!(outcome
        .outcomes
        .iter()
        .any(|o| o.handler == "audit" && o.result.is_success()));
}

#[tokio::test(start_paused = true)]
async fn test_retry_backs_off_exponentially() {
    let calls = Counter::new();
    let seen_at = Arc::new(Mutex::new(Vec::new()));
    let bus = CommandBus::new(status(), DispatchHooks::new());
    bus.add_middleware(Arc::new(RetryMiddleware::default()));

    let handler_calls = calls.clone();
    let timestamps = Arc::clone(&seen_at);
    bus.register(
        "payments.charge",
        FnHandler::arc("charge", move |_| {
            let attempt = handler_calls.bump();
            timestamps.lock().push(tokio::time::Instant::now());
            async move {
                if attempt < 3 {
                    Err(DispatchError::execution("gateway unavailable"))
                } else {
                    Ok(DispatchResult::success(json!({"charged": true})))
                }
            }
        }),
    );

    let result = bus
        .execute(&Message::command("payments.charge", json!({})))
        .await;

    assert!(result.is_success());
    assert_eq!(calls.get(), 3);
    let seen_at = seen_at.lock().clone();
    assert!(seen_at[1] - seen_at[0] >= Duration::from_millis(1000));
    assert!(seen_at[2] - seen_at[1] >= Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_become_execution_error() {
    let calls = Counter::new();
    let bus = CommandBus::new(status(), DispatchHooks::new());
    bus.add_middleware(Arc::new(RetryMiddleware::new(RetryPolicy::new(
        2,
        Duration::from_millis(100),
    ))));
    bus.register("payments.charge", flaky_handler("charge", &calls, usize::MAX));

    let result = bus
        .execute(&Message::command("payments.charge", json!({})))
        .await;

    assert_eq!(calls.get(), 3);
    assert_eq!(result.error_code(), Some("EXECUTION_ERROR"));
    assert_eq!(result.error(), Some("attempt 3 failed"));
}

#[tokio::test(start_paused = true)]
async fn test_business_failures_are_not_retried() {
    let calls = Counter::new();
    let bus = CommandBus::new(status(), DispatchHooks::new());
    bus.add_middleware(Arc::new(RetryMiddleware::default()));
    let handler_calls = calls.clone();
    bus.register(
        "orders.cancel",
        FnHandler::arc("cancel", move |_| {
            handler_calls.bump();
            async { Ok(DispatchResult::failure("already shipped", "ORDER_SHIPPED")) }
        }),
    );

    let result = bus
        .execute(&Message::command("orders.cancel", json!({})))
        .await;

    assert_eq!(calls.get(), 1);
    assert_eq!(result.error_code(), Some("ORDER_SHIPPED"));
}

#[tokio::test]
async fn test_validation_short_circuits_handler() {
    let calls = Counter::new();
    let bus = CommandBus::new(status(), DispatchHooks::new());
    bus.add_middleware(Arc::new(ValidationMiddleware::new().with_validator(
        "orders.create",
        |message: &Message| {
            if message.payload().get("sku").is_some() {
                Ok(())
            } else {
                Err("sku is required".to_string())
            }
        },
    )));
    bus.register("orders.create", ok_handler("create", &calls, json!({})));

    let rejected = bus
        .execute(&Message::command("orders.create", json!({})))
        .await;
    assert_eq!(rejected.error_code(), Some("VALIDATION_ERROR"));
    assert_eq!(calls.get(), 0);

    let accepted = bus
        .execute(&Message::command("orders.create", json!({"sku": "sku-1"})))
        .await;
    assert!(accepted.is_success());
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn test_query_error_preserves_message() {
    let bus = QueryBus::new(
        InMemoryCacheStore::new(100),
        CacheConfig::default(),
        status(),
        DispatchHooks::new(),
    );
    bus.register(
        "reports.get",
        FnHandler::arc("report", |_| async {
            Err(DispatchError::execution("warehouse connection refused"))
        }),
    );

    let query = Message::query("reports.get", json!({}));
    let plain = bus.execute(&query).await;
    assert_eq!(plain.error_code(), Some("EXECUTION_ERROR"));
    assert_eq!(plain.error(), Some("warehouse connection refused"));

    let cached = bus.execute_with_cache(&query).await;
    assert_eq!(cached.error_code(), Some("EXECUTION_ERROR"));
    assert_eq!(cached.error(), Some("warehouse connection refused"));
}

#[derive(Default)]
struct RecordingTracer {
    spans: Mutex<Vec<(String, Option<bool>)>>,
}

impl TracingHook for RecordingTracer {
    fn start_span(&self, name: &str, _attributes: &SpanAttributes) -> SpanHandle {
        self.spans.lock().push((name.to_string(), None));
        SpanHandle::detached(name)
    }

    fn finish_span(
        &self,
        handle: SpanHandle,
        success: bool,
        _error: Option<&str>,
        _attributes: &SpanAttributes,
    ) {
        let mut spans = self.spans.lock();
        if let Some(entry) = spans
            .iter_mut()
            .find(|(name, finished)| name == handle.name() && finished.is_none())
        {
            entry.1 = Some(success);
        }
    }
}

#[tokio::test]
async fn test_tracing_hook_wraps_each_dispatch_once() {
    let tracer = Arc::new(RecordingTracer::default());
    let hooks = DispatchHooks::new().with_tracer(tracer.clone());
    let bus = MessageBus::with_hooks(DispatchConfig::default(), hooks);
    let calls = Counter::new();
    bus.commands()
        .register("orders.create", ok_handler("create", &calls, json!({})));

    bus.execute(&Message::command("orders.create", json!({})))
        .await;
    bus.execute(&Message::command("orders.missing", json!({})))
        .await;

    let spans = tracer.spans.lock().clone();
    assert_eq!(
        spans,
        vec![
            ("command.orders.create".to_string(), Some(true)),
            ("command.orders.missing".to_string(), Some(false)),
        ]
    );
    bus.shutdown();
}

#[tokio::test]
async fn test_fire_and_forget_command_reaches_terminal_state() {
    let bus = MessageBus::with_hooks(DispatchConfig::default(), DispatchHooks::new());
    let calls = Counter::new();
    bus.commands()
        .register("reports.build", ok_handler("build", &calls, json!("built")));

    let id = bus
        .commands()
        .execute_async(Message::command("reports.build", json!({})));
    for _ in 0..100 {
        if bus.status(&id).is_some_and(|r| r.state.is_terminal()) {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert_eq!(
        bus.status(&id).map(|r| r.state),
        Some(ExecutionState::Completed)
    );
    assert_eq!(calls.get(), 1);
    bus.shutdown();
}
