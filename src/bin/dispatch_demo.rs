//! # Dispatch Demo
//!
//! Wires configuration, structured logging and a [`MessageBus`] together and walks one
//! message of each kind through it. Pass a TOML path as the first argument to override
//! `config/dispatch.toml`.

use anyhow::Context;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tasker_dispatch::config::ConfigManager;
use tasker_dispatch::logging::init_structured_logging;
use tasker_dispatch::middleware::LoggingMiddleware;
use tasker_dispatch::{DispatchError, DispatchResult, FnHandler, Message, MessageBus};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let manager = match std::env::args().nth(1) {
        Some(path) => ConfigManager::load_from_file(&path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => ConfigManager::load().context("loading default configuration")?,
    };

    let bus = MessageBus::new(manager.config().clone());
    register_handlers(&bus);

    let created = bus
        .execute(&Message::command("orders.create", json!({"sku": "sku-1", "qty": 2})))
        .await;
    info!(success = created.is_success(), data = ?created.data(), "Command dispatched");

    let price = Message::query("prices.get", json!({"sku": "sku-1"})).with_cache_key("price:sku-1");
    for _ in 0..2 {
        let result = bus.query(&price).await;
        info!(
            from_cache = result.from_cache(),
            stale = result.is_stale(),
            data = ?result.data(),
            "Query dispatched"
        );
    }

    let outcome = bus
        .publish(&Message::event("orders.created", json!({"sku": "sku-1"})))
        .await;
    info!(status = %outcome.status, handlers = outcome.handler_count(), "Event published");

    bus.scheduler().publish_delayed(
        Message::event("orders.reminder", json!({"sku": "sku-1"})),
        Duration::from_millis(100),
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    let metrics = bus.metrics();
    info!(
        dispatched = metrics.dispatched,
        succeeded = metrics.succeeded,
        failed = metrics.failed,
        cache_hits = metrics.cache_hits,
        "Demo finished"
    );
    bus.shutdown();
    Ok(())
}

fn register_handlers(bus: &MessageBus) {
    bus.commands().add_middleware(Arc::new(LoggingMiddleware::new()));
    bus.commands().add_middleware(Arc::new(bus.retry_middleware()));

    bus.commands().register(
        "orders.create",
        FnHandler::arc("create_order", |command| async move {
            let qty = command.payload()["qty"]
                .as_u64()
                .ok_or_else(|| DispatchError::Validation("qty must be a positive integer".into()))?;
            Ok(DispatchResult::success(json!({"order_id": 1001, "qty": qty})))
        }),
    );

    bus.queries().register(
        "prices.get",
        FnHandler::arc("price_lookup", |query| async move {
            Ok(DispatchResult::success(
                json!({"sku": query.payload()["sku"].clone(), "price_cents": 1299}),
            ))
        }),
    );

    bus.events().subscribe(
        "orders.created",
        FnHandler::arc("audit_log", |event| async move {
            info!(message_id = %event.id(), "Audit entry written");
            Ok(DispatchResult::success(json!(null)))
        }),
    );
    bus.events().subscribe(
        "orders.reminder",
        FnHandler::arc("reminder", |event| async move {
            info!(message_id = %event.id(), "Reminder sent");
            Ok(DispatchResult::success(json!(null)))
        }),
    );
}
