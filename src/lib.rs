#![allow(clippy::doc_markdown)] // Allow technical terms like SWR, DashMap in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Dispatch
//!
//! In-process command, query and event dispatch with a stale-while-revalidate query cache.
//!
//! ## Overview
//!
//! Every message travels through the same pipeline: handler lookup in a
//! [`HandlerRegistry`], an onion-ordered [`MiddlewareChain`], the handler itself, and a
//! single boundary that turns errors and panics into [`DispatchResult`] failures. The three
//! buses differ only in fan-out and caching:
//!
//! - [`CommandBus`] - exactly one handler, status tracked, optional fire-and-forget
//! - [`QueryBus`] - exactly one handler, results served through an [`SwrCache`]
//! - [`EventBus`] - every subscribed handler, concurrently, failures isolated per handler
//!
//! [`DeferredScheduler`] publishes events later, and [`MessageBus`] owns all of it.
//!
//! ## Module Organization
//!
//! - [`messaging`] - messages and results
//! - [`registry`] - handler trait and registry
//! - [`middleware`] - middleware trait, chain and the built-in interceptors
//! - [`pipeline`] - the three buses
//! - [`cache`] - cache store collaborator and the SWR layer
//! - [`scheduler`] - delayed and scheduled publishing
//! - [`status`] - execution status table
//! - [`observability`] - tracing and observer hooks, in-process metrics
//! - [`config`] - configuration loading
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tasker_dispatch::{DispatchConfig, DispatchResult, FnHandler, Message, MessageBus};
//!
//! # async fn example() {
//! let bus = MessageBus::new(DispatchConfig::default());
//! bus.queries().register(
//!     "prices.get",
//!     FnHandler::arc("price_lookup", |query| async move {
//!         Ok(DispatchResult::success(json!({"sku": query.payload()["sku"], "price": 42})))
//!     }),
//! );
//!
//! let query = Message::query("prices.get", json!({"sku": "sku-1"})).with_cache_key("price:sku-1");
//! let first = bus.query(&query).await;
//! let second = bus.query(&query).await;
//! assert!(!first.from_cache() && second.from_cache());
//! # }
//! ```

pub mod bus;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod middleware;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod status;

pub use bus::MessageBus;
pub use cache::{CacheError, CacheProvider, CacheStore, SwrCache, SwrOptions, SwrRead};
pub use config::{ConfigManager, ConfigurationError, DispatchConfig};
pub use error::{DispatchError, Result};
pub use messaging::{CachePolicy, DispatchResult, HandlerOutcome, Message, MessageKind, PublishOutcome};
pub use middleware::{Endpoint, Middleware, MiddlewareChain, Next};
pub use observability::{DispatchHooks, DispatchMetrics, DispatchObserver, TracingHook};
pub use pipeline::{CommandBus, EventBus, QueryBus};
pub use registry::{FnHandler, HandlerRegistry, MessageHandler};
pub use scheduler::{DeferredScheduler, ScheduleOutcome, ScheduledEvent};
pub use status::{ExecutionRecord, ExecutionState, ExecutionStatusTable};
