//! Query bus: exactly one handler per type, results optionally served through the
//! stale-while-revalidate cache.
//!
//! With [`QueryBus::execute_with_cache`] the middleware chain still runs on every call; only
//! the terminal handler invocation is replaced by an SWR read whose loader calls the handler.
//! Only successful results are cached. A handler-reported failure travels through the loader
//! as [`DispatchError::Rejected`] and comes back out as the same failure result.

use super::Pipeline;
use crate::cache::{CacheProvider, CacheStore, SwrCache, SwrOptions};
use crate::config::CacheConfig;
use crate::constants::components;
use crate::error::{DispatchError, Result};
use crate::messaging::{DispatchResult, Message, MessageKind};
use crate::middleware::{Endpoint, HandlerEndpoint, Middleware, MiddlewareChain};
use crate::observability::DispatchHooks;
use crate::registry::{HandlerRegistry, MessageHandler};
use crate::status::ExecutionStatusTable;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Cheap to clone; clones share registry, middleware and cache.
#[derive(Debug)]
pub struct QueryBus<S: CacheStore + 'static = CacheProvider> {
    registry: Arc<HandlerRegistry>,
    pipeline: Arc<Pipeline>,
    cache: SwrCache<S>,
    cache_config: CacheConfig,
}

impl<S: CacheStore + 'static> Clone for QueryBus<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            pipeline: Arc::clone(&self.pipeline),
            cache: self.cache.clone(),
            cache_config: self.cache_config.clone(),
        }
    }
}

impl<S: CacheStore + 'static> QueryBus<S> {
    pub fn new(
        store: S,
        cache_config: CacheConfig,
        status: Arc<ExecutionStatusTable>,
        hooks: DispatchHooks,
    ) -> Self {
        Self {
            registry: Arc::new(HandlerRegistry::single()),
            pipeline: Arc::new(
                Pipeline::new(MessageKind::Query, components::QUERY_BUS, status, hooks)
                    .without_status_tracking(),
            ),
            cache: SwrCache::new(store),
            cache_config,
        }
    }

    /// Register the handler for a query type, replacing any existing one
    pub fn register(&self, query_type: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.registry.register(query_type, handler);
    }

    pub fn unregister(&self, query_type: &str, handler_name: Option<&str>) -> usize {
        self.registry.unregister(query_type, handler_name)
    }

    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.pipeline.middleware().add(middleware);
    }

    pub fn remove_middleware(&self, name: &str) -> bool {
        self.pipeline.middleware().remove(name)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn middleware(&self) -> &MiddlewareChain {
        self.pipeline.middleware()
    }

    pub fn cache(&self) -> &SwrCache<S> {
        &self.cache
    }

    /// Dispatch straight to the handler, bypassing the cache
    pub async fn execute(&self, query: &Message) -> DispatchResult {
        let handler = self.registry.handler(query.message_type());
        self.pipeline
            .dispatch_single(query, handler, HandlerEndpoint::new)
            .await
    }

    /// Dispatch through the SWR cache, keyed by the query's cache key (or `type:payload`)
    pub async fn execute_with_cache(&self, query: &Message) -> DispatchResult {
        let handler = self.registry.handler(query.message_type());
        let options = self.swr_options(query);
        let cache = self.cache.clone();
        self.pipeline
            .dispatch_single(query, handler, move |handler| CachedEndpoint {
                handler,
                cache,
                options,
            })
            .await
    }

    pub async fn invalidate(&self, cache_key: &str) -> Result<()> {
        self.cache.invalidate(cache_key).await.map_err(Into::into)
    }

    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        self.cache
            .invalidate_pattern(pattern)
            .await
            .map_err(Into::into)
    }

    fn swr_options(&self, query: &Message) -> SwrOptions {
        let policy = query.cache_policy();
        let ttl = policy
            .and_then(|p| p.cache_time)
            .unwrap_or_else(|| self.cache_config.default_ttl());
        let stale_time = policy
            .and_then(|p| p.stale_time)
            .unwrap_or_else(|| self.cache_config.default_stale_time());

        SwrOptions {
            ttl,
            stale_time,
            stale_while_revalidate: self.cache_config.stale_while_revalidate,
        }
    }
}

struct CachedEndpoint<S> {
    handler: Arc<dyn MessageHandler>,
    cache: SwrCache<S>,
    options: SwrOptions,
}

/// Run the handler as a cache loader: only successful data is cacheable.
async fn load_through_handler(
    handler: Arc<dyn MessageHandler>,
    query: Message,
) -> std::result::Result<Value, DispatchError> {
    match handler.handle(&query).await {
        Ok(DispatchResult::Success { data, .. }) => Ok(data),
        Ok(DispatchResult::Failure { error, error_code }) => Err(DispatchError::Rejected {
            code: error_code,
            message: error,
        }),
        Err(error) => Err(error),
    }
}

#[async_trait]
impl<S: CacheStore + 'static> Endpoint for CachedEndpoint<S> {
    async fn call(&self, query: &Message) -> Result<DispatchResult> {
        let key = query.effective_cache_key();
        let handler = Arc::clone(&self.handler);
        let owned = query.clone();

        let read = self
            .cache
            .get_with_swr(&key, move || load_through_handler(handler, owned), self.options)
            .await;

        match read {
            Ok(read) => Ok(DispatchResult::success(read.data)
                .with_cache_info(read.from_cache, read.is_stale, Some(read.expires_at))
                .with_metadata("cache_key", json!(key))),
            Err(DispatchError::Rejected { code, message }) => {
                Ok(DispatchResult::failure(message, code))
            }
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use crate::registry::FnHandler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn bus() -> QueryBus<InMemoryCacheStore> {
        QueryBus::new(
            InMemoryCacheStore::new(100),
            CacheConfig::default(),
            Arc::new(ExecutionStatusTable::new()),
            DispatchHooks::new(),
        )
    }

    fn counting_handler(calls: &Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
        let calls = Arc::clone(calls);
        FnHandler::arc("prices", move |query| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                Ok(DispatchResult::success(json!({
                    "sku": query.payload()["sku"].clone(),
                    "version": n
                })))
            }
        })
    }

    #[tokio::test]
    async fn test_execute_with_cache_serves_hits() {
        let bus = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.register("price.get", counting_handler(&calls));

        let query = Message::query("price.get", json!({"sku": "sku-1"})).with_cache_key("price:sku-1");
        let first = bus.execute_with_cache(&query).await;
        assert!(first.is_success());
        assert!(!first.from_cache());
        assert!(first.cache_expires_at().is_some());

        let second = bus.execute_with_cache(&query).await;
        assert!(second.from_cache());
        assert_eq!(second.data(), first.data());
        assert_eq!(
            second.metadata().and_then(|m| m.get("cache_key")),
            Some(&json!("price:sku-1"))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // plain execute never consults the cache
        let direct = bus.execute(&query).await;
        assert!(!direct.from_cache());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let bus = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        bus.register(
            "stock.get",
            FnHandler::arc("stock", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(DispatchResult::failure("unknown sku", "SKU_NOT_FOUND")) }
            }),
        );

        let query = Message::query("stock.get", json!({"sku": "nope"}));
        for _ in 0..2 {
            let result = bus.execute_with_cache(&query).await;
            assert_eq!(result.error_code(), Some("SKU_NOT_FOUND"));
            assert_eq!(result.error(), Some("unknown sku"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_execution_error() {
        let bus = bus();
        bus.register(
            "stock.get",
            FnHandler::arc("stock", |_| async {
                Err(DispatchError::execution("warehouse offline"))
            }),
        );

        let result = bus
            .execute_with_cache(&Message::query("stock.get", json!({})))
            .await;
        assert_eq!(result.error_code(), Some("EXECUTION_ERROR"));
        assert_eq!(result.error(), Some("warehouse offline"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let bus = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.register("price.get", counting_handler(&calls));

        let query = Message::query("price.get", json!({"sku": "sku-1"}))
            .with_cache_key("price:sku-1")
            .with_cache_time(Duration::from_secs(60));
        bus.execute_with_cache(&query).await;
        bus.invalidate("price:sku-1").await.unwrap();

        let result = bus.execute_with_cache(&query).await;
        assert!(!result.from_cache());
        assert_eq!(result.data().unwrap()["version"], json!(2));

        bus.invalidate_pattern("price:*").await.unwrap();
        let result = bus.execute_with_cache(&query).await;
        assert_eq!(result.data().unwrap()["version"], json!(3));
    }

    #[tokio::test]
    async fn test_unknown_query_type() {
        let bus = bus();
        let result = bus
            .execute_with_cache(&Message::query("nothing", json!({})))
            .await;
        assert_eq!(result.error_code(), Some("HANDLER_NOT_FOUND"));
    }
}
