//! Per-type payload validation.
//!
//! A failing validator short-circuits the chain with a `VALIDATION_ERROR` failure result;
//! the handler never runs. Types without validators pass through.

use super::{Middleware, Next};
use crate::constants::error_codes;
use crate::error::Result;
use crate::messaging::{DispatchResult, Message};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Checks a message, returning a human-readable reason on rejection
pub type Validator = Arc<dyn Fn(&Message) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Default)]
pub struct ValidationMiddleware {
    validators: RwLock<HashMap<String, Vec<Validator>>>,
}

impl ValidationMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validator for a message type. All validators for a type must pass.
    pub fn add_validator<F>(&self, message_type: impl Into<String>, validator: F)
    where
        F: Fn(&Message) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validators
            .write()
            .entry(message_type.into())
            .or_default()
            .push(Arc::new(validator));
    }

    /// Builder-style [`add_validator`](Self::add_validator)
    pub fn with_validator<F>(self, message_type: impl Into<String>, validator: F) -> Self
    where
        F: Fn(&Message) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.add_validator(message_type, validator);
        self
    }

    fn validate(&self, message: &Message) -> std::result::Result<(), String> {
        let validators = self
            .validators
            .read()
            .get(message.message_type())
            .cloned()
            .unwrap_or_default();

        let errors: Vec<String> = validators
            .iter()
            .filter_map(|validate| validate(message).err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

impl std::fmt::Debug for ValidationMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<String> = self.validators.read().keys().cloned().collect();
        f.debug_struct("ValidationMiddleware")
            .field("types", &types)
            .finish()
    }
}

#[async_trait]
impl Middleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    async fn execute(&self, message: &Message, next: Next<'_>) -> Result<DispatchResult> {
        if let Err(reason) = self.validate(message) {
            debug!(
                message_id = %message.id(),
                message_type = %message.message_type(),
                reason = %reason,
                "Message rejected by validation"
            );
            return Ok(DispatchResult::failure(reason, error_codes::VALIDATION_ERROR));
        }
        next.run(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::HandlerEndpoint;
    use crate::registry::FnHandler;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn requires_sku(message: &Message) -> std::result::Result<(), String> {
        match message.payload().get("sku") {
            Some(_) => Ok(()),
            None => Err("sku is required".to_string()),
        }
    }

    #[tokio::test]
    async fn test_invalid_message_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let endpoint = HandlerEndpoint::new(FnHandler::arc("price", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(DispatchResult::success(json!(9.99))) }
        }));
        let middleware: Vec<Arc<dyn Middleware>> = vec![Arc::new(
            ValidationMiddleware::new()
                .with_validator("price.get", requires_sku)
                .with_validator("price.get", |m| {
                    if m.payload().get("currency").is_some() {
                        Ok(())
                    } else {
                        Err("currency is required".to_string())
                    }
                }),
        )];

        let bad = Message::query("price.get", json!({}));
        let result = Next::new(&middleware, &endpoint).run(&bad).await.unwrap();
        assert_eq!(result.error_code(), Some("VALIDATION_ERROR"));
        assert_eq!(
            result.error(),
            Some("sku is required; currency is required")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let good = Message::query("price.get", json!({"sku": "sku-1", "currency": "EUR"}));
        let result = Next::new(&middleware, &endpoint).run(&good).await.unwrap();
        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_types_without_validators_pass() {
        let endpoint = HandlerEndpoint::new(FnHandler::arc("any", |_| async {
            Ok(DispatchResult::success(json!(true)))
        }));
        let middleware: Vec<Arc<dyn Middleware>> = vec![Arc::new(
            ValidationMiddleware::new().with_validator("price.get", requires_sku),
        )];

        let message = Message::command("orders.create", json!({}));
        let result = Next::new(&middleware, &endpoint).run(&message).await.unwrap();
        assert!(result.is_success());
    }
}
