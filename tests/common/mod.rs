//! Shared helpers for dispatch integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tasker_dispatch::{DispatchError, DispatchResult, FnHandler, MessageHandler};

/// Ordered record of side effects across middleware and handlers
#[derive(Debug, Clone, Default)]
pub struct Trace {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

/// Thread-safe invocation counter
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new count
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handler that always succeeds with `data` and counts its invocations
pub fn ok_handler(name: &str, calls: &Counter, data: Value) -> Arc<dyn MessageHandler> {
    let calls = calls.clone();
    FnHandler::arc(name, move |_| {
        calls.bump();
        let data = data.clone();
        async move { Ok(DispatchResult::success(data)) }
    })
}

/// Handler that returns an execution error for the first `failures` calls, then succeeds
pub fn flaky_handler(name: &str, calls: &Counter, failures: usize) -> Arc<dyn MessageHandler> {
    let calls = calls.clone();
    FnHandler::arc(name, move |_| {
        let attempt = calls.bump();
        async move {
            if attempt <= failures {
                Err(DispatchError::execution(format!("attempt {attempt} failed")))
            } else {
                Ok(DispatchResult::success(json!({"attempt": attempt})))
            }
        }
    })
}
