//! # Registry Infrastructure
//!
//! Handler registration and lookup for the dispatch pipelines.
//!
//! ```text
//! Registry Infrastructure
//! └── HandlerRegistry   (message type → handler(s), single or multi mode)
//! ```

pub mod handler_registry;

pub use handler_registry::{FnHandler, HandlerRegistry, MessageHandler, RegistrationMode};
