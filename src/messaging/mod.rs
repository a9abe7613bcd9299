//! # Messaging
//!
//! Message envelopes and the tagged results produced by dispatching them.

pub mod message;
pub mod result;

pub use message::{CachePolicy, Message, MessageKind};
pub use result::{DispatchResult, HandlerOutcome, PublishOutcome};
