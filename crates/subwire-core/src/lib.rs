//! Core value types and contracts for the subwire session layer.
//!
//! This crate provides the fundamental building blocks:
//! - `Message` - Wire-format value object
//! - `Cache` - Three-state dedup/memoization store
//! - `EventCallbacks` - Named-event dispatcher for consumers
//! - Transport and callback traits shared across crates

pub mod cache;
pub mod handler;
pub mod message;
pub mod traits;

pub use cache::Cache;
pub use handler::{EventCallbacks, HandlerError};
pub use message::{Message, ResourceKey};
pub use traits::{
    CallbackHandler, Connector, ReadyState, Transport, TransportError, TransportEvent,
};
